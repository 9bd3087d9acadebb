//! Detect command - run the detection service on one image

use super::{print_jsonl, OutputFormat};
use crate::backends;
use crate::config::Config;
use anyhow::{Context as _, Result};
use clap::Args;
use godseye_vectorizer::FaceVectorizer;
use std::path::PathBuf;
use tracing::info;

#[derive(Args)]
pub struct DetectCommand {
    /// Image to analyze
    #[arg(value_name = "IMAGE")]
    image: PathBuf,

    /// Only ask for bounding boxes, skip embeddings
    #[arg(long)]
    boxes_only: bool,
}

impl DetectCommand {
    pub async fn execute(self, config: Config, format: OutputFormat) -> Result<()> {
        let image = tokio::fs::read(&self.image)
            .await
            .with_context(|| format!("Failed to read image: {}", self.image.display()))?;
        let vectorizer = backends::vectorizer(&config)?;

        if self.boxes_only {
            let boxes = vectorizer.bounding_boxes(&image).await?;
            match format {
                OutputFormat::Jsonl => {
                    for bbox in &boxes {
                        print_jsonl(bbox)?;
                    }
                }
                OutputFormat::Text => {
                    info!("{}: {} faces", self.image.display(), boxes.len());
                    for bbox in &boxes {
                        info!("  [{:.0}, {:.0}, {:.0}, {:.0}]", bbox.x1, bbox.y1, bbox.x2, bbox.y2);
                    }
                }
            }
            return Ok(());
        }

        let detections = vectorizer.vectorize_faces(&image).await?;
        if !detections.is_aligned() {
            anyhow::bail!(
                "Detection service returned {} boxes for {} embeddings",
                detections.boxes.len(),
                detections.embeddings.len()
            );
        }

        match format {
            OutputFormat::Jsonl => {
                for detection in detections.iter() {
                    print_jsonl(&detection)?;
                }
            }
            OutputFormat::Text => {
                info!("{}: {} faces", self.image.display(), detections.face_count());
                for detection in detections.iter() {
                    let b = detection.bbox;
                    info!(
                        "  [{:.0}, {:.0}, {:.0}, {:.0}] embedding dim {}",
                        b.x1,
                        b.y1,
                        b.x2,
                        b.y2,
                        detection.embedding.len()
                    );
                }
            }
        }
        Ok(())
    }
}
