//! Frame command - step through a person's appearances on a camera

use super::{print_jsonl, OutputFormat};
use crate::backends;
use crate::config::Config;
use anyhow::{Context as _, Result};
use clap::Args;
use godseye_common::CameraId;
use std::path::PathBuf;
use tracing::info;

#[derive(Args)]
pub struct FrameCommand {
    /// Person id given at registration
    person_id: String,

    /// Camera to navigate (defaults to the first camera the person appears on)
    #[arg(long)]
    camera_id: Option<String>,

    /// Position in the camera's sequence
    #[arg(long, default_value_t = 0)]
    index: u32,

    /// Write the matched frame image to this path
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Write the stored frame as-is, without the face box
    #[arg(long, requires = "output")]
    raw: bool,
}

impl FrameCommand {
    pub async fn execute(self, config: Config, format: OutputFormat) -> Result<()> {
        let camera_id = self
            .camera_id
            .as_deref()
            .map(CameraId::new)
            .transpose()
            .context("Invalid --camera-id")?;

        let search = backends::search(&config).await?;
        let view = search
            .frame(&self.person_id, camera_id.as_ref(), self.index)
            .await?;

        if let Some(output) = &self.output {
            let image = if self.raw {
                search.frame_image_raw(&view.record).await?
            } else {
                search.frame_image(&view.record).await?
            };
            tokio::fs::write(output, image)
                .await
                .with_context(|| format!("Failed to write {}", output.display()))?;
        }

        match format {
            OutputFormat::Jsonl => print_jsonl(&view)?,
            OutputFormat::Text => {
                let record = &view.record;
                info!(
                    "{} on {}: {} of {} at {} (frame {}, distance {:.3})",
                    record.person_id,
                    record.camera_id,
                    record.missing_frame_index + 1,
                    view.total,
                    record.timestamp,
                    record.frame_index,
                    record.score
                );
                let cameras: Vec<&str> = view.cameras.iter().map(CameraId::as_str).collect();
                info!("Cameras: {}", cameras.join(", "));
                if let Some(output) = &self.output {
                    info!("Frame written to {}", output.display());
                }
            }
        }
        Ok(())
    }
}
