//! Ingest command - index the faces in one or more videos

use super::{print_jsonl, OutputFormat};
use crate::backends;
use crate::config::Config;
use anyhow::{bail, Context as _, Result};
use clap::Args;
use godseye_common::CameraId;
use godseye_pipeline::{ingest_video, FramePipeline, IngestOptions, RunContext, RunReport};
use std::path::PathBuf;
use tracing::{error, info, warn};

#[derive(Args)]
pub struct IngestCommand {
    /// Video files or directories of still frames
    #[arg(value_name = "VIDEO", required = true)]
    inputs: Vec<PathBuf>,

    /// Camera id to store frames under (single input only; generated otherwise)
    #[arg(long)]
    camera_id: Option<String>,

    /// Process every N-th frame
    #[arg(long)]
    skip: Option<u32>,

    /// Raw frames read per batch
    #[arg(long)]
    batch_size: Option<usize>,

    /// Vectorization calls in flight at once
    #[arg(long)]
    max_concurrency: Option<usize>,

    /// Per-frame vectorization timeout in seconds (0 disables)
    #[arg(long)]
    task_timeout_secs: Option<u64>,

    /// Frame rate for image directories or streams that report none
    #[arg(long)]
    fps: Option<f64>,

    /// Remove each source file once it has been processed
    #[arg(long)]
    delete_source: bool,

    /// Fail if any input had every vectorization fail
    #[arg(long)]
    strict: bool,
}

impl IngestCommand {
    fn apply_overrides(&self, config: &mut Config) {
        let pipeline = &mut config.pipeline;
        if let Some(skip) = self.skip {
            pipeline.skip = skip;
        }
        if let Some(batch_size) = self.batch_size {
            pipeline.batch_size = batch_size;
        }
        if let Some(max_concurrency) = self.max_concurrency {
            pipeline.max_concurrency = max_concurrency;
        }
        if let Some(secs) = self.task_timeout_secs {
            pipeline.task_timeout_secs = (secs > 0).then_some(secs);
        }
    }

    fn contexts(&self) -> Result<Vec<RunContext>> {
        match &self.camera_id {
            Some(_) if self.inputs.len() > 1 => {
                bail!("--camera-id can only be used with a single input")
            }
            Some(id) => {
                let camera_id = CameraId::new(id.as_str()).context("Invalid --camera-id")?;
                Ok(vec![RunContext::for_camera(camera_id)])
            }
            None => Ok(self.inputs.iter().map(|_| RunContext::new()).collect()),
        }
    }

    pub async fn execute(self, mut config: Config, format: OutputFormat) -> Result<()> {
        self.apply_overrides(&mut config);
        let contexts = self.contexts()?;

        info!("=== Godseye Ingest ===");
        info!("Inputs: {}", self.inputs.len());
        info!(
            "Pipeline: skip={} batch_size={} max_concurrency={} timeout={:?}",
            config.pipeline.skip,
            config.pipeline.batch_size,
            config.pipeline.max_concurrency,
            config.pipeline.task_timeout().map(|d| d.as_secs())
        );

        let pipeline = FramePipeline::new(
            config.pipeline.clone(),
            backends::vectorizer(&config)?,
            backends::frame_store(&config).await?,
            backends::vector_store(&config).await?,
        )
        .context("Invalid pipeline configuration")?;

        let options = IngestOptions {
            fps_hint: self.fps,
            delete_source: self.delete_source,
        };

        let mut failed_inputs = 0usize;
        let mut all_failed_runs = 0usize;
        for (input, ctx) in self.inputs.iter().zip(&contexts) {
            match ingest_video(&pipeline, ctx, input, &options).await {
                Ok(report) => {
                    if report.all_vectorizations_failed() {
                        all_failed_runs += 1;
                    }
                    print_report(input, &report, format)?;
                }
                Err(e) => {
                    failed_inputs += 1;
                    error!(path = %input.display(), error = %e, "Ingest failed");
                }
            }
        }

        if failed_inputs > 0 {
            bail!("{failed_inputs} of {} inputs could not be ingested", self.inputs.len());
        }
        if self.strict && all_failed_runs > 0 {
            bail!("{all_failed_runs} inputs had no frame vectorized successfully");
        }
        Ok(())
    }
}

fn print_report(input: &std::path::Path, report: &RunReport, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Jsonl => print_jsonl(report)?,
        OutputFormat::Text => {
            info!("{}: camera {}", input.display(), report.camera_id);
            info!(
                "  frames: {} read, {} sampled, {} vectorized, {} failed",
                report.frames_read,
                report.frames_sampled,
                report.frames_vectorized,
                report.frames_failed
            );
            info!(
                "  saved: {} frames with faces, {} embeddings ({:.2}s)",
                report.frames_saved,
                report.embeddings_stored,
                report.elapsed.as_secs_f64()
            );
            if report.store_failures > 0 || report.count_mismatches > 0 {
                warn!(
                    "  {} store failures, {} count mismatches",
                    report.store_failures, report.count_mismatches
                );
            }
        }
    }
    Ok(())
}
