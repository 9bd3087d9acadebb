//! Video ingestion entry point

use crate::context::RunContext;
use crate::report::RunReport;
use crate::scheduler::FramePipeline;
use godseye_common::Result;
use godseye_decoder::open_source;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

/// Options for one ingested video
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestOptions {
    /// Frame rate to assume when the source does not report one
    pub fps_hint: Option<f64>,

    /// Remove the source file once the run has finished
    pub delete_source: bool,
}

/// Open `path` as a frame source and run it through `pipeline`.
///
/// Source deletion is best-effort and only applies to regular files; a
/// failed removal is logged and does not fail the run.
///
/// # Errors
///
/// Returns `SourceUnavailable` if the path is missing or cannot be opened as
/// a video or image directory
pub async fn ingest_video(
    pipeline: &FramePipeline,
    ctx: &RunContext,
    path: &Path,
    options: &IngestOptions,
) -> Result<RunReport> {
    info!(camera_id = %ctx.camera_id, path = %path.display(), "Ingesting video");

    let mut source = open_source(path, options.fps_hint)?;
    let report = pipeline.run(ctx, source.as_mut()).await?;
    drop(source);

    if options.delete_source && path.is_file() {
        remove_source(path).await;
    }

    Ok(report)
}

/// Best-effort removal of a processed source file; returns whether it is gone
async fn remove_source(path: &Path) -> bool {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {
            info!(path = %path.display(), "Removed source video");
            true
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to remove source video");
            false
        }
    }
}
