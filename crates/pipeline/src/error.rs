//! Per-task outcomes

use godseye_common::{FaceDetections, FrameTask};
use std::time::Duration;
use thiserror::Error;

/// Why a single vectorization task produced no detections.
///
/// These never abort a batch; the collector logs them and moves on.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskFailure {
    #[error("vectorization failed: {0}")]
    Vectorization(String),

    #[error("vectorization timed out after {0:?}")]
    TimedOut(Duration),

    #[error("vectorization task aborted")]
    Aborted,
}

/// Result of one task, handed back to the collector together with its frame
#[derive(Debug)]
pub struct TaskOutcome {
    pub task: FrameTask,
    pub result: Result<FaceDetections, TaskFailure>,
    pub elapsed: Duration,
}
