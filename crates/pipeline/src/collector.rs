//! Result collection and persistence
//!
//! Outcomes arrive in completion order, which is not the order tasks were
//! dispatched in. Each one is committed on its own: a failure in one frame's
//! writes never touches another frame.

use crate::error::{TaskFailure, TaskOutcome};
use godseye_common::CameraId;
use godseye_storage::{build_embedding_records, FrameStore, StorageError, VectorStore};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Counters for one drained batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStats {
    /// Tasks dispatched in the batch
    pub dispatched: usize,
    /// Tasks whose vectorization call succeeded
    pub vectorized: usize,
    /// Tasks that failed, timed out or were aborted
    pub failed: usize,
    /// Of `failed`, tasks that hit the per-task timeout
    pub timed_out: usize,
    /// Of `failed`, tasks that never reported back
    pub aborted: usize,
    /// Vectorized frames with at least one face
    pub with_faces: usize,
    /// Frames written to the frame store
    pub saved: usize,
    /// Embedding records written to the vector store
    pub embeddings_stored: usize,
    /// Frames dropped because boxes and embeddings disagreed
    pub count_mismatches: usize,
    /// Frame or vector writes that failed
    pub store_failures: usize,
}

/// Drains task outcomes and commits frames that contain faces
pub struct ResultCollector {
    camera_id: CameraId,
    frames: Arc<dyn FrameStore>,
    vectors: Arc<dyn VectorStore>,
}

impl ResultCollector {
    pub fn new(
        camera_id: CameraId,
        frames: Arc<dyn FrameStore>,
        vectors: Arc<dyn VectorStore>,
    ) -> Self {
        Self {
            camera_id,
            frames,
            vectors,
        }
    }

    /// Consume outcomes until every sender is gone.
    ///
    /// `dispatched` is the number of tasks launched for the batch; tasks that
    /// dropped their sender without reporting are counted as aborted.
    pub async fn drain(
        &self,
        mut results: mpsc::Receiver<TaskOutcome>,
        dispatched: usize,
    ) -> BatchStats {
        let mut stats = BatchStats {
            dispatched,
            ..BatchStats::default()
        };
        let mut received = 0usize;

        while let Some(outcome) = results.recv().await {
            received += 1;
            self.commit(outcome, &mut stats).await;
        }

        if received < dispatched {
            let missing = dispatched - received;
            warn!(
                camera_id = %self.camera_id,
                missing,
                error = %TaskFailure::Aborted,
                "Tasks ended without reporting a result"
            );
            stats.failed += missing;
            stats.aborted += missing;
        }

        stats
    }

    /// Commit one task outcome
    pub async fn commit(&self, outcome: TaskOutcome, stats: &mut BatchStats) {
        let TaskOutcome {
            task,
            result,
            elapsed,
        } = outcome;

        let faces = match result {
            Ok(faces) => faces,
            Err(failure) => {
                warn!(
                    camera_id = %task.camera_id,
                    frame_index = task.frame_index,
                    error = %failure,
                    "Skipping frame"
                );
                stats.failed += 1;
                match failure {
                    TaskFailure::TimedOut(_) => stats.timed_out += 1,
                    TaskFailure::Aborted => stats.aborted += 1,
                    TaskFailure::Vectorization(_) => {}
                }
                return;
            }
        };

        stats.vectorized += 1;
        debug!(
            camera_id = %task.camera_id,
            frame_index = task.frame_index,
            faces = faces.face_count(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Frame vectorized"
        );

        if faces.is_empty() {
            return;
        }
        stats.with_faces += 1;

        // Validate before any write so a mismatched frame leaves nothing behind
        let records = match build_embedding_records(
            &task.camera_id,
            task.frame_index,
            task.timestamp,
            &faces,
        ) {
            Ok(records) => records,
            Err(e @ StorageError::CountMismatch { .. }) => {
                warn!(
                    camera_id = %task.camera_id,
                    frame_index = task.frame_index,
                    error = %e,
                    "Dropping frame"
                );
                stats.count_mismatches += 1;
                return;
            }
            Err(e) => {
                warn!(camera_id = %task.camera_id, frame_index = task.frame_index, error = %e, "Dropping frame");
                stats.store_failures += 1;
                return;
            }
        };

        if let Err(e) = self
            .frames
            .store_frame(&task.camera_id, task.frame_index, &task.image)
            .await
        {
            warn!(
                camera_id = %task.camera_id,
                frame_index = task.frame_index,
                error = %e,
                "Failed to store frame"
            );
            stats.store_failures += 1;
            return;
        }
        stats.saved += 1;

        match self.vectors.store(&records).await {
            Ok(()) => stats.embeddings_stored += records.len(),
            Err(e) => {
                warn!(
                    camera_id = %task.camera_id,
                    frame_index = task.frame_index,
                    unavailable = e.is_unavailable(),
                    error = %e,
                    "Failed to store embeddings"
                );
                stats.store_failures += 1;
            }
        }
    }
}
