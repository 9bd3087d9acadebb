//! Run summary

use crate::collector::BatchStats;
use chrono::{DateTime, Utc};
use godseye_common::CameraId;
use serde::Serialize;
use std::time::Duration;
use uuid::Uuid;

/// Counters for one completed pipeline run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub camera_id: CameraId,
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,

    /// Raw frames pulled from the source
    pub frames_read: u64,
    /// Frames selected by the sampling policy and dispatched
    pub frames_sampled: u64,
    /// Dispatched frames whose vectorization succeeded
    pub frames_vectorized: u64,
    /// Dispatched frames that failed for any reason
    pub frames_failed: u64,
    pub frames_timed_out: u64,
    pub frames_aborted: u64,
    /// Vectorized frames with at least one face
    pub frames_with_faces: u64,
    /// Frames written to the frame store
    pub frames_saved: u64,
    pub embeddings_stored: u64,
    pub count_mismatches: u64,
    pub store_failures: u64,

    /// Batches that dispatched at least one task
    pub batches: u64,

    /// Whether the source ended on a read error instead of end-of-stream
    pub source_error: Option<String>,

    #[serde(serialize_with = "serialize_duration_ms", rename = "elapsed_ms")]
    pub elapsed: Duration,
}

fn serialize_duration_ms<S: serde::Serializer>(
    d: &Duration,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_u64(d.as_millis() as u64)
}

impl RunReport {
    pub fn new(camera_id: CameraId, run_id: Uuid) -> Self {
        Self {
            camera_id,
            run_id,
            started_at: Utc::now(),
            frames_read: 0,
            frames_sampled: 0,
            frames_vectorized: 0,
            frames_failed: 0,
            frames_timed_out: 0,
            frames_aborted: 0,
            frames_with_faces: 0,
            frames_saved: 0,
            embeddings_stored: 0,
            count_mismatches: 0,
            store_failures: 0,
            batches: 0,
            source_error: None,
            elapsed: Duration::ZERO,
        }
    }

    /// Fold one drained batch into the run totals
    pub fn absorb(&mut self, batch: &BatchStats) {
        self.batches += 1;
        self.frames_sampled += batch.dispatched as u64;
        self.frames_vectorized += batch.vectorized as u64;
        self.frames_failed += batch.failed as u64;
        self.frames_timed_out += batch.timed_out as u64;
        self.frames_aborted += batch.aborted as u64;
        self.frames_with_faces += batch.with_faces as u64;
        self.frames_saved += batch.saved as u64;
        self.embeddings_stored += batch.embeddings_stored as u64;
        self.count_mismatches += batch.count_mismatches as u64;
        self.store_failures += batch.store_failures as u64;
    }

    /// True when frames were dispatched but none of them vectorized.
    ///
    /// The run itself still counts as completed; callers that want a hard
    /// failure (the CLI's `--strict`) check this.
    #[must_use]
    pub fn all_vectorizations_failed(&self) -> bool {
        self.frames_sampled > 0 && self.frames_vectorized == 0
    }
}
