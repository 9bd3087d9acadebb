//! Per-run identity

use godseye_common::CameraId;
use uuid::Uuid;

/// Identity of one pipeline run.
///
/// Every run gets its own camera id; concurrent runs never share one unless
/// the caller hands the same id to both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunContext {
    /// Camera the frames are stored under
    pub camera_id: CameraId,

    /// Unique id of this run, for log correlation
    pub run_id: Uuid,
}

impl RunContext {
    /// Fresh context with a generated camera id
    pub fn new() -> Self {
        Self::for_camera(CameraId::generate())
    }

    /// Fresh context for a caller-chosen camera id
    pub fn for_camera(camera_id: CameraId) -> Self {
        Self {
            camera_id,
            run_id: Uuid::new_v4(),
        }
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}
