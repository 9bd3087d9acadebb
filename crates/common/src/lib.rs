/// Common types shared by the ingestion pipeline and the search path
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Processing errors
#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error("Video source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Vectorization failed: {0}")]
    VectorizationFailure(String),

    #[error("Processing timeout after {0}ms")]
    Timeout(u64),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid query embedding: {0}")]
    InvalidQuery(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Image processing error: {0}")]
    ImageError(String),

    #[error("Other error: {0}")]
    Other(String),
}

impl From<image::ImageError> for ProcessingError {
    fn from(err: image::ImageError) -> Self {
        ProcessingError::ImageError(err.to_string())
    }
}

/// Result type for processing operations
pub type Result<T> = std::result::Result<T, ProcessingError>;

/// Position of a frame within its stream, in milliseconds.
///
/// Rendered as `H:MM:SS.mmm`. Ordering is numeric, so hour values with
/// more than one digit still sort correctly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(u64);

impl Timestamp {
    #[must_use]
    pub fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Timestamp of `frame_index` in a stream running at `fps`, rounded to the millisecond
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn from_frame(frame_index: u64, fps: f64) -> Self {
        if !(fps.is_finite() && fps > 0.0) {
            return Self(0);
        }
        let seconds = frame_index as f64 / fps;
        Self((seconds * 1000.0).round() as u64)
    }

    #[must_use]
    pub fn as_millis(&self) -> u64 {
        self.0
    }

    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_secs_f64(&self) -> f64 {
        self.0 as f64 / 1000.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hours = self.0 / 3_600_000;
        let minutes = (self.0 / 60_000) % 60;
        let seconds = (self.0 / 1000) % 60;
        let millis = self.0 % 1000;
        write!(f, "{hours}:{minutes:02}:{seconds:02}.{millis:03}")
    }
}

impl FromStr for Timestamp {
    type Err = ProcessingError;

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || ProcessingError::InvalidInput(format!("Invalid timestamp: {s:?}"));

        let mut parts = s.trim().split(':');
        let (Some(h), Some(m), Some(sec), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid());
        };

        let hours: u64 = h.parse().map_err(|_| invalid())?;
        let minutes: u64 = m.parse().map_err(|_| invalid())?;
        let seconds: f64 = sec.parse().map_err(|_| invalid())?;
        if minutes >= 60 || !(0.0..60.0).contains(&seconds) {
            return Err(invalid());
        }

        let millis = (seconds * 1000.0).round() as u64;
        hours
            .checked_mul(3_600_000)
            .and_then(|ms| ms.checked_add(minutes * 60_000 + millis))
            .map(Self)
            .ok_or_else(|| {
                ProcessingError::InvalidInput(format!("Timestamp out of range: {s:?}"))
            })
    }
}

impl Serialize for Timestamp {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Identifier of one camera (one ingested video stream).
///
/// Used as a directory name and object-key segment, so it is restricted to
/// ASCII alphanumerics plus `-`, `_` and `.`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CameraId(String);

impl CameraId {
    /// Validate a caller-supplied camera id
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        let valid = !id.is_empty()
            && id != "."
            && id != ".."
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if valid {
            Ok(Self(id))
        } else {
            Err(ProcessingError::InvalidInput(format!(
                "Invalid camera id: {id:?}"
            )))
        }
    }

    /// Fresh random camera id (`cam-<uuid>`)
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("cam-{}", Uuid::new_v4()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CameraId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for CameraId {
    type Error = ProcessingError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<CameraId> for String {
    fn from(id: CameraId) -> Self {
        id.0
    }
}

impl AsRef<str> for CameraId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Face bounding box in pixel coordinates, serialized as `[x1, y1, x2, y2]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f32; 4]", into = "[f32; 4]")]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    #[must_use]
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Grow the box by `padding` on the bottom-right corner only
    #[must_use]
    pub fn padded(self, padding: f32) -> Self {
        Self {
            x2: self.x2 + padding,
            y2: self.y2 + padding,
            ..self
        }
    }

    #[must_use]
    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    #[must_use]
    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }
}

impl From<[f32; 4]> for BoundingBox {
    fn from([x1, y1, x2, y2]: [f32; 4]) -> Self {
        Self { x1, y1, x2, y2 }
    }
}

impl From<BoundingBox> for [f32; 4] {
    fn from(b: BoundingBox) -> Self {
        [b.x1, b.y1, b.x2, b.y2]
    }
}

/// A sampled frame waiting for vectorization. Owned by exactly one task.
#[derive(Debug, Clone)]
pub struct FrameTask {
    pub camera_id: CameraId,
    pub frame_index: u64,
    pub timestamp: Timestamp,
    /// Encoded still image (JPEG unless the source says otherwise)
    pub image: Vec<u8>,
}

/// One detected face
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    #[serde(rename = "box")]
    pub bbox: BoundingBox,
    pub embedding: Vec<f32>,
}

/// Raw detection-service output for one image.
///
/// `boxes[i]` belongs to `embeddings[i]`. The service promises equal
/// lengths; consumers that persist must check [`FaceDetections::is_aligned`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FaceDetections {
    pub boxes: Vec<BoundingBox>,
    pub embeddings: Vec<Vec<f32>>,
}

impl FaceDetections {
    #[must_use]
    pub fn is_aligned(&self) -> bool {
        self.boxes.len() == self.embeddings.len()
    }

    /// Number of faces (the larger side when misaligned)
    #[must_use]
    pub fn face_count(&self) -> usize {
        self.boxes.len().max(self.embeddings.len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.face_count() == 0
    }

    /// Index-aligned detections; only meaningful when aligned
    pub fn iter(&self) -> impl Iterator<Item = Detection> + '_ {
        self.boxes
            .iter()
            .zip(&self.embeddings)
            .map(|(bbox, embedding)| Detection {
                bbox: *bbox,
                embedding: embedding.clone(),
            })
    }
}

/// A frame written to durable storage. Unique per `(camera_id, frame_index)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedFrame {
    pub camera_id: CameraId,
    pub frame_index: u64,
    pub timestamp: Timestamp,
    /// Path or object key of the stored image
    pub file_ref: String,
}

/// Metadata attached to every stored face embedding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingMetadata {
    pub camera_id: CameraId,
    pub frame_index: u64,
    #[serde(rename = "box")]
    pub bbox: BoundingBox,
    pub timestamp: Timestamp,
}

/// One face embedding as written to the vector store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    /// `camera_id/frame_index/face_index`
    pub id: String,
    pub embedding: Vec<f32>,
    pub metadata: EmbeddingMetadata,
}

impl EmbeddingRecord {
    /// Deterministic record id, stable across retries of the same frame
    #[must_use]
    pub fn record_id(camera_id: &CameraId, frame_index: u64, face_index: usize) -> String {
        format!("{camera_id}/{frame_index}/{face_index}")
    }
}

/// Query vector registered for a missing person (one per person, overwritable)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissingPersonQuery {
    pub person_id: String,
    pub embedding: Vec<f32>,
}

/// Raw nearest-neighbor hit; `score` is a cosine distance (lower is closer)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub camera_id: CameraId,
    pub frame_index: u64,
    pub timestamp: Timestamp,
    pub score: f32,
    #[serde(rename = "box")]
    pub bbox: BoundingBox,
}

/// A hit placed in its camera's timestamp-ordered sequence for one person
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub person_id: String,
    pub camera_id: CameraId,
    pub frame_index: u64,
    /// Position within this person's sequence on this camera, from 0
    pub missing_frame_index: u32,
    #[serde(rename = "box")]
    pub bbox: BoundingBox,
    pub score: f32,
    pub timestamp: Timestamp,
}
