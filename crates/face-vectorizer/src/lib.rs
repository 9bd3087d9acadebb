//! Face vectorization client
//!
//! Face detection and embedding run in an external detection service. This
//! crate is the boundary adapter: it sends one encoded still image per call and
//! returns the face bounding boxes and embedding vectors found in it.
//!
//! # Endpoints
//! - `POST /vectorize_faces` (multipart `image`, optional `padding`)
//!   → `{"vectors": [[f32, ...]], "boxes": [[x1, y1, x2, y2], ...]}`
//! - `POST /bounding_boxes` (multipart `image`, optional `padding`)
//!   → `{"boxes": [[x1, y1, x2, y2], ...]}`
//!
//! `padding` is added by the service to the `x2`/`y2` corner of each box only.
//!
//! # Example
//! ```no_run
//! use godseye_vectorizer::{FaceVectorizer, HttpFaceVectorizer, VectorizerConfig};
//!
//! # async fn run() -> godseye_common::Result<()> {
//! let vectorizer = HttpFaceVectorizer::new(VectorizerConfig::default())?;
//! let image = std::fs::read("frame_0.jpeg")?;
//! let faces = vectorizer.vectorize_faces(&image).await?;
//! println!("{} faces", faces.face_count());
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use godseye_common::{BoundingBox, FaceDetections, ProcessingError, Result};
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Detection service connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorizerConfig {
    /// Base URL of the detection service
    pub base_url: String,
    /// Pixels added to the far corner of every box
    pub padding: Option<u32>,
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for VectorizerConfig {
    fn default() -> Self {
        Self {
            base_url: std::env::var("GODSEYE_DETECTOR_URL")
                .unwrap_or_else(|_| "http://localhost:8001".to_string()),
            padding: std::env::var("GODSEYE_DETECTOR_PADDING")
                .ok()
                .and_then(|s| s.parse().ok()),
            timeout_secs: std::env::var("GODSEYE_DETECTOR_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(30),
        }
    }
}

/// Turns one encoded image into face boxes and embeddings
#[async_trait]
pub trait FaceVectorizer: Send + Sync {
    /// Detect every face in `image` and embed it
    async fn vectorize_faces(&self, image: &[u8]) -> Result<FaceDetections>;

    /// Detect faces without embedding them
    async fn bounding_boxes(&self, image: &[u8]) -> Result<Vec<BoundingBox>> {
        Ok(self.vectorize_faces(image).await?.boxes)
    }
}

#[derive(Debug, Deserialize)]
struct VectorizeResponse {
    #[serde(default)]
    vectors: Vec<Vec<f32>>,
    #[serde(default)]
    boxes: Option<Vec<BoundingBox>>,
}

#[derive(Debug, Deserialize)]
struct BoundingBoxesResponse {
    #[serde(default)]
    boxes: Vec<BoundingBox>,
}

/// Parse a `/vectorize_faces` response body.
///
/// A body without `boxes` yields no boxes at all; with non-empty `vectors`
/// that is a count mismatch, left for the store to reject.
pub fn parse_vectorize_response(body: &[u8]) -> Result<FaceDetections> {
    let response: VectorizeResponse = serde_json::from_slice(body).map_err(|e| {
        ProcessingError::VectorizationFailure(format!("Malformed vectorize response: {e}"))
    })?;

    Ok(FaceDetections {
        boxes: response.boxes.unwrap_or_default(),
        embeddings: response.vectors,
    })
}

/// Parse a `/bounding_boxes` response body
pub fn parse_bounding_boxes_response(body: &[u8]) -> Result<Vec<BoundingBox>> {
    let response: BoundingBoxesResponse = serde_json::from_slice(body).map_err(|e| {
        ProcessingError::VectorizationFailure(format!("Malformed bounding box response: {e}"))
    })?;
    Ok(response.boxes)
}

/// `FaceVectorizer` backed by the detection service's HTTP API
#[derive(Debug, Clone)]
pub struct HttpFaceVectorizer {
    client: reqwest::Client,
    config: VectorizerConfig,
}

impl HttpFaceVectorizer {
    /// # Errors
    ///
    /// Returns `VectorizationFailure` if the HTTP client cannot be built
    pub fn new(config: VectorizerConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| {
                ProcessingError::VectorizationFailure(format!("Failed to create HTTP client: {e}"))
            })?;

        Ok(Self { client, config })
    }

    #[must_use]
    pub fn config(&self) -> &VectorizerConfig {
        &self.config
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn form(&self, image: &[u8]) -> Result<Form> {
        let part = Part::bytes(image.to_vec())
            .file_name("image.jpg")
            .mime_str("image/jpeg")
            .map_err(|e| ProcessingError::VectorizationFailure(e.to_string()))?;

        let mut form = Form::new().part("image", part);
        if let Some(padding) = self.config.padding {
            form = form.text("padding", padding.to_string());
        }
        Ok(form)
    }

    async fn post(&self, path: &str, image: &[u8]) -> Result<Vec<u8>> {
        let url = self.endpoint(path);
        let failure = |e: reqwest::Error| {
            ProcessingError::VectorizationFailure(format!("POST {url} failed: {e}"))
        };

        let response = self
            .client
            .post(&url)
            .multipart(self.form(image)?)
            .send()
            .await
            .map_err(failure)?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProcessingError::VectorizationFailure(format!(
                "POST {url} returned HTTP {status}"
            )));
        }

        let body = response.bytes().await.map_err(failure)?;
        debug!(url = %url, bytes = body.len(), "Detection service responded");
        Ok(body.to_vec())
    }
}

#[async_trait]
impl FaceVectorizer for HttpFaceVectorizer {
    async fn vectorize_faces(&self, image: &[u8]) -> Result<FaceDetections> {
        let body = self.post("vectorize_faces", image).await?;
        parse_vectorize_response(&body)
    }

    async fn bounding_boxes(&self, image: &[u8]) -> Result<Vec<BoundingBox>> {
        let body = self.post("bounding_boxes", image).await?;
        parse_bounding_boxes_response(&body)
    }
}
