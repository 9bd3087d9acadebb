//! Missing-person search service

use crate::annotate::annotate_frame;
use crate::matcher::assign_matches;
use godseye_common::{CameraId, MatchRecord, ProcessingError};
use godseye_storage::{FrameStore, MatchStorage, StorageError, VectorStore};
use godseye_vectorizer::FaceVectorizer;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Search errors
#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Storage(StorageError),

    #[error("Vectorization error: {0}")]
    Vectorization(#[from] ProcessingError),

    #[error("Frame image error: {0}")]
    Image(String),

    #[error("Match position {position} on camera {camera_id} exceeds the u32 sequence range")]
    SequenceOverflow { camera_id: CameraId, position: usize },
}

impl From<StorageError> for SearchError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound(what) => Self::NotFound(what),
            other => Self::Storage(other),
        }
    }
}

pub type SearchResult<T> = std::result::Result<T, SearchError>;

/// Nearest-neighbor parameters for match computation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Maximum raw hits requested from the vector store
    pub top_k: usize,

    /// Cosine distance cutoff (lower is closer)
    pub max_distance: f32,

    /// Required query length; `None` accepts any non-empty vector
    pub vector_dim: Option<usize>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            top_k: std::env::var("GODSEYE_SEARCH_TOP_K")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(2000),
            max_distance: std::env::var("GODSEYE_SEARCH_MAX_DISTANCE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(0.75),
            vector_dim: None,
        }
    }
}

/// One step of a person's per-camera sequence, with what a client needs to
/// render prev/next controls
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameView {
    pub record: MatchRecord,
    /// Length of the sequence on `record.camera_id`
    pub total: u32,
    /// Every camera the person appears on, ascending
    pub cameras: Vec<CameraId>,
}

/// Registers missing-person queries and maintains their match sequences
pub struct MissingPersonSearch {
    config: SearchConfig,
    vectors: Arc<dyn VectorStore>,
    matches: Arc<dyn MatchStorage>,
    frames: Option<Arc<dyn FrameStore>>,
}

impl MissingPersonSearch {
    pub fn new(
        config: SearchConfig,
        vectors: Arc<dyn VectorStore>,
        matches: Arc<dyn MatchStorage>,
    ) -> Self {
        Self {
            config,
            vectors,
            matches,
            frames: None,
        }
    }

    /// Attach the frame store so matched frames can be fetched
    #[must_use]
    pub fn with_frame_store(mut self, frames: Arc<dyn FrameStore>) -> Self {
        self.frames = Some(frames);
        self
    }

    #[must_use]
    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    fn validate(&self, person_id: &str, embedding: &[f32]) -> SearchResult<()> {
        if person_id.trim().is_empty() {
            return Err(SearchError::InvalidQuery("person id is empty".to_string()));
        }
        if embedding.is_empty() {
            return Err(SearchError::InvalidQuery("embedding is empty".to_string()));
        }
        if let Some(position) = embedding.iter().position(|v| !v.is_finite()) {
            return Err(SearchError::InvalidQuery(format!(
                "embedding component {position} is not finite"
            )));
        }
        if let Some(dim) = self.config.vector_dim {
            if embedding.len() != dim {
                return Err(SearchError::InvalidQuery(format!(
                    "embedding has {} components, expected {dim}",
                    embedding.len()
                )));
            }
        }
        Ok(())
    }

    /// Register (or replace) a person's query vector and compute their matches.
    ///
    /// An empty match list is a valid result.
    ///
    /// # Errors
    ///
    /// Returns `InvalidQuery` for a malformed embedding, or a storage error if
    /// the vector or match store fails
    pub async fn register(
        &self,
        person_id: &str,
        embedding: &[f32],
    ) -> SearchResult<Vec<MatchRecord>> {
        self.validate(person_id, embedding)?;
        self.vectors.upsert_query(person_id, embedding).await?;
        info!(person_id, dim = embedding.len(), "Registered missing person");
        self.compute(person_id, embedding).await
    }

    /// Register a person from a photo, using the first face found in it.
    ///
    /// # Errors
    ///
    /// Returns `InvalidQuery` if the photo contains no face, or the underlying
    /// vectorization or storage error
    pub async fn register_photo(
        &self,
        person_id: &str,
        photo: &[u8],
        vectorizer: &dyn FaceVectorizer,
    ) -> SearchResult<Vec<MatchRecord>> {
        let detections = vectorizer.vectorize_faces(photo).await?;
        let embedding = detections
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| SearchError::InvalidQuery("no face found in photo".to_string()))?;
        self.register(person_id, &embedding).await
    }

    /// Recompute matches from the stored query vector, picking up frames
    /// ingested since the person was registered
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the person was never registered
    pub async fn refresh(&self, person_id: &str) -> SearchResult<Vec<MatchRecord>> {
        let embedding = self.vectors.get_query(person_id).await?;
        self.compute(person_id, &embedding).await
    }

    async fn compute(&self, person_id: &str, embedding: &[f32]) -> SearchResult<Vec<MatchRecord>> {
        let hits = self
            .vectors
            .query_nearest(embedding, self.config.top_k, self.config.max_distance)
            .await?;
        debug!(person_id, hits = hits.len(), "Nearest-neighbor query returned");

        let records = assign_matches(person_id, hits)?;
        self.matches.replace_matches(person_id, &records).await?;

        info!(
            person_id,
            matches = records.len(),
            max_distance = self.config.max_distance,
            "Match sequences updated"
        );
        Ok(records)
    }

    /// Look up one position of a person's sequence.
    ///
    /// Without `camera_id` the first camera (ascending) is used.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown person, camera or position
    pub async fn frame(
        &self,
        person_id: &str,
        camera_id: Option<&CameraId>,
        missing_frame_index: u32,
    ) -> SearchResult<FrameView> {
        let cameras = self.matches.camera_ids(person_id).await?;
        let camera_id = match camera_id {
            Some(id) if cameras.contains(id) => id.clone(),
            Some(id) => {
                return Err(SearchError::NotFound(format!(
                    "no matches for {person_id} on camera {id}"
                )))
            }
            None => cameras
                .first()
                .cloned()
                .ok_or_else(|| SearchError::NotFound(format!("no matches for {person_id}")))?,
        };

        let total = self.matches.count_matches(person_id, &camera_id).await?;
        let record = self
            .matches
            .get_match(person_id, &camera_id, missing_frame_index)
            .await?;

        Ok(FrameView {
            record,
            total,
            cameras,
        })
    }

    /// Fetch the frame behind a match with the matched face outlined, as JPEG.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no frame store is attached or the frame is missing,
    /// or `Image` if the stored frame cannot be decoded
    pub async fn frame_image(&self, record: &MatchRecord) -> SearchResult<Vec<u8>> {
        let stored = self.frame_image_raw(record).await?;
        annotate_frame(&stored, &record.bbox).map_err(|e| {
            SearchError::Image(format!(
                "{} frame {}: {e}",
                record.camera_id, record.frame_index
            ))
        })
    }

    /// Fetch the stored frame behind a match unchanged.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no frame store is attached or the frame is missing
    pub async fn frame_image_raw(&self, record: &MatchRecord) -> SearchResult<Vec<u8>> {
        let frames = self
            .frames
            .as_ref()
            .ok_or_else(|| SearchError::NotFound("frame store not configured".to_string()))?;
        Ok(frames
            .retrieve_frame(&record.camera_id, record.frame_index)
            .await?)
    }
}
