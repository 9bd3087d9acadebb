//! Storage layer for the face index
//!
//! This module provides interfaces and implementations for everything the
//! pipeline and the search path persist:
//! - **Vector store (Qdrant)**: face embeddings and missing-person query vectors
//! - **Frame store (local disk or S3/MinIO)**: frames that contain at least one face
//! - **Match store (`PostgreSQL`)**: per-camera appearance sequences of a missing person
//!
//! Every backend also has an in-memory implementation with the same semantics,
//! used by tests and single-process runs.
//!
//! # Example
//!
//! ```rust,no_run
//! use godseye_storage::{StorageConfig, QdrantVectorStore, VectorStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = StorageConfig::default();
//!     let store = QdrantVectorStore::new(config.qdrant).await?;
//!     store.init_collections().await?;
//!
//!     let query = vec![0.0_f32; 512];
//!     let hits = store.query_nearest(&query, 2000, 0.75).await?;
//!     println!("{} hits", hits.len());
//!     Ok(())
//! }
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod frame_storage;
pub mod match_storage;
pub mod vector_storage;

pub use frame_storage::{FrameStore, LocalFrameConfig, LocalFrameStore, S3Config, S3FrameStore};
pub use match_storage::{InMemoryMatchStorage, MatchStorage, PostgresConfig, PostgresMatchStorage};
pub use vector_storage::{
    build_embedding_records, cosine_distance, InMemoryVectorStore, QdrantConfig,
    QdrantVectorStore, VectorStore,
};

/// Storage layer errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("S3 error: {0}")]
    S3Error(String),

    #[error("Qdrant error: {0}")]
    QdrantError(String),

    #[error("PostgreSQL error: {0}")]
    PostgresError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Box/embedding count mismatch: {boxes} boxes, {embeddings} embeddings")]
    CountMismatch { boxes: usize, embeddings: usize },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(String),
}

impl StorageError {
    /// Transport or backend failure (the store could not be reached or refused
    /// the write), as opposed to a problem with the request itself
    #[must_use]
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            StorageError::S3Error(_)
                | StorageError::QdrantError(_)
                | StorageError::PostgresError(_)
                | StorageError::IoError(_)
        )
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Complete storage configuration for all backends
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StorageConfig {
    /// Local directory for frame files
    #[serde(default)]
    pub frames: LocalFrameConfig,

    /// S3/MinIO configuration for frame files
    #[serde(default)]
    pub s3: S3Config,

    /// Qdrant configuration for embeddings
    #[serde(default)]
    pub qdrant: QdrantConfig,

    /// `PostgreSQL` configuration for match records
    #[serde(default)]
    pub postgres: PostgresConfig,
}
