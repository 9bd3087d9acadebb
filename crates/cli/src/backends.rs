//! Store and client construction from configuration

use crate::config::{Config, FrameBackend};
use anyhow::{Context, Result};
use godseye_search::MissingPersonSearch;
use godseye_storage::{
    FrameStore, LocalFrameStore, MatchStorage, PostgresMatchStorage, QdrantVectorStore,
    S3FrameStore, VectorStore,
};
use godseye_vectorizer::HttpFaceVectorizer;
use std::sync::Arc;
use tracing::debug;

pub fn vectorizer(config: &Config) -> Result<Arc<HttpFaceVectorizer>> {
    let client = HttpFaceVectorizer::new(config.detector.clone())
        .context("Failed to create detection service client")?;
    Ok(Arc::new(client))
}

pub async fn frame_store(config: &Config) -> Result<Arc<dyn FrameStore>> {
    match config.frames.backend {
        FrameBackend::Local => {
            debug!(root = %config.frames.local.root.display(), "Using local frame store");
            Ok(Arc::new(LocalFrameStore::new(config.frames.local.clone())))
        }
        FrameBackend::S3 => {
            debug!(bucket = %config.s3.bucket, "Using S3 frame store");
            let store = S3FrameStore::new(config.s3.clone())
                .await
                .context("Failed to create S3 frame store")?;
            Ok(Arc::new(store))
        }
    }
}

pub async fn vector_store(config: &Config) -> Result<Arc<dyn VectorStore>> {
    let store = QdrantVectorStore::new(config.qdrant.clone())
        .await
        .with_context(|| format!("Failed to connect to Qdrant at {}", config.qdrant.url))?;
    store
        .init_collections()
        .await
        .context("Failed to initialize Qdrant collections")?;
    Ok(Arc::new(store))
}

pub async fn match_storage(config: &Config) -> Result<Arc<dyn MatchStorage>> {
    let storage = PostgresMatchStorage::new(config.postgres.clone())
        .await
        .with_context(|| {
            format!(
                "Failed to connect to PostgreSQL at {}:{}",
                config.postgres.host, config.postgres.port
            )
        })?;
    storage
        .init_schema()
        .await
        .context("Failed to initialize match schema")?;
    Ok(Arc::new(storage))
}

/// Search service over the configured stores
pub async fn search(config: &Config) -> Result<MissingPersonSearch> {
    let vectors = vector_store(config).await?;
    let matches = match_storage(config).await?;
    let frames = frame_store(config).await?;
    Ok(MissingPersonSearch::new(config.search(), vectors, matches).with_frame_store(frames))
}
