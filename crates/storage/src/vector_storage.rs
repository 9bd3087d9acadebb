//! Vector storage for face embeddings
//!
//! Two logical collections are kept:
//! - `face_vectors`: one point per detected face, append-only
//! - `missing_person`: one query vector per registered person, overwritten on re-registration
//!
//! Scores leaving this module are cosine *distances* (`1 - similarity`, lower is
//! closer), whatever the backend reports natively.

use crate::{StorageError, StorageResult};
use godseye_common::{
    BoundingBox, CameraId, EmbeddingMetadata, EmbeddingRecord, FaceDetections, SearchHit,
    Timestamp,
};
use qdrant_client::{
    qdrant::{
        value::Kind, vectors_config::Config, CreateCollectionBuilder, Distance,
        GetPointsBuilder, PointStruct, SearchPointsBuilder, UpsertPointsBuilder, Value,
        VectorParams, VectorsConfig,
    },
    Qdrant,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Qdrant configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QdrantConfig {
    /// Qdrant gRPC URL (e.g., "<http://localhost:6334>")
    pub url: String,

    /// API key (optional, for cloud deployment)
    pub api_key: Option<String>,

    /// Collection holding one point per detected face
    pub face_collection: String,

    /// Collection holding one query vector per missing person
    pub query_collection: String,

    /// Embedding dimension (512 for FaceNet)
    pub vector_dim: u64,
}

impl Default for QdrantConfig {
    fn default() -> Self {
        Self {
            url: std::env::var("QDRANT_URL")
                .unwrap_or_else(|_| "http://localhost:6334".to_string()),
            api_key: std::env::var("QDRANT_API_KEY").ok(),
            face_collection: "face_vectors".to_string(),
            query_collection: "missing_person".to_string(),
            vector_dim: 512,
        }
    }
}

/// Vector store gateway
#[async_trait::async_trait]
pub trait VectorStore: Send + Sync {
    /// Create both collections if they do not exist
    async fn init_collections(&self) -> StorageResult<()>;

    /// Insert face embeddings. Records with an existing id are overwritten.
    async fn store(&self, records: &[EmbeddingRecord]) -> StorageResult<()>;

    /// Register (or replace) the query vector for a person
    async fn upsert_query(&self, person_id: &str, embedding: &[f32]) -> StorageResult<()>;

    /// Fetch a person's registered query vector
    async fn get_query(&self, person_id: &str) -> StorageResult<Vec<f32>>;

    /// Stored faces within `max_distance` of `embedding`, at most `top_k` of them.
    ///
    /// The order of the returned hits is unspecified.
    async fn query_nearest(
        &self,
        embedding: &[f32],
        top_k: usize,
        max_distance: f32,
    ) -> StorageResult<Vec<SearchHit>>;
}

/// Cosine distance (`1 - cos θ`). Zero-length vectors are at distance 1 from everything.
#[must_use]
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Turn one frame's detections into embedding records.
///
/// # Errors
///
/// Returns `CountMismatch` if boxes and embeddings differ in length; no
/// records are produced in that case.
pub fn build_embedding_records(
    camera_id: &CameraId,
    frame_index: u64,
    timestamp: Timestamp,
    faces: &FaceDetections,
) -> StorageResult<Vec<EmbeddingRecord>> {
    if !faces.is_aligned() {
        return Err(StorageError::CountMismatch {
            boxes: faces.boxes.len(),
            embeddings: faces.embeddings.len(),
        });
    }

    Ok(faces
        .iter()
        .enumerate()
        .map(|(face_index, detection)| EmbeddingRecord {
            id: EmbeddingRecord::record_id(camera_id, frame_index, face_index),
            embedding: detection.embedding,
            metadata: EmbeddingMetadata {
                camera_id: camera_id.clone(),
                frame_index,
                bbox: detection.bbox,
                timestamp,
            },
        })
        .collect())
}

/// Stable Qdrant point id for a record id
fn point_id(record_id: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_URL, record_id.as_bytes()).to_string()
}

fn query_point_id(person_id: &str) -> String {
    point_id(&format!("missing_person/{person_id}"))
}

/// Qdrant vector store implementation
pub struct QdrantVectorStore {
    client: Qdrant,
    face_collection: String,
    query_collection: String,
    vector_dim: u64,
}

impl QdrantVectorStore {
    /// Create a new Qdrant client. No request is made until first use.
    pub async fn new(config: QdrantConfig) -> StorageResult<Self> {
        let mut builder = Qdrant::from_url(&config.url);
        if let Some(api_key) = &config.api_key {
            builder = builder.api_key(api_key.clone());
        }
        let client = builder
            .build()
            .map_err(|e| StorageError::QdrantError(e.to_string()))?;

        Ok(Self {
            client,
            face_collection: config.face_collection,
            query_collection: config.query_collection,
            vector_dim: config.vector_dim,
        })
    }

    async fn ensure_collection(&self, name: &str) -> StorageResult<()> {
        let collections = self
            .client
            .list_collections()
            .await
            .map_err(|e| StorageError::QdrantError(e.to_string()))?;

        if collections.collections.iter().any(|c| c.name == name) {
            return Ok(());
        }

        self.client
            .create_collection(
                CreateCollectionBuilder::new(name).vectors_config(VectorsConfig {
                    config: Some(Config::Params(VectorParams {
                        size: self.vector_dim,
                        distance: Distance::Cosine.into(),
                        ..Default::default()
                    })),
                }),
            )
            .await
            .map_err(|e| StorageError::QdrantError(e.to_string()))?;

        info!(collection = name, dim = self.vector_dim, "Created Qdrant collection");
        Ok(())
    }

    fn face_payload(record: &EmbeddingRecord) -> HashMap<String, Value> {
        let meta = &record.metadata;
        let mut payload = HashMap::with_capacity(9);
        payload.insert("record_id".to_string(), record.id.clone().into());
        payload.insert("camera_id".to_string(), meta.camera_id.to_string().into());
        payload.insert("frame_index".to_string(), (meta.frame_index as i64).into());
        payload.insert("x1".to_string(), f64::from(meta.bbox.x1).into());
        payload.insert("y1".to_string(), f64::from(meta.bbox.y1).into());
        payload.insert("x2".to_string(), f64::from(meta.bbox.x2).into());
        payload.insert("y2".to_string(), f64::from(meta.bbox.y2).into());
        payload.insert("timestamp".to_string(), meta.timestamp.to_string().into());
        payload.insert(
            "timestamp_ms".to_string(),
            (meta.timestamp.as_millis() as i64).into(),
        );
        payload
    }

    #[allow(clippy::cast_possible_truncation)]
    fn hit_from_payload(payload: &HashMap<String, Value>, distance: f32) -> Option<SearchHit> {
        let camera_id = CameraId::new(payload_str(payload, "camera_id")?).ok()?;
        let frame_index = u64::try_from(payload_i64(payload, "frame_index")?).ok()?;
        let timestamp = match payload_i64(payload, "timestamp_ms") {
            Some(ms) => Timestamp::from_millis(u64::try_from(ms).ok()?),
            None => payload_str(payload, "timestamp")?.parse().ok()?,
        };
        let bbox = BoundingBox::new(
            payload_f64(payload, "x1")? as f32,
            payload_f64(payload, "y1")? as f32,
            payload_f64(payload, "x2")? as f32,
            payload_f64(payload, "y2")? as f32,
        );

        Some(SearchHit {
            camera_id,
            frame_index,
            timestamp,
            score: distance,
            bbox,
        })
    }
}

fn payload_str<'a>(payload: &'a HashMap<String, Value>, key: &str) -> Option<&'a str> {
    match payload.get(key)?.kind.as_ref()? {
        Kind::StringValue(s) => Some(s),
        _ => None,
    }
}

fn payload_i64(payload: &HashMap<String, Value>, key: &str) -> Option<i64> {
    match payload.get(key)?.kind.as_ref()? {
        Kind::IntegerValue(i) => Some(*i),
        _ => None,
    }
}

#[allow(clippy::cast_precision_loss)]
fn payload_f64(payload: &HashMap<String, Value>, key: &str) -> Option<f64> {
    match payload.get(key)?.kind.as_ref()? {
        Kind::DoubleValue(d) => Some(*d),
        Kind::IntegerValue(i) => Some(*i as f64),
        _ => None,
    }
}

#[async_trait::async_trait]
impl VectorStore for QdrantVectorStore {
    async fn init_collections(&self) -> StorageResult<()> {
        self.ensure_collection(&self.face_collection).await?;
        self.ensure_collection(&self.query_collection).await
    }

    async fn store(&self, records: &[EmbeddingRecord]) -> StorageResult<()> {
        if records.is_empty() {
            return Ok(());
        }

        let points: Vec<PointStruct> = records
            .iter()
            .map(|record| {
                PointStruct::new(
                    point_id(&record.id),
                    record.embedding.clone(),
                    Self::face_payload(record),
                )
            })
            .collect();

        self.client
            .upsert_points(UpsertPointsBuilder::new(&self.face_collection, points).wait(true))
            .await
            .map_err(|e| StorageError::QdrantError(e.to_string()))?;

        debug!(records = records.len(), "Stored face embeddings");
        Ok(())
    }

    async fn upsert_query(&self, person_id: &str, embedding: &[f32]) -> StorageResult<()> {
        let mut payload: HashMap<String, Value> = HashMap::with_capacity(1);
        payload.insert("person_id".to_string(), person_id.to_string().into());

        let point = PointStruct::new(query_point_id(person_id), embedding.to_vec(), payload);

        self.client
            .upsert_points(
                UpsertPointsBuilder::new(&self.query_collection, vec![point]).wait(true),
            )
            .await
            .map_err(|e| StorageError::QdrantError(e.to_string()))?;

        Ok(())
    }

    #[allow(deprecated)]
    async fn get_query(&self, person_id: &str) -> StorageResult<Vec<f32>> {
        let points = self
            .client
            .get_points(
                GetPointsBuilder::new(&self.query_collection, vec![query_point_id(person_id).into()])
                    .with_vectors(true),
            )
            .await
            .map_err(|e| StorageError::QdrantError(e.to_string()))?;

        let point = points
            .result
            .first()
            .ok_or_else(|| StorageError::NotFound(format!("query vector for {person_id}")))?;

        point
            .vectors
            .as_ref()
            .and_then(|v| v.vectors_options.as_ref())
            .and_then(|opts| match opts {
                qdrant_client::qdrant::vectors_output::VectorsOptions::Vector(v) => {
                    Some(v.data.clone())
                }
                _ => None,
            })
            .ok_or_else(|| StorageError::QdrantError("No vector data found".to_string()))
    }

    async fn query_nearest(
        &self,
        embedding: &[f32],
        top_k: usize,
        max_distance: f32,
    ) -> StorageResult<Vec<SearchHit>> {
        let search = SearchPointsBuilder::new(&self.face_collection, embedding.to_vec(), top_k as u64)
            .with_payload(true)
            .score_threshold(1.0 - max_distance);

        let response = self
            .client
            .search_points(search)
            .await
            .map_err(|e| StorageError::QdrantError(e.to_string()))?;

        let mut hits = Vec::with_capacity(response.result.len());
        for point in response.result {
            let distance = 1.0 - point.score;
            if distance > max_distance {
                continue;
            }
            match Self::hit_from_payload(&point.payload, distance) {
                Some(hit) => hits.push(hit),
                None => warn!(point_id = ?point.id, "Skipping face point with incomplete payload"),
            }
        }

        Ok(hits)
    }
}

/// In-process vector store with brute-force cosine search
#[derive(Default)]
pub struct InMemoryVectorStore {
    faces: RwLock<BTreeMap<String, EmbeddingRecord>>,
    queries: RwLock<HashMap<String, Vec<f32>>>,
    unavailable: AtomicBool,
    store_calls: AtomicUsize,
}

impl InMemoryVectorStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail as if the backend were down
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of `store` calls received, including failed ones
    pub fn store_calls(&self) -> usize {
        self.store_calls.load(Ordering::SeqCst)
    }

    /// Number of distinct face records held
    pub async fn len(&self) -> usize {
        self.faces.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.faces.read().await.is_empty()
    }

    /// All face records, ordered by record id
    pub async fn records(&self) -> Vec<EmbeddingRecord> {
        self.faces.read().await.values().cloned().collect()
    }

    fn check_available(&self) -> StorageResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StorageError::IoError(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "vector store unavailable",
            )))
        } else {
            Ok(())
        }
    }
}

#[async_trait::async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn init_collections(&self) -> StorageResult<()> {
        self.check_available()
    }

    async fn store(&self, records: &[EmbeddingRecord]) -> StorageResult<()> {
        self.store_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;

        let mut faces = self.faces.write().await;
        for record in records {
            faces.insert(record.id.clone(), record.clone());
        }
        Ok(())
    }

    async fn upsert_query(&self, person_id: &str, embedding: &[f32]) -> StorageResult<()> {
        self.check_available()?;
        self.queries
            .write()
            .await
            .insert(person_id.to_string(), embedding.to_vec());
        Ok(())
    }

    async fn get_query(&self, person_id: &str) -> StorageResult<Vec<f32>> {
        self.check_available()?;
        self.queries
            .read()
            .await
            .get(person_id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("query vector for {person_id}")))
    }

    async fn query_nearest(
        &self,
        embedding: &[f32],
        top_k: usize,
        max_distance: f32,
    ) -> StorageResult<Vec<SearchHit>> {
        self.check_available()?;

        let faces = self.faces.read().await;
        let mut hits: Vec<SearchHit> = faces
            .values()
            .filter(|record| record.embedding.len() == embedding.len())
            .filter_map(|record| {
                let distance = cosine_distance(embedding, &record.embedding);
                (distance <= max_distance).then(|| SearchHit {
                    camera_id: record.metadata.camera_id.clone(),
                    frame_index: record.metadata.frame_index,
                    timestamp: record.metadata.timestamp,
                    score: distance,
                    bbox: record.metadata.bbox,
                })
            })
            .collect();

        hits.sort_by(|a, b| a.score.total_cmp(&b.score));
        hits.truncate(top_k);
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn faces(n: usize) -> FaceDetections {
        FaceDetections {
            boxes: (0..n)
                .map(|i| BoundingBox::new(i as f32, 0.0, i as f32 + 10.0, 10.0))
                .collect(),
            embeddings: (0..n).map(|i| vec![1.0, i as f32]).collect(),
        }
    }

    fn record(camera: &str, frame_index: u64, embedding: Vec<f32>) -> EmbeddingRecord {
        let camera_id = CameraId::new(camera).unwrap();
        EmbeddingRecord {
            id: EmbeddingRecord::record_id(&camera_id, frame_index, 0),
            embedding,
            metadata: EmbeddingMetadata {
                camera_id,
                frame_index,
                bbox: BoundingBox::new(0.0, 0.0, 1.0, 1.0),
                timestamp: Timestamp::from_millis(frame_index * 100),
            },
        }
    }

    #[test]
    fn test_qdrant_config_default() {
        let config = QdrantConfig::default();
        assert_eq!(config.face_collection, "face_vectors");
        assert_eq!(config.query_collection, "missing_person");
        assert_eq!(config.vector_dim, 512);
    }

    #[test]
    fn test_cosine_distance() {
        assert!(cosine_distance(&[1.0, 0.0], &[2.0, 0.0]).abs() < 1e-6);
        assert!((cosine_distance(&[1.0, 0.0], &[0.0, 1.0]) - 1.0).abs() < 1e-6);
        assert!((cosine_distance(&[1.0, 0.0], &[-1.0, 0.0]) - 2.0).abs() < 1e-6);
        assert_eq!(cosine_distance(&[0.0, 0.0], &[1.0, 0.0]), 1.0);
    }

    #[test]
    fn test_point_id_is_stable() {
        assert_eq!(point_id("cam-A/1/0"), point_id("cam-A/1/0"));
        assert_ne!(point_id("cam-A/1/0"), point_id("cam-A/1/1"));
        assert_ne!(query_point_id("cam-A/1/0"), point_id("cam-A/1/0"));
        assert!(Uuid::parse_str(&point_id("x")).is_ok());
    }

    #[test]
    fn test_build_embedding_records() {
        let cam = CameraId::new("cam-A").unwrap();
        let ts = Timestamp::from_millis(3000);
        let records = build_embedding_records(&cam, 90, ts, &faces(2)).unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, "cam-A/90/0");
        assert_eq!(records[1].id, "cam-A/90/1");
        assert_eq!(records[1].metadata.bbox.x1, 1.0);
        assert_eq!(records[1].metadata.timestamp, ts);
        assert_eq!(records[1].embedding, vec![1.0, 1.0]);
    }

    #[test]
    fn test_build_embedding_records_count_mismatch() {
        let cam = CameraId::new("cam-A").unwrap();
        let mut detections = faces(2);
        detections.embeddings.pop();

        let err = build_embedding_records(&cam, 0, Timestamp::default(), &detections).unwrap_err();
        assert!(matches!(
            err,
            StorageError::CountMismatch {
                boxes: 2,
                embeddings: 1
            }
        ));
    }

    #[test]
    fn test_hit_from_payload() {
        let rec = record("cam-B", 42, vec![1.0]);
        let payload = QdrantVectorStore::face_payload(&rec);
        let hit = QdrantVectorStore::hit_from_payload(&payload, 0.25).unwrap();
        assert_eq!(hit.camera_id.as_str(), "cam-B");
        assert_eq!(hit.frame_index, 42);
        assert_eq!(hit.timestamp, Timestamp::from_millis(4200));
        assert_eq!(hit.bbox, BoundingBox::new(0.0, 0.0, 1.0, 1.0));
        assert_eq!(hit.score, 0.25);

        let mut incomplete = payload.clone();
        incomplete.remove("camera_id");
        assert!(QdrantVectorStore::hit_from_payload(&incomplete, 0.1).is_none());
    }

    #[tokio::test]
    async fn test_in_memory_store_is_upsert() {
        let store = InMemoryVectorStore::new();
        let rec = record("cam-A", 1, vec![1.0, 0.0]);

        store.store(&[rec.clone()]).await.unwrap();
        store.store(&[rec]).await.unwrap();

        assert_eq!(store.len().await, 1);
        assert_eq!(store.store_calls(), 2);
    }

    #[tokio::test]
    async fn test_in_memory_query_respects_threshold_and_top_k() {
        let store = InMemoryVectorStore::new();
        store
            .store(&[
                record("cam-A", 1, vec![1.0, 0.0]),
                record("cam-A", 2, vec![1.0, 0.1]),
                record("cam-B", 3, vec![0.0, 1.0]),
                record("cam-B", 4, vec![-1.0, 0.0]),
            ])
            .await
            .unwrap();

        let hits = store.query_nearest(&[1.0, 0.0], 10, 0.5).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|h| h.score <= 0.5));

        let hits = store.query_nearest(&[1.0, 0.0], 1, 0.5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].frame_index, 1);

        let hits = store.query_nearest(&[1.0, 0.0], 10, 2.0).await.unwrap();
        assert_eq!(hits.len(), 4);
    }

    #[tokio::test]
    async fn test_in_memory_queries_overwrite() {
        let store = InMemoryVectorStore::new();
        assert!(matches!(
            store.get_query("p1").await,
            Err(StorageError::NotFound(_))
        ));

        store.upsert_query("p1", &[1.0, 2.0]).await.unwrap();
        store.upsert_query("p1", &[3.0, 4.0]).await.unwrap();
        assert_eq!(store.get_query("p1").await.unwrap(), vec![3.0, 4.0]);
    }

    #[tokio::test]
    async fn test_in_memory_unavailable() {
        let store = InMemoryVectorStore::new();
        store.set_unavailable(true);

        let err = store.store(&[record("cam-A", 1, vec![1.0])]).await.unwrap_err();
        assert!(err.is_unavailable());
        assert!(store.is_empty().await);

        store.set_unavailable(false);
        store.store(&[record("cam-A", 1, vec![1.0])]).await.unwrap();
        assert_eq!(store.len().await, 1);
    }
}
