//! Match record storage using `PostgreSQL`
//!
//! Match records are derived data: each registration or refresh replaces the
//! whole set for a person in one transaction, so readers never see a mix of
//! two assignments.

use crate::{StorageError, StorageResult};
use godseye_common::{BoundingBox, CameraId, MatchRecord, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tokio::sync::{Mutex, RwLock};
use tokio_postgres::{Client, NoTls, Row};

/// `PostgreSQL` configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PostgresConfig {
    /// Database host
    pub host: String,

    /// Database port
    pub port: u16,

    /// Database name
    pub database: String,

    /// Database user
    pub user: String,

    /// Database password
    pub password: String,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            host: std::env::var("POSTGRES_HOST").unwrap_or_else(|_| "localhost".to_string()),
            port: std::env::var("POSTGRES_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(5432),
            database: std::env::var("POSTGRES_DB").unwrap_or_else(|_| "godseye".to_string()),
            user: std::env::var("POSTGRES_USER").unwrap_or_else(|_| "postgres".to_string()),
            password: std::env::var("POSTGRES_PASSWORD").unwrap_or_default(),
        }
    }
}

impl PostgresConfig {
    /// Build connection string
    #[must_use]
    pub fn connection_string(&self) -> String {
        format!(
            "host={} port={} dbname={} user={} password={}",
            self.host, self.port, self.database, self.user, self.password
        )
    }
}

/// Persistence for per-camera match sequences
#[async_trait::async_trait]
pub trait MatchStorage: Send + Sync {
    /// Initialize schema (create tables if not exist)
    async fn init_schema(&self) -> StorageResult<()>;

    /// Replace every match record of `person_id` with `records`
    async fn replace_matches(&self, person_id: &str, records: &[MatchRecord])
        -> StorageResult<usize>;

    /// All match records of a person, by camera then sequence position
    async fn matches(&self, person_id: &str) -> StorageResult<Vec<MatchRecord>>;

    /// One entry of a person's sequence on a camera
    async fn get_match(
        &self,
        person_id: &str,
        camera_id: &CameraId,
        missing_frame_index: u32,
    ) -> StorageResult<MatchRecord>;

    /// Length of a person's sequence on a camera
    async fn count_matches(&self, person_id: &str, camera_id: &CameraId) -> StorageResult<u32>;

    /// Cameras the person was seen on, ascending
    async fn camera_ids(&self, person_id: &str) -> StorageResult<Vec<CameraId>>;
}

/// `PostgreSQL` match storage implementation
pub struct PostgresMatchStorage {
    client: Mutex<Client>,
}

impl PostgresMatchStorage {
    /// Connect to `PostgreSQL`
    pub async fn new(config: PostgresConfig) -> StorageResult<Self> {
        let (client, connection) = tokio_postgres::connect(&config.connection_string(), NoTls)
            .await
            .map_err(|e| StorageError::PostgresError(e.to_string()))?;

        // Spawn connection in background
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!("PostgreSQL connection error: {}", e);
            }
        });

        Ok(Self {
            client: Mutex::new(client),
        })
    }
}

fn pg_err(e: tokio_postgres::Error) -> StorageError {
    StorageError::PostgresError(e.to_string())
}

fn to_i64(value: u64, what: &str) -> StorageResult<i64> {
    i64::try_from(value)
        .map_err(|_| StorageError::SerializationError(format!("{what} out of range: {value}")))
}

fn from_row(row: &Row) -> StorageResult<MatchRecord> {
    let decode = |what: &str| StorageError::SerializationError(format!("bad {what} column"));

    let camera_id: String = row.get(1);
    Ok(MatchRecord {
        person_id: row.get(0),
        camera_id: CameraId::new(camera_id)
            .map_err(|e| StorageError::SerializationError(e.to_string()))?,
        frame_index: u64::try_from(row.get::<_, i64>(2)).map_err(|_| decode("frame_index"))?,
        missing_frame_index: u32::try_from(row.get::<_, i32>(3))
            .map_err(|_| decode("missing_frame_index"))?,
        bbox: BoundingBox::new(row.get(4), row.get(5), row.get(6), row.get(7)),
        score: row.get(8),
        timestamp: Timestamp::from_millis(
            u64::try_from(row.get::<_, i64>(9)).map_err(|_| decode("timestamp_ms"))?,
        ),
    })
}

const SELECT_COLUMNS: &str = "SELECT person_id, camera_id, frame_index, missing_frame_index, \
     x1, y1, x2, y2, score, timestamp_ms FROM missing_person_frames";

#[async_trait::async_trait]
impl MatchStorage for PostgresMatchStorage {
    async fn init_schema(&self) -> StorageResult<()> {
        let client = self.client.lock().await;
        client
            .batch_execute(
                r"
                CREATE TABLE IF NOT EXISTS missing_person_frames (
                    person_id TEXT NOT NULL,
                    camera_id TEXT NOT NULL,
                    frame_index BIGINT NOT NULL,
                    missing_frame_index INTEGER NOT NULL,
                    x1 REAL NOT NULL,
                    y1 REAL NOT NULL,
                    x2 REAL NOT NULL,
                    y2 REAL NOT NULL,
                    score REAL NOT NULL,
                    timestamp_ms BIGINT NOT NULL,
                    PRIMARY KEY (person_id, camera_id, missing_frame_index)
                );
                CREATE INDEX IF NOT EXISTS idx_missing_person_frames_person
                    ON missing_person_frames(person_id);
                ",
            )
            .await
            .map_err(pg_err)?;

        tracing::info!("PostgreSQL schema initialized");
        Ok(())
    }

    async fn replace_matches(
        &self,
        person_id: &str,
        records: &[MatchRecord],
    ) -> StorageResult<usize> {
        let mut client = self.client.lock().await;
        let tx = client.transaction().await.map_err(pg_err)?;

        tx.execute(
            "DELETE FROM missing_person_frames WHERE person_id = $1",
            &[&person_id],
        )
        .await
        .map_err(pg_err)?;

        let insert = tx
            .prepare(
                r"
                INSERT INTO missing_person_frames
                (person_id, camera_id, frame_index, missing_frame_index,
                 x1, y1, x2, y2, score, timestamp_ms)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                ",
            )
            .await
            .map_err(pg_err)?;

        for record in records {
            let missing_frame_index = i32::try_from(record.missing_frame_index).map_err(|_| {
                StorageError::SerializationError("missing_frame_index out of range".to_string())
            })?;
            tx.execute(
                &insert,
                &[
                    &person_id,
                    &record.camera_id.as_str(),
                    &to_i64(record.frame_index, "frame_index")?,
                    &missing_frame_index,
                    &record.bbox.x1,
                    &record.bbox.y1,
                    &record.bbox.x2,
                    &record.bbox.y2,
                    &record.score,
                    &to_i64(record.timestamp.as_millis(), "timestamp")?,
                ],
            )
            .await
            .map_err(pg_err)?;
        }

        tx.commit().await.map_err(pg_err)?;
        Ok(records.len())
    }

    async fn matches(&self, person_id: &str) -> StorageResult<Vec<MatchRecord>> {
        let sql = format!(
            "{SELECT_COLUMNS} WHERE person_id = $1 ORDER BY camera_id, missing_frame_index"
        );
        let client = self.client.lock().await;
        let rows = client
            .query(sql.as_str(), &[&person_id])
            .await
            .map_err(pg_err)?;

        rows.iter().map(from_row).collect()
    }

    async fn get_match(
        &self,
        person_id: &str,
        camera_id: &CameraId,
        missing_frame_index: u32,
    ) -> StorageResult<MatchRecord> {
        let index = i32::try_from(missing_frame_index).map_err(|_| {
            StorageError::NotFound(format!("{person_id}/{camera_id}/{missing_frame_index}"))
        })?;

        let sql = format!(
            "{SELECT_COLUMNS} WHERE person_id = $1 AND camera_id = $2 AND missing_frame_index = $3"
        );
        let client = self.client.lock().await;
        let row = client
            .query_opt(sql.as_str(), &[&person_id, &camera_id.as_str(), &index])
            .await
            .map_err(pg_err)?
            .ok_or_else(|| {
                StorageError::NotFound(format!("{person_id}/{camera_id}/{missing_frame_index}"))
            })?;

        from_row(&row)
    }

    async fn count_matches(&self, person_id: &str, camera_id: &CameraId) -> StorageResult<u32> {
        let client = self.client.lock().await;
        let row = client
            .query_one(
                "SELECT COUNT(*) FROM missing_person_frames WHERE person_id = $1 AND camera_id = $2",
                &[&person_id, &camera_id.as_str()],
            )
            .await
            .map_err(pg_err)?;

        u32::try_from(row.get::<_, i64>(0))
            .map_err(|_| StorageError::SerializationError("match count out of range".to_string()))
    }

    async fn camera_ids(&self, person_id: &str) -> StorageResult<Vec<CameraId>> {
        let client = self.client.lock().await;
        let rows = client
            .query(
                "SELECT DISTINCT camera_id FROM missing_person_frames WHERE person_id = $1",
                &[&person_id],
            )
            .await
            .map_err(pg_err)?;

        // Sorted here rather than in SQL so ordering does not depend on collation
        let cameras = rows
            .iter()
            .map(|row| {
                CameraId::new(row.get::<_, String>(0))
                    .map_err(|e| StorageError::SerializationError(e.to_string()))
            })
            .collect::<StorageResult<BTreeSet<_>>>()?;
        Ok(cameras.into_iter().collect())
    }
}

/// In-process match storage
#[derive(Debug, Default)]
pub struct InMemoryMatchStorage {
    records: RwLock<HashMap<String, Vec<MatchRecord>>>,
}

impl InMemoryMatchStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl MatchStorage for InMemoryMatchStorage {
    async fn init_schema(&self) -> StorageResult<()> {
        Ok(())
    }

    async fn replace_matches(
        &self,
        person_id: &str,
        records: &[MatchRecord],
    ) -> StorageResult<usize> {
        let mut sorted = records.to_vec();
        sorted.sort_by(|a, b| {
            (&a.camera_id, a.missing_frame_index).cmp(&(&b.camera_id, b.missing_frame_index))
        });
        self.records
            .write()
            .await
            .insert(person_id.to_string(), sorted);
        Ok(records.len())
    }

    async fn matches(&self, person_id: &str) -> StorageResult<Vec<MatchRecord>> {
        Ok(self
            .records
            .read()
            .await
            .get(person_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_match(
        &self,
        person_id: &str,
        camera_id: &CameraId,
        missing_frame_index: u32,
    ) -> StorageResult<MatchRecord> {
        self.records
            .read()
            .await
            .get(person_id)
            .and_then(|records| {
                records.iter().find(|r| {
                    &r.camera_id == camera_id && r.missing_frame_index == missing_frame_index
                })
            })
            .cloned()
            .ok_or_else(|| {
                StorageError::NotFound(format!("{person_id}/{camera_id}/{missing_frame_index}"))
            })
    }

    async fn count_matches(&self, person_id: &str, camera_id: &CameraId) -> StorageResult<u32> {
        let count = self
            .records
            .read()
            .await
            .get(person_id)
            .map_or(0, |records| {
                records.iter().filter(|r| &r.camera_id == camera_id).count()
            });
        u32::try_from(count)
            .map_err(|_| StorageError::SerializationError("match count out of range".to_string()))
    }

    async fn camera_ids(&self, person_id: &str) -> StorageResult<Vec<CameraId>> {
        let cameras: BTreeSet<CameraId> = self
            .records
            .read()
            .await
            .get(person_id)
            .map(|records| records.iter().map(|r| r.camera_id.clone()).collect())
            .unwrap_or_default();
        Ok(cameras.into_iter().collect())
    }
}
