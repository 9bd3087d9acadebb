//! Frame file storage
//!
//! One image per `(camera_id, frame_index)`, addressed as
//! `<camera_id>/frame_<frame_index>.<ext>`. Writes overwrite, so storing the
//! same frame twice leaves a single file with the latest content.

use crate::{StorageError, StorageResult};
use aws_sdk_s3::{
    config::{Credentials, Region},
    primitives::ByteStream,
    Client,
};
use godseye_common::CameraId;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

/// Frame file name within its camera directory
#[must_use]
pub fn frame_file_name(frame_index: u64, extension: &str) -> String {
    format!("frame_{frame_index}.{extension}")
}

/// Inverse of [`frame_file_name`]
fn parse_frame_file_name(name: &str, extension: &str) -> Option<u64> {
    name.strip_prefix("frame_")?
        .strip_suffix(extension)?
        .strip_suffix('.')?
        .parse()
        .ok()
}

/// Frame storage trait
#[async_trait::async_trait]
pub trait FrameStore: Send + Sync {
    /// Store (or overwrite) a frame image, returning its file reference
    async fn store_frame(
        &self,
        camera_id: &CameraId,
        frame_index: u64,
        image: &[u8],
    ) -> StorageResult<String>;

    /// Retrieve a frame image
    async fn retrieve_frame(&self, camera_id: &CameraId, frame_index: u64)
        -> StorageResult<Vec<u8>>;

    /// Check whether a frame has been stored
    async fn frame_exists(&self, camera_id: &CameraId, frame_index: u64) -> StorageResult<bool>;

    /// Indices of all stored frames for a camera, ascending
    async fn list_frames(&self, camera_id: &CameraId) -> StorageResult<Vec<u64>>;
}

/// Local frame directory configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalFrameConfig {
    /// Root directory; each camera gets a subdirectory
    pub root: PathBuf,

    /// File extension of stored frames
    pub extension: String,
}

impl Default for LocalFrameConfig {
    fn default() -> Self {
        Self {
            root: std::env::var("GODSEYE_FRAME_DIR")
                .map_or_else(|_| PathBuf::from("./frames"), PathBuf::from),
            extension: "jpeg".to_string(),
        }
    }
}

/// Frames on the local filesystem
#[derive(Debug, Clone)]
pub struct LocalFrameStore {
    root: PathBuf,
    extension: String,
}

impl LocalFrameStore {
    #[must_use]
    pub fn new(config: LocalFrameConfig) -> Self {
        Self {
            root: config.root,
            extension: config.extension,
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding one camera's frames
    #[must_use]
    pub fn camera_dir(&self, camera_id: &CameraId) -> PathBuf {
        self.root.join(camera_id.as_str())
    }

    #[must_use]
    pub fn frame_path(&self, camera_id: &CameraId, frame_index: u64) -> PathBuf {
        self.camera_dir(camera_id)
            .join(frame_file_name(frame_index, &self.extension))
    }
}

#[async_trait::async_trait]
impl FrameStore for LocalFrameStore {
    async fn store_frame(
        &self,
        camera_id: &CameraId,
        frame_index: u64,
        image: &[u8],
    ) -> StorageResult<String> {
        let dir = self.camera_dir(camera_id);
        tokio::fs::create_dir_all(&dir).await?;

        let path = self.frame_path(camera_id, frame_index);
        // Readers never observe a partially written frame
        let tmp = dir.join(format!(".frame_{frame_index}.{}.tmp", Uuid::new_v4()));
        tokio::fs::write(&tmp, image).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            tokio::fs::remove_file(&tmp).await.ok();
            return Err(e.into());
        }

        debug!(camera_id = %camera_id, frame_index, path = %path.display(), "Stored frame");
        Ok(path.to_string_lossy().into_owned())
    }

    async fn retrieve_frame(
        &self,
        camera_id: &CameraId,
        frame_index: u64,
    ) -> StorageResult<Vec<u8>> {
        let path = self.frame_path(camera_id, frame_index);
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(path.display().to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn frame_exists(&self, camera_id: &CameraId, frame_index: u64) -> StorageResult<bool> {
        Ok(tokio::fs::try_exists(self.frame_path(camera_id, frame_index)).await?)
    }

    async fn list_frames(&self, camera_id: &CameraId) -> StorageResult<Vec<u64>> {
        let dir = self.camera_dir(camera_id);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut indices = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if let Some(index) = entry
                .file_name()
                .to_str()
                .and_then(|name| parse_frame_file_name(name, &self.extension))
            {
                indices.push(index);
            }
        }
        indices.sort_unstable();
        Ok(indices)
    }
}

/// S3/MinIO configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct S3Config {
    /// S3 bucket name
    pub bucket: String,

    /// AWS region (e.g., "us-west-2") or "us-east-1" for `MinIO`
    pub region: String,

    /// S3 endpoint (custom for `MinIO`, empty for AWS S3)
    pub endpoint: Option<String>,

    /// AWS access key ID
    pub access_key_id: String,

    /// AWS secret access key
    pub secret_access_key: String,

    /// Path prefix for all objects (e.g., "frames/")
    pub prefix: String,

    /// File extension of stored frames
    pub extension: String,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            bucket: std::env::var("GODSEYE_S3_BUCKET").unwrap_or_else(|_| "godseye-frames".to_string()),
            region: std::env::var("AWS_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
            endpoint: std::env::var("GODSEYE_S3_ENDPOINT").ok(),
            access_key_id: std::env::var("AWS_ACCESS_KEY_ID").unwrap_or_default(),
            secret_access_key: std::env::var("AWS_SECRET_ACCESS_KEY").unwrap_or_default(),
            prefix: String::new(),
            extension: "jpeg".to_string(),
        }
    }
}

/// Frames in an S3/MinIO bucket
pub struct S3FrameStore {
    client: Client,
    bucket: String,
    prefix: String,
    extension: String,
}

impl S3FrameStore {
    /// Create a new S3 frame store client
    pub async fn new(config: S3Config) -> StorageResult<Self> {
        if config.bucket.is_empty() {
            return Err(StorageError::InvalidConfig("S3 bucket name is empty".to_string()));
        }

        let credentials = Credentials::new(
            &config.access_key_id,
            &config.secret_access_key,
            None,
            None,
            "godseye-storage",
        );

        let mut s3_config_builder = aws_sdk_s3::Config::builder()
            .credentials_provider(credentials)
            .region(Region::new(config.region.clone()))
            .behavior_version_latest();

        // Custom endpoint means MinIO, which needs path-style addressing
        if let Some(endpoint) = config.endpoint {
            s3_config_builder = s3_config_builder
                .endpoint_url(endpoint)
                .force_path_style(true);
        }

        Ok(Self {
            client: Client::from_conf(s3_config_builder.build()),
            bucket: config.bucket,
            prefix: config.prefix,
            extension: config.extension,
        })
    }

    fn camera_prefix(&self, camera_id: &CameraId) -> String {
        format!("{}{camera_id}/", self.prefix)
    }

    fn frame_key(&self, camera_id: &CameraId, frame_index: u64) -> String {
        format!(
            "{}{}",
            self.camera_prefix(camera_id),
            frame_file_name(frame_index, &self.extension)
        )
    }
}

#[async_trait::async_trait]
impl FrameStore for S3FrameStore {
    async fn store_frame(
        &self,
        camera_id: &CameraId,
        frame_index: u64,
        image: &[u8],
    ) -> StorageResult<String> {
        let key = self.frame_key(camera_id, frame_index);

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .content_type("image/jpeg")
            .body(ByteStream::from(image.to_vec()))
            .send()
            .await
            .map_err(|e| StorageError::S3Error(e.to_string()))?;

        debug!(camera_id = %camera_id, frame_index, key = %key, "Stored frame");
        Ok(key)
    }

    async fn retrieve_frame(
        &self,
        camera_id: &CameraId,
        frame_index: u64,
    ) -> StorageResult<Vec<u8>> {
        let key = self.frame_key(camera_id, frame_index);

        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| {
                if e.to_string().contains("NoSuchKey") {
                    StorageError::NotFound(key.clone())
                } else {
                    StorageError::S3Error(e.to_string())
                }
            })?;

        let bytes = response
            .body
            .collect()
            .await
            .map_err(|e| StorageError::S3Error(e.to_string()))?;

        Ok(bytes.to_vec())
    }

    async fn frame_exists(&self, camera_id: &CameraId, frame_index: u64) -> StorageResult<bool> {
        let key = self.frame_key(camera_id, frame_index);

        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if e.to_string().contains("NotFound") => Ok(false),
            Err(e) => Err(StorageError::S3Error(e.to_string())),
        }
    }

    async fn list_frames(&self, camera_id: &CameraId) -> StorageResult<Vec<u64>> {
        let prefix = self.camera_prefix(camera_id);
        let mut indices = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let response = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&prefix)
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|e| StorageError::S3Error(e.to_string()))?;

            indices.extend(response.contents().iter().filter_map(|obj| {
                let name = obj.key()?.strip_prefix(&prefix)?;
                parse_frame_file_name(name, &self.extension)
            }));

            match response.next_continuation_token() {
                Some(token) if response.is_truncated() == Some(true) => {
                    continuation = Some(token.to_string());
                }
                _ => break,
            }
        }

        indices.sort_unstable();
        Ok(indices)
    }
}
