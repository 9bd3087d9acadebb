//! Configuration file loading

use anyhow::{Context, Result};
use godseye_pipeline::PipelineConfig;
use godseye_search::SearchConfig;
use godseye_storage::{LocalFrameConfig, PostgresConfig, QdrantConfig, S3Config};
use godseye_vectorizer::VectorizerConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Config file looked up in the working directory when no other is given
pub const DEFAULT_CONFIG_FILE: &str = "godseye.toml";

/// Where stored frames go
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameBackend {
    #[default]
    Local,
    S3,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FramesConfig {
    pub backend: FrameBackend,
    #[serde(flatten)]
    pub local: LocalFrameConfig,
}

/// Every section of `godseye.toml`; missing sections take their defaults
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub pipeline: PipelineConfig,
    pub detector: VectorizerConfig,
    pub frames: FramesConfig,
    pub s3: S3Config,
    pub qdrant: QdrantConfig,
    pub postgres: PostgresConfig,
    pub search: SearchConfig,
}

impl Config {
    /// Search settings, with the query length tied to the collection dimension
    /// unless set explicitly
    pub fn search(&self) -> SearchConfig {
        let mut search = self.search.clone();
        if search.vector_dim.is_none() {
            search.vector_dim = usize::try_from(self.qdrant.vector_dim).ok();
        }
        search
    }
}

/// Pick the config file: `--config`, then `GODSEYE_CONFIG`, then
/// `./godseye.toml` if it exists. Explicitly named files must exist.
pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    if let Ok(path) = std::env::var("GODSEYE_CONFIG") {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }
    let fallback = PathBuf::from(DEFAULT_CONFIG_FILE);
    fallback.exists().then_some(fallback)
}

pub fn load_config(path: &Path) -> Result<Config> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&contents)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

pub fn parse_config(contents: &str) -> Result<Config> {
    let config: Config = toml::from_str(contents).context("Invalid TOML")?;
    config.pipeline.validate()?;
    Ok(config)
}

/// Load the effective configuration for this invocation
pub fn load(explicit: Option<&Path>) -> Result<Config> {
    match resolve_config_path(explicit) {
        Some(path) => load_config(&path),
        None => Ok(Config::default()),
    }
}
