//! Register and refresh missing-person queries

use super::{report_matches, OutputFormat};
use crate::backends;
use crate::config::Config;
use anyhow::{Context as _, Result};
use clap::Args;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Args)]
pub struct RegisterCommand {
    /// Person id (a new UUID is generated if omitted)
    #[arg(long)]
    person_id: Option<String>,

    /// Photo of the person; the first detected face is used
    #[arg(long, required_unless_present = "embedding", conflicts_with = "embedding")]
    photo: Option<PathBuf>,

    /// Query embedding as a JSON array, or a path to a file holding one
    #[arg(long)]
    embedding: Option<String>,
}

/// Parse `--embedding`, reading it from a file when the value names one
fn parse_embedding(value: &str) -> Result<Vec<f32>> {
    let path = Path::new(value);
    let json = if !value.trim_start().starts_with('[') && path.is_file() {
        std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read embedding file: {}", path.display()))?
    } else {
        value.to_string()
    };
    serde_json::from_str(&json).context("Embedding must be a JSON array of numbers")
}

impl RegisterCommand {
    pub async fn execute(self, config: Config, format: OutputFormat) -> Result<()> {
        let person_id = self
            .person_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        info!("=== Godseye Register: {person_id} ===");

        let search = backends::search(&config).await?;
        let records = match (&self.photo, &self.embedding) {
            (Some(photo), _) => {
                let image = tokio::fs::read(photo)
                    .await
                    .with_context(|| format!("Failed to read photo: {}", photo.display()))?;
                let vectorizer = backends::vectorizer(&config)?;
                search
                    .register_photo(&person_id, &image, vectorizer.as_ref())
                    .await?
            }
            (None, Some(embedding)) => {
                let embedding = parse_embedding(embedding)?;
                search.register(&person_id, &embedding).await?
            }
            (None, None) => anyhow::bail!("Either --photo or --embedding is required"),
        };

        report_matches(&person_id, &records, format)
    }
}

#[derive(Args)]
pub struct RefreshCommand {
    /// Person id given at registration
    person_id: String,
}

impl RefreshCommand {
    pub async fn execute(self, config: Config, format: OutputFormat) -> Result<()> {
        info!("=== Godseye Refresh: {} ===", self.person_id);
        let search = backends::search(&config).await?;
        let records = search
            .refresh(&self.person_id)
            .await
            .with_context(|| format!("Failed to refresh matches for {}", self.person_id))?;
        report_matches(&self.person_id, &records, format)
    }
}
