pub mod detect;
pub mod frame;
pub mod ingest;
pub mod register;

use anyhow::{Context, Result};
use clap::ValueEnum;
use godseye_common::MatchRecord;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::info;

/// How results are printed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Log lines only
    #[default]
    Text,
    /// One JSON object per result on stdout
    Jsonl,
}

pub fn print_jsonl<T: Serialize>(value: &T) -> Result<()> {
    let line = serde_json::to_string(value).context("Failed to serialize result")?;
    println!("{line}");
    Ok(())
}

/// Report a person's freshly computed match sequences
pub fn report_matches(person_id: &str, records: &[MatchRecord], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Jsonl => {
            for record in records {
                print_jsonl(record)?;
            }
        }
        OutputFormat::Text => {
            let mut per_camera: BTreeMap<&str, usize> = BTreeMap::new();
            for record in records {
                *per_camera.entry(record.camera_id.as_str()).or_default() += 1;
            }
            info!(person_id, matches = records.len(), cameras = per_camera.len(), "Matches");
            for (camera_id, count) in per_camera {
                info!("  {camera_id}: {count} frames");
            }
        }
    }
    Ok(())
}
