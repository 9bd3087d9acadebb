//! Pipeline tuning knobs

use godseye_common::{ProcessingError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Sampling, batching and concurrency settings for one pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Process every `skip`-th frame (1 = every frame)
    pub skip: u32,

    /// Raw frames read from the source per batch
    pub batch_size: usize,

    /// Vectorization calls allowed in flight at once
    pub max_concurrency: usize,

    /// Per-task timeout in seconds (`None` = wait forever)
    pub task_timeout_secs: Option<u64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let task_timeout_secs = match std::env::var("GODSEYE_TASK_TIMEOUT_SECS") {
            Ok(v) if v == "0" || v.eq_ignore_ascii_case("none") => None,
            Ok(v) => Some(v.parse().unwrap_or(30)),
            Err(_) => Some(30),
        };

        Self {
            skip: env_or("GODSEYE_SKIP", 5),
            batch_size: env_or("GODSEYE_BATCH_SIZE", 40),
            max_concurrency: env_or("GODSEYE_MAX_CONCURRENCY", 10),
            task_timeout_secs,
        }
    }
}

impl PipelineConfig {
    pub fn with_skip(mut self, skip: u32) -> Self {
        self.skip = skip;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    /// Set the per-task timeout; `None` disables it
    pub fn with_task_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.task_timeout_secs = timeout.map(|d| d.as_secs().max(1));
        self
    }

    #[must_use]
    pub fn task_timeout(&self) -> Option<Duration> {
        self.task_timeout_secs.map(Duration::from_secs)
    }

    /// # Errors
    ///
    /// Returns `InvalidInput` if any of `skip`, `batch_size` or
    /// `max_concurrency` is zero
    pub fn validate(&self) -> Result<()> {
        let zero = [
            ("skip", self.skip == 0),
            ("batch_size", self.batch_size == 0),
            ("max_concurrency", self.max_concurrency == 0),
        ];
        match zero.iter().find(|(_, is_zero)| *is_zero) {
            Some((name, _)) => Err(ProcessingError::InvalidInput(format!(
                "{name} must be a positive integer"
            ))),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed() -> PipelineConfig {
        PipelineConfig {
            skip: 5,
            batch_size: 40,
            max_concurrency: 10,
            task_timeout_secs: Some(30),
        }
    }

    #[test]
    fn test_validate_accepts_defaults() {
        assert!(fixed().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zeros() {
        for config in [
            fixed().with_skip(0),
            fixed().with_batch_size(0),
            fixed().with_max_concurrency(0),
        ] {
            assert!(matches!(
                config.validate(),
                Err(ProcessingError::InvalidInput(_))
            ));
        }
    }

    #[test]
    fn test_task_timeout() {
        assert_eq!(fixed().task_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(fixed().with_task_timeout(None).task_timeout(), None);
        assert_eq!(
            fixed()
                .with_task_timeout(Some(Duration::from_millis(10)))
                .task_timeout(),
            Some(Duration::from_secs(1))
        );
    }

    #[test]
    fn test_deserialize_partial() {
        let config: PipelineConfig = serde_json::from_str(r#"{"skip": 2}"#).unwrap();
        assert_eq!(config.skip, 2);
        assert!(config.batch_size > 0);
    }
}
