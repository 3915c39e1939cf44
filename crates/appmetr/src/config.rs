//! Orchestrator settings and their file loader.

use crate::error::AppMetrError;
use crate::storage::StorageBackend;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_MAX_BATCH_ACTIONS: usize = 1000;
pub const DEFAULT_MAX_BATCH_BYTES: usize = 1024 * 1024;
pub const DEFAULT_FLUSH_PERIOD: Duration = Duration::from_secs(30);
pub const DEFAULT_FAILED_UPLOAD_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_HARD_STOP_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppMetrConfig {
    pub token: String,
    pub url: String,
    /// Flush once this many actions are buffered. Zero disables the count check.
    #[serde(default = "default_max_batch_actions")]
    pub max_batch_actions: usize,
    /// Flush once the approximate size of buffered actions reaches this many bytes.
    #[serde(default = "default_max_batch_bytes")]
    pub max_batch_bytes: usize,
    #[serde(
        rename = "flush_period_ms",
        with = "duration_millis",
        default = "default_flush_period"
    )]
    pub flush_period: Duration,
    /// Pause after a failed upload before the next attempt.
    #[serde(
        rename = "failed_upload_timeout_ms",
        with = "duration_millis",
        default = "default_failed_upload_timeout"
    )]
    pub failed_upload_timeout: Duration,
    /// Retry a failed batch instead of dropping it.
    #[serde(default = "default_retry_batch_upload")]
    pub retry_batch_upload: bool,
    /// How long `hard_stop` waits for an in-flight upload before detaching the uploader.
    #[serde(
        rename = "hard_stop_grace_ms",
        with = "duration_millis",
        default = "default_hard_stop_grace"
    )]
    pub hard_stop_grace: Duration,
    #[serde(default)]
    pub storage: StorageBackend,
}

fn default_max_batch_actions() -> usize {
    DEFAULT_MAX_BATCH_ACTIONS
}

fn default_max_batch_bytes() -> usize {
    DEFAULT_MAX_BATCH_BYTES
}

fn default_flush_period() -> Duration {
    DEFAULT_FLUSH_PERIOD
}

fn default_failed_upload_timeout() -> Duration {
    DEFAULT_FAILED_UPLOAD_TIMEOUT
}

fn default_retry_batch_upload() -> bool {
    true
}

fn default_hard_stop_grace() -> Duration {
    DEFAULT_HARD_STOP_GRACE
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

impl AppMetrConfig {
    pub fn new(token: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            url: url.into(),
            max_batch_actions: DEFAULT_MAX_BATCH_ACTIONS,
            max_batch_bytes: DEFAULT_MAX_BATCH_BYTES,
            flush_period: DEFAULT_FLUSH_PERIOD,
            failed_upload_timeout: DEFAULT_FAILED_UPLOAD_TIMEOUT,
            retry_batch_upload: true,
            hard_stop_grace: DEFAULT_HARD_STOP_GRACE,
            storage: StorageBackend::default(),
        }
    }

    /// Load config from file path.
    /// Supports both JSON (.json) and YAML (.yaml/.yml) formats based on file extension.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, AppMetrError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            AppMetrError::invalid_config("path", format!("cannot read {path:?}: {e}"))
        })?;

        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or("");

        let config: Self = match extension.to_lowercase().as_str() {
            "json" => serde_json::from_str(&content)
                .map_err(|e| AppMetrError::invalid_config("json", e.to_string()))?,
            "yaml" | "yml" => serde_yaml::from_str(&content)
                .map_err(|e| AppMetrError::invalid_config("yaml", e.to_string()))?,
            _ => serde_json::from_str(&content)
                .or_else(|_| serde_yaml::from_str(&content))
                .map_err(|e| {
                    AppMetrError::invalid_config("config", format!("neither JSON nor YAML: {e}"))
                })?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppMetrError> {
        if self.token.trim().is_empty() {
            return Err(AppMetrError::invalid_config("token", "must not be empty"));
        }
        if self.url.trim().is_empty() {
            return Err(AppMetrError::invalid_config("url", "must not be empty"));
        }
        if self.flush_period.is_zero() {
            return Err(AppMetrError::invalid_config(
                "flush_period_ms",
                "must be greater than zero",
            ));
        }
        Ok(())
    }
}
