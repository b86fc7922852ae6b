//! Configuration for the icebox audit/error store.

use serde::{Deserialize, Serialize};
use snafu::ResultExt;
use std::path::Path;
use std::time::Duration;

use icebox_core::config::{KB, interpolate};
use icebox_core::error::{
    ConfigError, EnvInterpolationSnafu, InlineThresholdTooLargeSnafu, ReadFileSnafu,
    YamlParseSnafu, ZeroBatchSizeSnafu, ZeroWritersSnafu,
};
pub use icebox_core::config::MetricsConfig;

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub ingestion: IngestionConfig,
    #[serde(default)]
    pub body: BodyStoreConfig,
    #[serde(default)]
    pub recoverability: RecoverabilityConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub capacity: CapacityConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Config {
    /// Load configuration from a YAML file with env-var interpolation.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).context(ReadFileSnafu)?;
        Self::from_yaml(&raw)
    }

    /// Parse configuration from YAML text with env-var interpolation.
    pub fn from_yaml(raw: &str) -> Result<Self, ConfigError> {
        let interpolated = interpolate(raw);
        if !interpolated.is_ok() {
            return EnvInterpolationSnafu {
                message: interpolated.errors.join("\n"),
            }
            .fail();
        }

        let config: Config =
            serde_yaml::from_str(&interpolated.text).context(YamlParseSnafu)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        snafu::ensure!(self.ingestion.batch_size > 0, ZeroBatchSizeSnafu);
        snafu::ensure!(self.ingestion.writers > 0, ZeroWritersSnafu);
        snafu::ensure!(
            self.body.inline_threshold_bytes <= self.body.max_body_size_bytes,
            InlineThresholdTooLargeSnafu {
                inline: self.body.inline_threshold_bytes,
                max: self.body.max_body_size_bytes,
            }
        );
        Ok(())
    }
}

/// Batched ingestion pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionConfig {
    /// Maximum records per committed batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Maximum time a partially-filled batch waits before flushing.
    #[serde(default = "default_batch_timeout_ms")]
    pub batch_timeout_ms: u64,
    /// Number of parallel batch-writer workers.
    #[serde(default = "default_writers")]
    pub writers: usize,
    /// Inbound queue capacity as a multiple of `batch_size`.
    #[serde(default = "default_queue_multiplier")]
    pub queue_capacity_multiplier: usize,
    /// Maximum commit attempts per batch before it counts as failed.
    #[serde(default = "default_commit_retry_limit")]
    pub commit_retry_limit: u32,
    /// Base delay for exponential commit backoff.
    #[serde(default = "default_commit_retry_base_ms")]
    pub commit_retry_base_ms: u64,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            batch_timeout_ms: default_batch_timeout_ms(),
            writers: default_writers(),
            queue_capacity_multiplier: default_queue_multiplier(),
            commit_retry_limit: default_commit_retry_limit(),
            commit_retry_base_ms: default_commit_retry_base_ms(),
        }
    }
}

impl IngestionConfig {
    pub fn batch_timeout(&self) -> Duration {
        Duration::from_millis(self.batch_timeout_ms)
    }

    pub fn queue_capacity(&self) -> usize {
        self.batch_size * self.queue_capacity_multiplier.max(1)
    }

    pub fn commit_retry_base(&self) -> Duration {
        Duration::from_millis(self.commit_retry_base_ms)
    }
}

fn default_batch_size() -> usize {
    1024
}

fn default_batch_timeout_ms() -> u64 {
    500
}

fn default_writers() -> usize {
    4
}

fn default_queue_multiplier() -> usize {
    4
}

fn default_commit_retry_limit() -> u32 {
    5
}

fn default_commit_retry_base_ms() -> u64 {
    100
}

/// Body store policy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BodyStoreConfig {
    /// Payloads larger than this are not stored at all.
    #[serde(default = "default_max_body_size")]
    pub max_body_size_bytes: usize,
    /// Non-binary payloads below this size are embedded inline.
    #[serde(default = "default_inline_threshold")]
    pub inline_threshold_bytes: usize,
}

impl Default for BodyStoreConfig {
    fn default() -> Self {
        Self {
            max_body_size_bytes: default_max_body_size(),
            inline_threshold_bytes: default_inline_threshold(),
        }
    }
}

fn default_max_body_size() -> usize {
    100 * KB
}

fn default_inline_threshold() -> usize {
    // Below typical large-object allocation thresholds in managed runtimes
    85 * KB
}

/// Recoverability engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoverabilityConfig {
    /// Messages per archive/unarchive batch.
    #[serde(default = "default_archive_batch_size")]
    pub archive_batch_size: usize,
    /// Failure records per page when scanning a retry query.
    #[serde(default = "default_retry_page_size")]
    pub retry_page_size: usize,
    /// Capacity of the operation event channel.
    #[serde(default = "default_event_capacity")]
    pub event_channel_capacity: usize,
}

impl Default for RecoverabilityConfig {
    fn default() -> Self {
        Self {
            archive_batch_size: default_archive_batch_size(),
            retry_page_size: default_retry_page_size(),
            event_channel_capacity: default_event_capacity(),
        }
    }
}

fn default_archive_batch_size() -> usize {
    1000
}

fn default_retry_page_size() -> usize {
    1024
}

fn default_event_capacity() -> usize {
    256
}

/// Retention periods applied as per-entity TTLs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Days to retain audit records.
    #[serde(default = "default_audit_days")]
    pub audit_days: u32,
    /// Days to retain failure records and their bodies.
    #[serde(default = "default_error_days")]
    pub error_days: u32,
    /// Seconds between retention sweeps.
    #[serde(default = "default_purge_interval_secs")]
    pub purge_interval_secs: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            audit_days: default_audit_days(),
            error_days: default_error_days(),
            purge_interval_secs: default_purge_interval_secs(),
        }
    }
}

impl RetentionConfig {
    pub fn audit_ttl(&self) -> chrono::TimeDelta {
        chrono::TimeDelta::days(i64::from(self.audit_days))
    }

    pub fn error_ttl(&self) -> chrono::TimeDelta {
        chrono::TimeDelta::days(i64::from(self.error_days))
    }

    pub fn purge_interval(&self) -> Duration {
        Duration::from_secs(self.purge_interval_secs)
    }
}

fn default_audit_days() -> u32 {
    30
}

fn default_error_days() -> u32 {
    45
}

fn default_purge_interval_secs() -> u64 {
    3600
}

/// Capacity gate configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapacityConfig {
    /// Seconds between capacity recomputations.
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,
    /// Maximum stored records for the in-memory backend (0 = unlimited).
    #[serde(default)]
    pub max_stored_records: usize,
}

impl Default for CapacityConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: default_check_interval_secs(),
            max_stored_records: 0,
        }
    }
}

impl CapacityConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }
}

fn default_check_interval_secs() -> u64 {
    30
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.ingestion.batch_size, 1024);
        assert_eq!(config.ingestion.batch_timeout_ms, 500);
        assert_eq!(config.ingestion.writers, 4);
        assert_eq!(config.ingestion.queue_capacity(), 4096);
        assert_eq!(config.body.max_body_size_bytes, 100 * KB);
        assert_eq!(config.recoverability.retry_page_size, 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_yaml_minimal() {
        let config = Config::from_yaml("{}").unwrap();
        assert_eq!(config.ingestion.batch_size, 1024);
    }

    #[test]
    fn test_from_yaml_overrides() {
        let yaml = r#"
ingestion:
  batch_size: 256
  writers: 2
retention:
  audit_days: 7
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.ingestion.batch_size, 256);
        assert_eq!(config.ingestion.writers, 2);
        assert_eq!(config.retention.audit_days, 7);
        // Untouched sections keep defaults
        assert_eq!(config.body.inline_threshold_bytes, 85 * KB);
    }

    #[test]
    fn test_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("icebox.yaml");
        std::fs::write(&path, "ingestion:\n  batch_size: 64\n").unwrap();

        let config = Config::from_path(&path).unwrap();
        assert_eq!(config.ingestion.batch_size, 64);
    }

    #[test]
    fn test_from_path_missing_file() {
        let err = Config::from_path(Path::new("/nonexistent/icebox.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::ReadFile { .. }));
    }

    #[test]
    fn test_env_default_interpolation() {
        let config = Config::from_yaml("ingestion:\n  batch_size: ${ICEBOX_TEST_BATCH:-512}\n")
            .unwrap();
        assert_eq!(config.ingestion.batch_size, 512);
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let yaml = "ingestion:\n  batch_size: 0\n";
        assert!(Config::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_zero_writers_rejected() {
        let yaml = "ingestion:\n  writers: 0\n";
        assert!(Config::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_inline_threshold_bound() {
        let yaml = r#"
body:
  max_body_size_bytes: 1024
  inline_threshold_bytes: 2048
"#;
        assert!(Config::from_yaml(yaml).is_err());
    }
}
