//! Configuration for ptsync-engine
//!
//! Resolution priority, highest first: CLI flag → ENV (`PTSYNC_*`) → TOML
//! file → compiled defaults. The CLI layer is applied by `main`; this module
//! handles the other three and validates the result.
//!
//! All values are static for the lifetime of a run.

use crate::error::SyncError;
use crate::models::CanonicalCategory;
use crate::utils::RetryPolicy;
use chrono::{DateTime, Utc};
use ptsync_common::config::{load_toml_config, locate_config_file, ConfigSource};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// ENV variable naming the config file
pub const CONFIG_ENV_VAR: &str = "PTSYNC_CONFIG";

/// Hard ceiling on the bulk write size
pub const MAX_BATCH_SIZE: usize = 500;

/// Complete engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub source: SourceConfig,
    pub destination: DestinationConfig,
    pub classifier: ClassifierConfig,
    pub normalizer: NormalizerConfig,
    pub window: WindowConfig,
    pub logging: LoggingConfig,
}

/// Remote source and fetch-retry settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// GraphQL endpoint URL
    pub endpoint: Option<String>,
    /// Bearer token; normally supplied through `PTSYNC_API_TOKEN`
    #[serde(skip_serializing)]
    pub api_token: Option<String>,
    /// Records per page (fixed for a run)
    pub page_size: u32,
    /// Minimum gap between consecutive requests
    pub min_request_interval_ms: u64,
    /// Per-call timeout
    pub request_timeout_secs: u64,
    /// Attempts per page, including the first
    pub fetch_max_attempts: u32,
    /// Fixed pause between fetch attempts
    pub fetch_retry_pause_ms: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_token: None,
            page_size: 100,
            min_request_interval_ms: 300,
            request_timeout_secs: 30,
            fetch_max_attempts: 3,
            fetch_retry_pause_ms: 5000,
        }
    }
}

/// Destination store and write-retry settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DestinationConfig {
    /// SQLite database path; platform data dir when unset
    pub database_path: Option<PathBuf>,
    /// Records per bulk write
    pub batch_size: usize,
    /// Attempts per bulk or per-record write, including the first
    pub write_max_attempts: u32,
    /// Fixed pause between write attempts
    pub write_retry_pause_ms: u64,
    /// Per-call timeout
    pub write_timeout_secs: u64,
    /// Concurrent single-record writes on the fallback path
    pub record_concurrency: usize,
}

impl Default for DestinationConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            batch_size: 100,
            write_max_attempts: 3,
            write_retry_pause_ms: 1000,
            write_timeout_secs: 30,
            record_concurrency: 4,
        }
    }
}

/// Noise filter settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Case-insensitive substrings; entries prefixed `re:` are regexes
    pub noise_patterns: Vec<String>,
    /// Categories that are noise when they carry no text
    pub empty_content_categories: Vec<String>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            noise_patterns: [
                "email was delivered",
                "email delivered",
                "email was opened",
                "opened the email",
                "email opened",
                "clicked a link",
                "clicked link in email",
                "email bounced",
                "email was bounced",
                r"re:^\s*(appointment|event|reminder)\s+(was\s+)?(created|deleted|removed)\.?\s*$",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            empty_content_categories: [
                "APPOINTMENT_CREATED",
                "APPOINTMENT_DELETED",
                "APPOINTMENT_CANCELLED",
                "APPOINTMENT_RESCHEDULED",
                "INVOICE_CREATED",
                "INVOICE_SENT",
                "ESTIMATE_CREATED",
                "SYSTEM_NOTIFICATION",
                "EMAIL_SUBSCRIPTION_CHANGED",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

/// Field normalization settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizerConfig {
    pub title_max_chars: usize,
    pub description_max_chars: usize,
    /// Canonical category for unknown source categories
    pub default_category: String,
    /// Source category → canonical category, layered over the built-in table
    pub category_map: BTreeMap<String, String>,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            title_max_chars: 500,
            description_max_chars: 2000,
            default_category: CanonicalCategory::Note.as_str().to_string(),
            category_map: BTreeMap::new(),
        }
    }
}

/// Optional occurred-at bounds
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing` filter directive used when `RUST_LOG` is unset
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl SyncConfig {
    /// Load TOML (explicit path, `PTSYNC_CONFIG`, or discovered) and apply ENV overrides
    pub fn load(cli_config_path: Option<&Path>) -> Result<Self, SyncError> {
        let source = locate_config_file(cli_config_path, CONFIG_ENV_VAR);
        let mut config: SyncConfig = load_toml_config(&source)?;
        if let ConfigSource::Explicit(path) | ConfigSource::Discovered(path) = &source {
            info!("Sync configuration read from {}", path.display());
        }
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Apply `PTSYNC_*` environment variables over file values
    pub fn apply_env_overrides(&mut self) -> Result<(), SyncError> {
        if let Some(v) = env_string("PTSYNC_ENDPOINT") {
            self.source.endpoint = Some(v);
        }
        if let Some(v) = env_string("PTSYNC_API_TOKEN") {
            self.source.api_token = Some(v);
        }
        if let Some(v) = env_string("PTSYNC_DATABASE") {
            self.destination.database_path = Some(PathBuf::from(v));
        }
        if let Some(v) = env_parsed::<u32>("PTSYNC_PAGE_SIZE")? {
            self.source.page_size = v;
        }
        if let Some(v) = env_parsed::<usize>("PTSYNC_BATCH_SIZE")? {
            self.destination.batch_size = v;
        }
        if let Some(v) = env_parsed::<u64>("PTSYNC_MIN_REQUEST_INTERVAL_MS")? {
            self.source.min_request_interval_ms = v;
        }
        if let Some(v) = env_string("PTSYNC_LOG_LEVEL") {
            self.logging.level = v;
        }
        Ok(())
    }

    /// Check everything the engine needs before the first fetch
    ///
    /// Source credentials are checked by the source adapter, since test and
    /// dry-run sources do not need them.
    pub fn validate(&self) -> Result<(), SyncError> {
        let err = |msg: String| Err(SyncError::Configuration(msg));

        if self.source.page_size == 0 {
            return err("source.page_size must be at least 1".into());
        }
        if self.source.fetch_max_attempts == 0 {
            return err("source.fetch_max_attempts must be at least 1".into());
        }
        if self.source.request_timeout_secs == 0 {
            return err("source.request_timeout_secs must be at least 1".into());
        }
        if self.destination.batch_size == 0 || self.destination.batch_size > MAX_BATCH_SIZE {
            return err(format!(
                "destination.batch_size must be between 1 and {}, got {}",
                MAX_BATCH_SIZE, self.destination.batch_size
            ));
        }
        if self.destination.write_max_attempts == 0 {
            return err("destination.write_max_attempts must be at least 1".into());
        }
        if self.destination.write_timeout_secs == 0 {
            return err("destination.write_timeout_secs must be at least 1".into());
        }
        if self.destination.record_concurrency == 0 {
            return err("destination.record_concurrency must be at least 1".into());
        }
        if self.normalizer.title_max_chars == 0 || self.normalizer.description_max_chars == 0 {
            return err("normalizer truncation limits must be at least 1".into());
        }
        self.default_category()?;
        for (source_category, canonical) in &self.normalizer.category_map {
            CanonicalCategory::from_str(canonical).map_err(|e| {
                SyncError::Configuration(format!(
                    "normalizer.category_map[{}]: {}",
                    source_category, e
                ))
            })?;
        }
        if let (Some(start), Some(end)) = (self.window.start, self.window.end) {
            if start > end {
                return err(format!("window.start {} is after window.end {}", start, end));
            }
        }
        Ok(())
    }

    pub fn default_category(&self) -> Result<CanonicalCategory, SyncError> {
        CanonicalCategory::from_str(&self.normalizer.default_category)
            .map_err(|e| SyncError::Configuration(format!("normalizer.default_category: {}", e)))
    }

    pub fn min_request_interval(&self) -> Duration {
        Duration::from_millis(self.source.min_request_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.source.request_timeout_secs)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.destination.write_timeout_secs)
    }

    pub fn fetch_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            "fetch",
            self.source.fetch_max_attempts,
            Duration::from_millis(self.source.fetch_retry_pause_ms),
        )
    }

    pub fn write_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            "write",
            self.destination.write_max_attempts,
            Duration::from_millis(self.destination.write_retry_pause_ms),
        )
    }

    /// Database path, falling back to the platform data dir
    pub fn database_path(&self) -> PathBuf {
        self.destination
            .database_path
            .clone()
            .unwrap_or_else(ptsync_common::config::default_database_path)
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_parsed<T>(name: &str) -> Result<Option<T>, SyncError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_string(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| SyncError::Configuration(format!("{}={:?}: {}", name, raw, e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = SyncConfig::default();
        config.validate().unwrap();
        assert_eq!(config.source.page_size, 100);
        assert_eq!(config.source.fetch_max_attempts, 3);
        assert_eq!(config.source.fetch_retry_pause_ms, 5000);
        assert_eq!(config.normalizer.title_max_chars, 500);
        assert_eq!(config.normalizer.description_max_chars, 2000);
        assert_eq!(config.default_category().unwrap(), CanonicalCategory::Note);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: SyncConfig = toml::from_str(
            r#"
            [source]
            page_size = 50

            [normalizer.category_map]
            TUNING_LOG = "SERVICE"
            "#,
        )
        .unwrap();

        assert_eq!(config.source.page_size, 50);
        assert_eq!(config.source.min_request_interval_ms, 300);
        assert_eq!(config.destination.batch_size, 100);
        assert_eq!(config.normalizer.category_map["TUNING_LOG"], "SERVICE");
        assert!(!config.classifier.noise_patterns.is_empty());
        config.validate().unwrap();
    }

    #[test]
    fn test_batch_size_bounds() {
        let mut config = SyncConfig::default();
        config.destination.batch_size = MAX_BATCH_SIZE + 1;
        assert!(matches!(config.validate(), Err(SyncError::Configuration(_))));

        config.destination.batch_size = 0;
        assert!(matches!(config.validate(), Err(SyncError::Configuration(_))));
    }

    #[test]
    fn test_unknown_default_category_rejected() {
        let mut config = SyncConfig::default();
        config.normalizer.default_category = "MISC".into();
        assert!(matches!(config.validate(), Err(SyncError::Configuration(_))));
    }

    #[test]
    fn test_category_override_must_be_canonical() {
        let mut config = SyncConfig::default();
        config
            .normalizer
            .category_map
            .insert("PIANO_MOVED".into(), "LOGISTICS".into());
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("PIANO_MOVED"));
    }

    #[test]
    fn test_inverted_window_rejected() {
        let mut config = SyncConfig::default();
        config.window.start = Some("2024-06-01T00:00:00Z".parse().unwrap());
        config.window.end = Some("2024-01-01T00:00:00Z".parse().unwrap());
        assert!(matches!(config.validate(), Err(SyncError::Configuration(_))));
    }

    #[test]
    fn test_retry_policies_from_config() {
        let config = SyncConfig::default();
        let fetch = config.fetch_retry_policy();
        assert_eq!(fetch.max_attempts, 3);
        assert_eq!(fetch.pause, Duration::from_secs(5));
        let write = config.write_retry_policy();
        assert_eq!(write.max_attempts, 3);
        assert_eq!(write.pause, Duration::from_secs(1));
    }

    #[test]
    fn test_api_token_not_serialized() {
        let mut config = SyncConfig::default();
        config.source.api_token = Some("secret".into());
        let rendered = toml::to_string(&config).unwrap();
        assert!(!rendered.contains("secret"));
    }
}
