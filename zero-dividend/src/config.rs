//! Configuration for the dividend pipeline.
//!
//! Loaded from `~/.codecoder/dividend.json` when present, then overridden by
//! environment variables:
//!
//! | Variable                  | Setting                     |
//! |---------------------------|-----------------------------|
//! | `TUSHARE_TOKEN`           | `provider.token`            |
//! | `TUSHARE_BASE_URL`        | `provider.base_url`         |
//! | `DIVIDEND_DB_PATH`        | `storage.db_path`           |
//! | `DIVIDEND_HISTORY_YEARS`  | `pipeline.history_years`    |
//! | `DIVIDEND_LOG_LEVEL`      | `observability.log_level`   |
//! | `DIVIDEND_LOG_FORMAT`     | `observability.log_format`  |

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::analysis::RankDirection;
use crate::data::tushare::DEFAULT_BASE_URL;
use crate::data::{RetryPolicy, StorageConfig};
use crate::error::ConfigError;

/// Get the configuration directory.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new().map_or_else(
        || PathBuf::from(".codecoder"),
        |dirs| dirs.home_dir().join(".codecoder"),
    )
}

/// Get the configuration file path.
pub fn config_path() -> PathBuf {
    config_dir().join("dividend.json")
}

// ============================================================================
// Sections
// ============================================================================

/// Tushare Pro connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// API token
    #[serde(default)]
    pub token: Option<String>,

    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Per-request HTTP timeout
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            token: None,
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// SQLite location.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreSettings {
    /// Database file; defaults to `~/.codecoder/dividend.db`
    #[serde(default)]
    pub db_path: Option<PathBuf>,
}

impl StoreSettings {
    pub fn storage_config(&self) -> StorageConfig {
        match &self.db_path {
            Some(path) => StorageConfig {
                db_path: path.clone(),
            },
            None => StorageConfig::default(),
        }
    }
}

/// Retry behaviour for upstream requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_retry_delay_secs")]
    pub delay_secs: f64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_delay_secs() -> f64 {
    3.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            delay_secs: default_retry_delay_secs(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, secs(self.delay_secs))
    }
}

/// Backfill and update knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Length of the percentile window in years (365 days each)
    #[serde(default = "default_history_years")]
    pub history_years: u32,

    /// Pause between symbols during backfill
    #[serde(default = "default_backfill_delay_secs")]
    pub backfill_delay_secs: f64,

    /// Pause between upstream requests and symbols during update
    #[serde(default = "default_update_delay_secs")]
    pub update_delay_secs: f64,

    #[serde(default)]
    pub yield_direction: RankDirection,

    #[serde(default)]
    pub pe_direction: RankDirection,
}

fn default_history_years() -> u32 {
    5
}

fn default_backfill_delay_secs() -> f64 {
    0.5
}

fn default_update_delay_secs() -> f64 {
    1.0
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            history_years: default_history_years(),
            backfill_delay_secs: default_backfill_delay_secs(),
            update_delay_secs: default_update_delay_secs(),
            yield_direction: RankDirection::default(),
            pe_direction: RankDirection::default(),
        }
    }
}

impl PipelineConfig {
    pub fn backfill_delay(&self) -> Duration {
        secs(self.backfill_delay_secs)
    }

    pub fn update_delay(&self) -> Duration {
        secs(self.update_delay_secs)
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// "pretty" or "json"
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

fn secs(value: f64) -> Duration {
    if value.is_finite() && value > 0.0 {
        Duration::from_secs_f64(value)
    } else {
        Duration::ZERO
    }
}

// ============================================================================
// Root
// ============================================================================

/// Complete pipeline configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub provider: ProviderConfig,

    #[serde(default)]
    pub storage: StoreSettings,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load from the default path, falling back to defaults.
    pub fn load() -> Result<Self> {
        let path = config_path();
        if !path.exists() {
            tracing::debug!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Apply environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides<F>(&mut self, get: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(token) = get("TUSHARE_TOKEN").filter(|t| !t.is_empty()) {
            self.provider.token = Some(token);
        }
        if let Some(url) = get("TUSHARE_BASE_URL") {
            self.provider.base_url = url;
        }
        if let Some(path) = get("DIVIDEND_DB_PATH") {
            self.storage.db_path = Some(PathBuf::from(path));
        }
        if let Some(years) = get("DIVIDEND_HISTORY_YEARS") {
            if let Ok(y) = years.parse() {
                self.pipeline.history_years = y;
            }
        }
        if let Some(level) = get("DIVIDEND_LOG_LEVEL") {
            self.observability.log_level = level;
        }
        if let Some(format) = get("DIVIDEND_LOG_FORMAT") {
            self.observability.log_format = format;
        }
    }

    /// Check settings the pipeline cannot run without.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.provider.token.as_deref().map_or(true, str::is_empty) {
            return Err(ConfigError::MissingToken);
        }
        if self.pipeline.history_years == 0 {
            return Err(ConfigError::Invalid {
                field: "pipeline.history_years",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "retry.max_attempts",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.provider.base_url, "http://api.tushare.pro");
        assert_eq!(config.retry.policy(), RetryPolicy::default());
        assert_eq!(config.pipeline.history_years, 5);
        assert_eq!(config.pipeline.backfill_delay(), Duration::from_millis(500));
        assert_eq!(config.pipeline.update_delay(), Duration::from_secs(1));
        assert_eq!(config.pipeline.pe_direction, RankDirection::AtOrBelow);
        assert_eq!(config.observability.log_level, "info");
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: Config = serde_json::from_str(
            r#"{
                "provider": { "token": "abc" },
                "pipeline": { "history_years": 3, "pe_direction": "at_or_above" }
            }"#,
        )
        .unwrap();

        assert_eq!(config.provider.token.as_deref(), Some("abc"));
        assert_eq!(config.provider.timeout_secs, 30);
        assert_eq!(config.pipeline.history_years, 3);
        assert_eq!(config.pipeline.pe_direction, RankDirection::AtOrAbove);
        assert_eq!(config.pipeline.yield_direction, RankDirection::AtOrBelow);
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dividend.json");
        fs::write(&path, r#"{ "storage": { "db_path": "/tmp/x.db" } }"#).unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(
            config.storage.storage_config().db_path,
            PathBuf::from("/tmp/x.db")
        );

        fs::write(&path, "{ not json").unwrap();
        assert!(Config::load_from(&path).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("TUSHARE_TOKEN", "from-env"),
            ("DIVIDEND_DB_PATH", "/data/div.db"),
            ("DIVIDEND_HISTORY_YEARS", "7"),
            ("DIVIDEND_LOG_FORMAT", "json"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.provider.token.as_deref(), Some("from-env"));
        assert_eq!(config.storage.db_path, Some(PathBuf::from("/data/div.db")));
        assert_eq!(config.pipeline.history_years, 7);
        assert_eq!(config.observability.log_format, "json");
        assert_eq!(config.observability.log_level, "info");
    }

    #[test]
    fn test_bad_history_years_override_ignored() {
        let mut config = Config::default();
        config.apply_overrides(|k| (k == "DIVIDEND_HISTORY_YEARS").then(|| "five".to_string()));
        assert_eq!(config.pipeline.history_years, 5);
    }

    #[test]
    fn test_validate() {
        let mut config = Config::default();
        assert!(matches!(config.validate(), Err(ConfigError::MissingToken)));

        config.provider.token = Some("abc".into());
        assert!(config.validate().is_ok());

        config.pipeline.history_years = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "pipeline.history_years", .. })
        ));
    }
}
