//! Configuration types for Siphon components.
//!
//! Every type carries working defaults. The optional `siphon.toml` file can
//! override any field; omitted fields keep their default.
//!
//! ```toml
//! [db]
//! max_connections = 5
//!
//! [sync]
//! property_concurrency = 2
//! chunk_concurrency = 4
//!
//! [http]
//! max_attempts = 5
//!
//! [retention]
//! recent_days = 90
//! target_classification = ["usa", "gbr"]
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::AppError;

/// Database connection pool configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DbConfig {
    /// Pool size for file databases. In-memory databases always use one.
    pub max_connections: u32,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self { max_connections: 5 }
    }
}

// =============================================================================
// HTTP
// =============================================================================

/// HTTP client configuration for the upstream reporting API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Total attempts per request, including the first.
    pub max_attempts: u32,
    /// Backoff delay before the second attempt, in milliseconds.
    pub base_delay_ms: u64,
    /// Upper bound for any single backoff delay, in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_attempts: 5,
            base_delay_ms: 500,
            max_delay_ms: 32_000,
        }
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Delay before retry number `attempt` (1-based): `base * 2^(attempt-1)`,
    /// capped at `max_delay`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(20);
        let delay = self.base_delay().saturating_mul(1u32 << exp);
        delay.min(self.max_delay())
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_delays(mut self, base: Duration, max: Duration) -> Self {
        self.base_delay_ms = base.as_millis() as u64;
        self.max_delay_ms = max.as_millis() as u64;
        self
    }
}

// =============================================================================
// Sync
// =============================================================================

/// Orchestrator configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Properties processed at once within one job.
    pub property_concurrency: usize,
    /// Chunks fetched at once within one property.
    pub chunk_concurrency: usize,
    /// Width of one chunk, in days.
    pub chunk_days: u32,
    /// How far back to start when a property has no stored data.
    pub default_lookback_days: u32,
    /// Days subtracted from today to get the default end date.
    pub end_date_lag_days: u32,
    /// Rows requested per page; the upstream maximum.
    pub page_size: usize,
    /// Terminal jobs kept in the in-memory registry.
    pub job_history_limit: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            property_concurrency: 2,
            chunk_concurrency: 4,
            chunk_days: 90,
            default_lookback_days: 480,
            end_date_lag_days: 3,
            page_size: 25_000,
            job_history_limit: 20,
        }
    }
}

impl SyncConfig {
    pub fn with_concurrency(mut self, properties: usize, chunks: usize) -> Self {
        self.property_concurrency = properties.max(1);
        self.chunk_concurrency = chunks.max(1);
        self
    }

    pub fn with_chunk_days(mut self, days: u32) -> Self {
        self.chunk_days = days.max(1);
        self
    }

    pub fn with_page_size(mut self, size: usize) -> Self {
        self.page_size = size.max(1);
        self
    }

    pub fn with_job_history_limit(mut self, limit: usize) -> Self {
        self.job_history_limit = limit;
        self
    }

    pub fn with_default_lookback_days(mut self, days: u32) -> Self {
        self.default_lookback_days = days;
        self
    }

    pub fn with_end_date_lag_days(mut self, days: u32) -> Self {
        self.end_date_lag_days = days;
        self
    }

    /// Clamps zero limits read from a config file up to one.
    pub fn sanitized(self) -> Self {
        let chunk_days = self.chunk_days;
        let page_size = self.page_size;
        let (p, c) = (self.property_concurrency, self.chunk_concurrency);
        self.with_concurrency(p, c)
            .with_chunk_days(chunk_days)
            .with_page_size(page_size)
    }
}

// =============================================================================
// Retention
// =============================================================================

/// Age- and classification-aware pruning policy.
///
/// The classification key is the row's `country` dimension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionPolicy {
    /// Rows newer than this many days are never deleted.
    pub recent_days: u32,
    /// Target rows with zero clicks and fewer impressions than this are deleted.
    pub target_min_impressions: i64,
    /// Delete non-target rows with zero clicks regardless of impressions.
    pub prune_non_target_zero_clicks: bool,
    /// Classification keys treated preferentially.
    pub target_classification: BTreeSet<String>,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            recent_days: 90,
            target_min_impressions: 5,
            prune_non_target_zero_clicks: true,
            target_classification: ["usa", "gbr", "can", "aus"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

impl RetentionPolicy {
    pub fn with_recent_days(mut self, days: u32) -> Self {
        self.recent_days = days;
        self
    }

    pub fn with_target_min_impressions(mut self, impressions: i64) -> Self {
        self.target_min_impressions = impressions;
        self
    }

    pub fn with_prune_non_target_zero_clicks(mut self, enabled: bool) -> Self {
        self.prune_non_target_zero_clicks = enabled;
        self
    }

    pub fn with_targets<I, S>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.target_classification = targets.into_iter().map(Into::into).collect();
        self
    }
}

// =============================================================================
// Configuration file (siphon.toml)
// =============================================================================

/// Root structure of `siphon.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiphonConfig {
    pub db: DbConfig,
    pub sync: SyncConfig,
    pub http: HttpConfig,
    pub retention: RetentionPolicy,
}

/// Default configuration file name.
pub const CONFIG_FILE_NAME: &str = "siphon.toml";

/// Returns the default configuration directory: `~/.config/siphon/`.
pub fn default_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("siphon"))
}

/// Returns the default configuration file path: `~/.config/siphon/siphon.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    default_config_dir().map(|p| p.join(CONFIG_FILE_NAME))
}

/// Load configuration from a TOML file.
///
/// # Arguments
/// * `path` - Optional custom path. If `None`, uses the default path.
///
/// # Returns
/// * `Ok(config)` - Loaded configuration, or defaults when the default file
///   does not exist
/// * `Err(e)` - An explicit path is missing, or the file is invalid
pub fn load_config(path: Option<PathBuf>) -> Result<SiphonConfig, AppError> {
    let using_default_path = path.is_none();
    let config_path = match path.or_else(default_config_path) {
        Some(p) => p,
        None => return Ok(SiphonConfig::default()),
    };

    if !config_path.exists() {
        if using_default_path {
            tracing::debug!(
                path = %config_path.display(),
                "No config file found, using defaults"
            );
            return Ok(SiphonConfig::default());
        }
        return Err(AppError::ConfigError(format!(
            "Config file not found: {}",
            config_path.display()
        )));
    }

    let content = std::fs::read_to_string(&config_path).map_err(|e| {
        AppError::ConfigError(format!(
            "Failed to read config file '{}': {}",
            config_path.display(),
            e
        ))
    })?;

    let mut config: SiphonConfig = toml::from_str(&content).map_err(|e| {
        AppError::ConfigError(format!(
            "Invalid TOML in '{}': {}",
            config_path.display(),
            e
        ))
    })?;
    config.sync = config.sync.sanitized();

    Ok(config)
}
