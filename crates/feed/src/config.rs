//! # Feed Configuration
//!
//! Typed TOML configuration for the cache tiers, source timeouts and data
//! source descriptors. Everything is validated at load time so a bad value
//! fails fast instead of surfacing on the first request.
//!
//! ```toml
//! [cache]
//! strategy = "integrated"
//! directory = "./data/cache"
//! document_path = "./data/cache.db"
//!
//! [[data_sources]]
//! name = "tushare"
//! type = "tushare"
//! priority = 10
//! applicable_markets = ["a_shares"]
//! credentials = { token = "..." }
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use feed_cache::{BackendTimeouts, CacheStrategy, HealthConfig};
use feed_core::TtlPolicy;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::fallback::SourceTimeouts;
use crate::registry::DataSourceDescriptor;

/// Environment variable overriding `cache.strategy`.
pub const STRATEGY_ENV: &str = "FEED_CACHE_STRATEGY";

/// Errors raised while loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("Failed to read config file {}: {source}", path.display())]
    Io {
        /// File that was read.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The file is not valid TOML or does not match the schema.
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range or inconsistent.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Cache tiers.
    pub cache: CacheConfig,
    /// Upstream call limits.
    pub sources: SourcesConfig,
    /// Data source descriptors, in configuration order.
    pub data_sources: Vec<DataSourceDescriptor>,
}

/// Cache tier configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// `file` or `integrated`.
    pub strategy: CacheStrategy,
    /// FILE backend root.
    pub directory: PathBuf,
    /// DOCUMENT backend SQLite file.
    pub document_path: PathBuf,
    /// Redis URL for the FAST tier; the in-process store is used when unset.
    pub redis_url: Option<String>,
    /// Consecutive failures before a backend is marked unavailable.
    pub unavailable_after: u32,
    /// Seconds before an unavailable backend is retried.
    pub retry_after_secs: u64,
    /// Seconds between background probes; 0 disables probing.
    pub probe_interval_secs: u64,
    /// Per-tier timeouts.
    pub timeouts: TimeoutsConfig,
    /// Time-to-live per data type.
    pub ttl: TtlPolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            strategy: CacheStrategy::Integrated,
            directory: PathBuf::from("./data/cache"),
            document_path: PathBuf::from("./data/cache.db"),
            redis_url: None,
            unavailable_after: feed_cache::health::DEFAULT_UNAVAILABLE_AFTER,
            retry_after_secs: feed_cache::health::DEFAULT_RETRY_AFTER.as_secs(),
            probe_interval_secs: 60,
            timeouts: TimeoutsConfig::default(),
            ttl: TtlPolicy::default(),
        }
    }
}

/// Per-tier backend timeouts in milliseconds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutsConfig {
    /// FAST tier.
    pub fast_ms: u64,
    /// DOCUMENT tier.
    pub document_ms: u64,
    /// FILE tier.
    pub file_ms: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            fast_ms: 500,
            document_ms: 5000,
            file_ms: 5000,
        }
    }
}

/// Upstream call limits.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    /// Seconds allowed for one `fetch`.
    pub fetch_timeout_secs: u64,
    /// Seconds allowed for one `is_available`.
    pub availability_timeout_secs: u64,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_secs: 30,
            availability_timeout_secs: 5,
        }
    }
}

impl FeedConfig {
    /// Load configuration from a file, apply environment overrides and validate.
    ///
    /// # Errors
    /// Returns [`ConfigError`] if the file cannot be read or parsed, or a value
    /// is invalid.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let strategy = std::env::var(STRATEGY_ENV).ok();
        Self::load_with_strategy(path.as_ref(), strategy.as_deref())
    }

    /// [`Self::load`] with the strategy override passed in rather than read
    /// from the environment.
    fn load_with_strategy(path: &Path, strategy: Option<&str>) -> Result<Self, ConfigError> {
        debug!("Loading config from: {}", path.display());
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let mut config: Self = toml::from_str(&content)?;
        if let Some(strategy) = strategy {
            config.override_strategy(strategy)?;
        }
        config.validate()?;

        info!(
            strategy = %config.cache.strategy,
            sources = config.data_sources.len(),
            "Loaded feed configuration"
        );
        Ok(config)
    }

    /// Parse and validate configuration from a TOML string. No environment
    /// overrides are applied.
    ///
    /// # Errors
    /// Returns [`ConfigError`] if the text cannot be parsed or a value is invalid.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides.
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] if an override has an unknown value.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(strategy) = std::env::var(STRATEGY_ENV) {
            self.override_strategy(&strategy)?;
        }
        Ok(())
    }

    fn override_strategy(&mut self, raw: &str) -> Result<(), ConfigError> {
        self.cache.strategy = raw
            .parse()
            .map_err(|e| ConfigError::Invalid(format!("{STRATEGY_ENV}: {e}")))?;
        debug!(strategy = %self.cache.strategy, "Cache strategy overridden from environment");
        Ok(())
    }

    /// Check every value.
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] describing the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let timeouts = [
            ("cache.timeouts.fast_ms", self.cache.timeouts.fast_ms),
            ("cache.timeouts.document_ms", self.cache.timeouts.document_ms),
            ("cache.timeouts.file_ms", self.cache.timeouts.file_ms),
            ("sources.fetch_timeout_secs", self.sources.fetch_timeout_secs),
            ("sources.availability_timeout_secs", self.sources.availability_timeout_secs),
        ];
        if let Some((name, _)) = timeouts.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::Invalid(format!("{name} must be greater than zero")));
        }

        if self.cache.unavailable_after == 0 {
            return Err(ConfigError::Invalid(
                "cache.unavailable_after must be greater than zero".to_string(),
            ));
        }

        if let Some(field) = self.cache.ttl.first_zero() {
            return Err(ConfigError::Invalid(format!(
                "cache.ttl.{field} must be greater than zero"
            )));
        }

        if self.cache.directory.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("cache.directory must not be empty".to_string()));
        }

        validate_descriptors(&self.data_sources)
    }

    /// Health thresholds for the backend monitor.
    #[must_use]
    pub const fn health_config(&self) -> HealthConfig {
        HealthConfig {
            unavailable_after: self.cache.unavailable_after,
            retry_after: Duration::from_secs(self.cache.retry_after_secs),
        }
    }

    /// Per-tier backend timeouts.
    #[must_use]
    pub const fn backend_timeouts(&self) -> BackendTimeouts {
        BackendTimeouts {
            fast: Duration::from_millis(self.cache.timeouts.fast_ms),
            document: Duration::from_millis(self.cache.timeouts.document_ms),
            file: Duration::from_millis(self.cache.timeouts.file_ms),
        }
    }

    /// Upstream call timeouts.
    #[must_use]
    pub const fn source_timeouts(&self) -> SourceTimeouts {
        SourceTimeouts {
            fetch: Duration::from_secs(self.sources.fetch_timeout_secs),
            availability: Duration::from_secs(self.sources.availability_timeout_secs),
        }
    }

    /// Background probe interval, if probing is enabled.
    #[must_use]
    pub const fn probe_interval(&self) -> Option<Duration> {
        match self.cache.probe_interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

/// Reject empty or duplicate source names and empty adapter types.
pub(crate) fn validate_descriptors(
    descriptors: &[DataSourceDescriptor],
) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for descriptor in descriptors {
        let name = descriptor.name.trim();
        if name.is_empty() {
            return Err(ConfigError::Invalid("data source name must not be empty".to_string()));
        }
        if descriptor.source_type.trim().is_empty() {
            return Err(ConfigError::Invalid(format!("data source '{name}' has no type")));
        }
        if !seen.insert(name) {
            return Err(ConfigError::Invalid(format!("duplicate data source name '{name}'")));
        }
    }
    Ok(())
}
