//! Adapter registry and the live set of data source descriptors.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use feed_core::{MarketCategory, SourceAdapter};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::{ConfigError, validate_descriptors};

/// Opaque credentials of a data source. Values never appear in `Debug` output.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credentials(BTreeMap<String, String>);

impl Credentials {
    /// Look up one credential value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Set one credential value.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.0.keys().map(|k| (k, "[REDACTED]")))
            .finish()
    }
}

/// Configuration of one upstream data source.
///
/// `source_type` names the registered adapter that serves this source; several
/// descriptors may share one adapter type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSourceDescriptor {
    /// Unique source name, recorded on every entry it produces.
    pub name: String,
    /// Registry key of the adapter.
    #[serde(rename = "type")]
    pub source_type: String,
    /// Higher is tried first. Falls back to the adapter's default priority.
    #[serde(default)]
    pub priority: Option<i32>,
    /// Disabled sources are never resolved.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Markets this source serves; empty means every market.
    #[serde(default)]
    pub applicable_markets: Vec<MarketCategory>,
    /// Adapter credentials.
    #[serde(default)]
    pub credentials: Credentials,
}

const fn default_enabled() -> bool {
    true
}

impl DataSourceDescriptor {
    /// Create an enabled descriptor serving every market.
    #[must_use]
    pub fn new(name: impl Into<String>, source_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source_type: source_type.into(),
            priority: None,
            enabled: true,
            applicable_markets: Vec::new(),
            credentials: Credentials::default(),
        }
    }

    /// Set the priority.
    #[must_use]
    pub const fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Restrict the source to `markets`.
    #[must_use]
    pub fn with_markets(mut self, markets: impl IntoIterator<Item = MarketCategory>) -> Self {
        for market in markets {
            if !self.applicable_markets.contains(&market) {
                self.applicable_markets.push(market);
            }
        }
        self
    }

    /// Set the enabled flag.
    #[must_use]
    pub const fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Set the credentials.
    #[must_use]
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    /// Returns true if the source serves `market`.
    #[must_use]
    pub fn applies_to(&self, market: MarketCategory) -> bool {
        self.applicable_markets.is_empty() || self.applicable_markets.contains(&market)
    }
}

/// Immutable, versioned view of the descriptor set.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceSnapshot {
    version: u64,
    descriptors: Vec<DataSourceDescriptor>,
}

impl SourceSnapshot {
    /// Version, bumped on every change.
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.version
    }

    /// Descriptors in configuration order.
    #[must_use]
    pub fn descriptors(&self) -> &[DataSourceDescriptor] {
        &self.descriptors
    }

    /// Descriptor by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&DataSourceDescriptor> {
        self.descriptors.iter().find(|d| d.name == name)
    }
}

/// Live descriptor set.
///
/// Readers take a cheap `Arc` snapshot; writers build a new snapshot and swap
/// it in, so a resolution in flight always sees one consistent version.
#[derive(Debug, Default)]
pub struct SourceConfig {
    current: RwLock<Arc<SourceSnapshot>>,
}

impl SourceConfig {
    /// Create a live set from validated descriptors (version 1).
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] on empty or duplicate names.
    pub fn new(descriptors: Vec<DataSourceDescriptor>) -> Result<Self, ConfigError> {
        validate_descriptors(&descriptors)?;
        Ok(Self {
            current: RwLock::new(Arc::new(SourceSnapshot {
                version: 1,
                descriptors,
            })),
        })
    }

    /// Current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<SourceSnapshot> {
        self.current.read().clone()
    }

    /// Current version.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.current.read().version
    }

    /// Replace every descriptor and return the new version.
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] on empty or duplicate names; the live set
    /// is left untouched.
    pub fn replace(&self, descriptors: Vec<DataSourceDescriptor>) -> Result<u64, ConfigError> {
        validate_descriptors(&descriptors)?;
        let mut current = self.current.write();
        let version = current.version + 1;
        *current = Arc::new(SourceSnapshot {
            version,
            descriptors,
        });
        info!(version, sources = current.descriptors.len(), "Data sources replaced");
        Ok(version)
    }

    /// Enable or disable a source. Returns false if no source has that name.
    pub fn set_enabled(&self, name: &str, enabled: bool) -> bool {
        self.update(name, |d| d.enabled = enabled)
    }

    /// Change the priority of a source. Returns false if no source has that name.
    pub fn set_priority(&self, name: &str, priority: i32) -> bool {
        self.update(name, |d| d.priority = Some(priority))
    }

    fn update(&self, name: &str, change: impl FnOnce(&mut DataSourceDescriptor)) -> bool {
        let mut current = self.current.write();
        let mut descriptors = current.descriptors.clone();
        let Some(descriptor) = descriptors.iter_mut().find(|d| d.name == name) else {
            return false;
        };
        change(descriptor);
        let version = current.version + 1;
        *current = Arc::new(SourceSnapshot {
            version,
            descriptors,
        });
        debug!(source = name, version, "Data source updated");
        true
    }
}

/// Adapters by registry key (the descriptor `type`).
#[derive(Default, Clone)]
pub struct AdapterRegistry {
    adapters: BTreeMap<String, Arc<dyn SourceAdapter>>,
}

impl fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("adapters", &self.adapters.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl AdapterRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under its own name.
    pub fn register(&mut self, adapter: Arc<dyn SourceAdapter>) {
        let key = adapter.name().to_string();
        self.register_as(key, adapter);
    }

    /// Register an adapter under an explicit key, replacing any previous one.
    pub fn register_as(&mut self, source_type: impl Into<String>, adapter: Arc<dyn SourceAdapter>) {
        let source_type = source_type.into();
        debug!(source_type = %source_type, adapter = adapter.name(), "Registering adapter");
        self.adapters.insert(source_type, adapter);
    }

    /// Register an adapter under its own name.
    #[must_use]
    pub fn with_adapter(mut self, adapter: Arc<dyn SourceAdapter>) -> Self {
        self.register(adapter);
        self
    }

    /// Adapter registered for `source_type`.
    #[must_use]
    pub fn get(&self, source_type: &str) -> Option<&Arc<dyn SourceAdapter>> {
        self.adapters.get(source_type)
    }

    /// Registered keys.
    pub fn source_types(&self) -> impl Iterator<Item = &str> {
        self.adapters.keys().map(String::as_str)
    }

    /// Number of registered adapters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    // Builder methods for the bundled adapters

    /// Add the Yahoo Finance adapter.
    #[cfg(feature = "yahoo")]
    #[must_use]
    pub fn with_yahoo(self) -> Self {
        self.with_adapter(Arc::new(feed_yahoo::YahooAdapter::new()))
    }

    /// Add the Tushare Pro adapter.
    #[cfg(feature = "tushare")]
    #[must_use]
    pub fn with_tushare(self, token: &str) -> Self {
        self.with_adapter(Arc::new(feed_tushare::TushareAdapter::new(token)))
    }

    /// Add a bundled adapter for every descriptor whose type is a bundled
    /// adapter and not yet registered. Credentials come from the first such
    /// descriptor.
    #[must_use]
    #[cfg_attr(not(any(feature = "yahoo", feature = "tushare")), allow(unused_mut))]
    pub fn with_bundled(mut self, descriptors: &[DataSourceDescriptor]) -> Self {
        for descriptor in descriptors {
            if self.adapters.contains_key(&descriptor.source_type) {
                continue;
            }
            match descriptor.source_type.as_str() {
                #[cfg(feature = "yahoo")]
                feed_yahoo::NAME => self = self.with_yahoo(),
                #[cfg(feature = "tushare")]
                feed_tushare::NAME => {
                    let token = descriptor.credentials.get("token").unwrap_or_default();
                    self = self.with_tushare(token);
                }
                _ => {}
            }
        }
        self
    }
}
