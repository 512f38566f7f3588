//! Explicit construction and shutdown of the whole cache stack.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use feed_cache::{
    BackendDescriptor, BackendHealthMonitor, BackendStats, CacheOrchestrator, CacheStrategy,
    FileStore, MemoryStore,
};
use feed_core::{BackendStore, DataRequest, DataType, FallbackError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{ConfigError, FeedConfig};
use crate::fallback::{FallbackOrchestrator, Fetched};
use crate::registry::{AdapterRegistry, SourceConfig};
use crate::resolver::DataSourcePriorityResolver;

/// Owns the backends, the health monitor, the live source set and the
/// background prober.
///
/// Nothing here is global: build one with [`CacheSystem::init`], share the
/// facade through [`CacheSystem::fallback`], and stop background work with
/// [`CacheSystem::close`]. Dropping the system also stops the prober.
#[derive(Debug)]
pub struct CacheSystem {
    fallback: FallbackOrchestrator,
    sources: Arc<SourceConfig>,
    shutdown: CancellationToken,
    prober: Option<JoinHandle<()>>,
}

impl CacheSystem {
    /// Build every backend allowed by the cache strategy, probe them once and
    /// start the background prober.
    ///
    /// A backend that cannot be opened is left out with a warning; the FILE
    /// backend is always present, so initialization only fails on invalid
    /// configuration.
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] if the configuration does not validate.
    pub async fn init(
        mut config: FeedConfig,
        adapters: AdapterRegistry,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let strategy = config.cache.strategy;
        let source_timeouts = config.source_timeouts();
        let sources = Arc::new(SourceConfig::new(std::mem::take(&mut config.data_sources))?);

        let monitor = Arc::new(BackendHealthMonitor::new(config.health_config()));
        let mut cache = CacheOrchestrator::new(Arc::clone(&monitor))
            .with_strategy(strategy)
            .with_timeouts(config.backend_timeouts())
            .with_ttl_policy(config.cache.ttl);

        if strategy == CacheStrategy::Integrated {
            cache.register(fast_backend(&config).await);
            if let Some(document) = document_backend(&config) {
                cache.register(document);
            }
        }
        cache.register(Arc::new(FileStore::new(&config.cache.directory)));

        let cache = Arc::new(cache);
        for backend in cache.probe().await {
            debug!(backend = %backend.name, health = %backend.health, "Initial probe");
        }

        let shutdown = CancellationToken::new();
        let prober = config
            .probe_interval()
            .map(|interval| Arc::clone(&cache).spawn_prober(interval, shutdown.child_token()));

        let resolver = DataSourcePriorityResolver::new(Arc::clone(&sources), Arc::new(adapters));
        let fallback = FallbackOrchestrator::new(cache, resolver).with_timeouts(source_timeouts);

        info!(
            strategy = %strategy,
            sources = sources.snapshot().descriptors().len(),
            "Cache system initialized"
        );

        Ok(Self {
            fallback,
            sources,
            shutdown,
            prober,
        })
    }

    /// The request facade.
    #[must_use]
    pub const fn fallback(&self) -> &FallbackOrchestrator {
        &self.fallback
    }

    /// The cache orchestrator.
    #[must_use]
    pub fn cache(&self) -> &Arc<CacheOrchestrator> {
        self.fallback.cache()
    }

    /// The live data source set.
    #[must_use]
    pub fn sources(&self) -> &Arc<SourceConfig> {
        &self.sources
    }

    /// Health snapshot of every backend.
    #[must_use]
    pub fn health(&self) -> Vec<BackendDescriptor> {
        self.cache().monitor().descriptors()
    }

    /// Hit, miss, store and error counts per backend.
    #[must_use]
    pub fn stats(&self) -> BTreeMap<String, BackendStats> {
        self.cache().stats()
    }

    /// See [`FallbackOrchestrator::resolve_and_fetch`].
    ///
    /// # Errors
    /// As [`FallbackOrchestrator::resolve_and_fetch`].
    pub async fn resolve_and_fetch(
        &self,
        request: &DataRequest,
    ) -> Result<Fetched, FallbackError> {
        self.fallback.resolve_and_fetch(request).await
    }

    /// See [`FallbackOrchestrator::clear`].
    pub async fn clear(&self, data_type: Option<DataType>, older_than: Duration) -> usize {
        self.fallback.clear(data_type, older_than).await
    }

    /// Stop the prober and wait for it to finish.
    pub async fn close(mut self) {
        self.shutdown.cancel();
        if let Some(prober) = self.prober.take() {
            if let Err(e) = prober.await {
                warn!(error = %e, "Backend prober ended abnormally");
            }
        }
        info!("Cache system closed");
    }
}

impl Drop for CacheSystem {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[cfg(feature = "cache-redis")]
async fn fast_backend(config: &FeedConfig) -> Arc<dyn BackendStore> {
    if let Some(url) = &config.cache.redis_url {
        match feed_cache::RedisStore::connect(url).await {
            Ok(store) => return Arc::new(store),
            Err(e) => warn!(error = %e, "Redis unavailable, using in-memory FAST tier"),
        }
    }
    Arc::new(MemoryStore::new())
}

#[cfg(not(feature = "cache-redis"))]
async fn fast_backend(config: &FeedConfig) -> Arc<dyn BackendStore> {
    if config.cache.redis_url.is_some() {
        warn!("redis_url set but the cache-redis feature is disabled, using in-memory FAST tier");
    }
    Arc::new(MemoryStore::new())
}

#[cfg(feature = "cache-sqlite")]
fn document_backend(config: &FeedConfig) -> Option<Arc<dyn BackendStore>> {
    match feed_cache::DocumentStore::open(&config.cache.document_path) {
        Ok(store) => Some(Arc::new(store)),
        Err(e) => {
            warn!(
                path = %config.cache.document_path.display(),
                error = %e,
                "Document store unavailable, continuing without it"
            );
            None
        }
    }
}

#[cfg(not(feature = "cache-sqlite"))]
fn document_backend(_config: &FeedConfig) -> Option<Arc<dyn BackendStore>> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::DataSourceDescriptor;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use feed_cache::Health;
    use feed_core::{
        AdapterResult, BackendKind, FetchParams, OhlcvBar, Payload, SourceAdapter, Symbol,
    };

    #[derive(Debug)]
    struct StaticAdapter;

    #[async_trait]
    impl SourceAdapter for StaticAdapter {
        fn name(&self) -> &str {
            "static"
        }

        async fn is_available(&self) -> bool {
            true
        }

        async fn fetch(&self, _: &Symbol, _: DataType, _: &FetchParams) -> AdapterResult<Payload> {
            let ts = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
            Ok(Payload::Bars(vec![OhlcvBar::new(ts, 1.0, 2.0, 0.5, 1.5, 10.0)]))
        }
    }

    fn config(dir: &std::path::Path, strategy: CacheStrategy) -> FeedConfig {
        let mut config = FeedConfig::default();
        config.cache.strategy = strategy;
        config.cache.directory = dir.join("files");
        config.cache.document_path = dir.join("cache.db");
        config.cache.probe_interval_secs = 1;
        config.data_sources =
            vec![DataSourceDescriptor::new("static", "static").with_priority(1)];
        config
    }

    fn adapters() -> AdapterRegistry {
        AdapterRegistry::new().with_adapter(Arc::new(StaticAdapter))
    }

    #[tokio::test]
    async fn test_integrated_init_builds_all_tiers() {
        let dir = tempfile::tempdir().unwrap();
        let system = CacheSystem::init(config(dir.path(), CacheStrategy::Integrated), adapters())
            .await
            .unwrap();

        let kinds: Vec<BackendKind> = system.health().iter().map(|d| d.kind).collect();
        assert!(kinds.contains(&BackendKind::Fast));
        assert!(kinds.contains(&BackendKind::File));
        assert_eq!(kinds.contains(&BackendKind::Document), cfg!(feature = "cache-sqlite"));
        assert!(system.health().iter().all(|d| d.health == Health::Healthy));

        let request = DataRequest::historical("AAPL", "2024-01-01..2024-01-31".parse().unwrap());
        let first = system.resolve_and_fetch(&request).await.unwrap();
        assert_eq!(first.source, "static");
        let second = system.resolve_and_fetch(&request).await.unwrap();
        assert!(second.from_cache);

        let stats = system.stats();
        assert_eq!(stats.len(), system.health().len());
        let fast = system
            .health()
            .into_iter()
            .find(|d| d.kind == BackendKind::Fast)
            .unwrap();
        assert_eq!(stats[&fast.name].hits, 1);
        assert_eq!(stats[&fast.name].stores, 1);
        assert_eq!(stats["file"].stores, 1);

        system.close().await;
    }

    #[tokio::test]
    async fn test_file_strategy_builds_only_file_tier() {
        let dir = tempfile::tempdir().unwrap();
        let system = CacheSystem::init(config(dir.path(), CacheStrategy::File), adapters())
            .await
            .unwrap();

        let health = system.health();
        assert_eq!(health.len(), 1);
        assert_eq!(health[0].kind, BackendKind::File);

        let request = DataRequest::quote("AAPL");
        system.resolve_and_fetch(&request).await.unwrap();
        assert!(dir.path().join("files").join("quote_snapshot").is_dir());
        assert!(!dir.path().join("cache.db").exists());

        system.close().await;
    }

    #[tokio::test]
    async fn test_init_rejects_invalid_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path(), CacheStrategy::Integrated);
        config.sources.fetch_timeout_secs = 0;
        let err = CacheSystem::init(config, adapters()).await.unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[tokio::test]
    async fn test_bad_sources_fail_before_backends_open() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path(), CacheStrategy::Integrated);
        config
            .data_sources
            .push(DataSourceDescriptor::new("static", "static"));

        let err = CacheSystem::init(config, adapters()).await.unwrap_err();
        assert!(err.to_string().contains("duplicate data source name 'static'"));
        assert!(!dir.path().join("files").exists());
        assert!(!dir.path().join("cache.db").exists());
    }

    #[tokio::test]
    async fn test_live_source_changes() {
        let dir = tempfile::tempdir().unwrap();
        let system = CacheSystem::init(config(dir.path(), CacheStrategy::File), adapters())
            .await
            .unwrap();

        assert!(system.sources().set_enabled("static", false));
        let err = system
            .resolve_and_fetch(&DataRequest::quote("AAPL"))
            .await
            .unwrap_err();
        assert!(matches!(err, FallbackError::NoSourceConfigured { .. }));

        system.close().await;
    }
}
