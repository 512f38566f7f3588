//! Cache-first fetching with fallback across data sources.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use feed_cache::CacheOrchestrator;
use feed_core::{
    AdapterError, CacheEntry, CacheKey, DataRequest, DataType, FallbackError, Payload,
    SourceFailure,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::resolver::{DataSourcePriorityResolver, ResolvedSource};

/// Time limits for upstream calls.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SourceTimeouts {
    /// Limit for one `fetch`.
    pub fetch: Duration,
    /// Limit for one `is_available`.
    pub availability: Duration,
}

impl Default for SourceTimeouts {
    fn default() -> Self {
        Self {
            fetch: Duration::from_secs(30),
            availability: Duration::from_secs(5),
        }
    }
}

/// Result of a successful request.
#[derive(Clone, Debug, PartialEq)]
pub struct Fetched {
    /// The data.
    pub payload: Payload,
    /// Name of the source that produced the payload.
    pub source: String,
    /// True if served from the cache without calling any source.
    pub from_cache: bool,
    /// When the payload was written to the cache; `None` if the write failed.
    pub cached_at: Option<DateTime<Utc>>,
}

impl Fetched {
    fn from_entry(entry: CacheEntry) -> Self {
        Self {
            cached_at: Some(entry.created_at),
            payload: entry.payload,
            source: entry.source,
            from_cache: true,
        }
    }
}

/// Facade answering data requests from the cache or, on a miss, from the
/// highest-priority source that succeeds.
///
/// The facade never substitutes data: when every source fails the caller gets
/// [`FallbackError::AllSourcesFailed`] naming each attempt.
#[derive(Debug, Clone)]
pub struct FallbackOrchestrator {
    cache: Arc<CacheOrchestrator>,
    resolver: DataSourcePriorityResolver,
    timeouts: SourceTimeouts,
}

impl FallbackOrchestrator {
    /// Create a facade over a cache orchestrator and a resolver.
    #[must_use]
    pub fn new(cache: Arc<CacheOrchestrator>, resolver: DataSourcePriorityResolver) -> Self {
        Self {
            cache,
            resolver,
            timeouts: SourceTimeouts::default(),
        }
    }

    /// Set the upstream call limits.
    #[must_use]
    pub const fn with_timeouts(mut self, timeouts: SourceTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// The cache orchestrator.
    #[must_use]
    pub fn cache(&self) -> &Arc<CacheOrchestrator> {
        &self.cache
    }

    /// The source resolver.
    #[must_use]
    pub const fn resolver(&self) -> &DataSourcePriorityResolver {
        &self.resolver
    }

    /// Answer `request` from the cache or the first source that succeeds.
    ///
    /// Sources are tried in priority order, except that those named in
    /// [`DataRequest::preferred_sources`] go first.
    ///
    /// # Errors
    /// Returns [`FallbackError::NoSourceConfigured`] if no source applies to the
    /// market and the cache has nothing, or [`FallbackError::AllSourcesFailed`]
    /// if every source failed.
    pub async fn resolve_and_fetch(
        &self,
        request: &DataRequest,
    ) -> Result<Fetched, FallbackError> {
        self.resolve_and_fetch_with_cancel(request, &CancellationToken::new())
            .await
    }

    /// Like [`Self::resolve_and_fetch`], abandoning work as soon as `token` is
    /// cancelled.
    ///
    /// The cache write is the commit point. A cancellation seen before it
    /// stores nothing; once the write has started it runs to completion and
    /// the fetched data is returned.
    ///
    /// # Errors
    /// As [`Self::resolve_and_fetch`], plus [`FallbackError::Cancelled`].
    #[instrument(
        skip(self, request, token),
        fields(symbol = %request.symbol, data_type = %request.data_type)
    )]
    pub async fn resolve_and_fetch_with_cancel(
        &self,
        request: &DataRequest,
        token: &CancellationToken,
    ) -> Result<Fetched, FallbackError> {
        let market = request.market();
        let per_source = request.data_type.caches_per_source() && request.source.pinned().is_none();

        if !per_source {
            if let Some(entry) = self.check_cache(&request.cache_key(), token).await? {
                return Ok(Fetched::from_entry(entry));
            }
        }

        let sources = match request.source.pinned() {
            Some(name) => self.resolver.resolve_pinned(market, &request.symbol, name),
            None => {
                let preferred = &request.preferred_sources;
                self.resolver.resolve_preferred(market, &request.symbol, preferred)
            }
        };
        if sources.is_empty() {
            warn!(%market, "No data source configured");
            return Err(FallbackError::NoSourceConfigured { market });
        }

        if per_source {
            for source in &sources {
                let key = request.cache_key_for_source(source.name());
                if let Some(entry) = self.check_cache(&key, token).await? {
                    return Ok(Fetched::from_entry(entry));
                }
            }
        }

        self.try_sources(request, &sources, per_source, token).await
    }

    /// Cache lookup; backend failures count as a miss.
    async fn check_cache(
        &self,
        key: &CacheKey,
        token: &CancellationToken,
    ) -> Result<Option<CacheEntry>, FallbackError> {
        match cancellable(token, self.cache.lookup_key(key)).await? {
            Ok(hit) => Ok(hit),
            Err(e) => {
                warn!(key = %key, error = %e, "Cache lookup failed, treating as miss");
                Ok(None)
            }
        }
    }

    async fn try_sources(
        &self,
        request: &DataRequest,
        sources: &[ResolvedSource],
        per_source: bool,
        token: &CancellationToken,
    ) -> Result<Fetched, FallbackError> {
        let params = request.fetch_params();
        let mut attempts = Vec::new();
        let mut skipped = Vec::new();

        for source in sources {
            let available = cancellable(
                token,
                tokio::time::timeout(self.timeouts.availability, source.adapter.is_available()),
            )
            .await?
            .unwrap_or(false);
            if !available {
                debug!(source = source.name(), "Source unavailable, skipping");
                skipped.push(source.name().to_string());
                continue;
            }

            debug!(source = source.name(), "Fetching from source");
            let outcome = cancellable(
                token,
                tokio::time::timeout(
                    self.timeouts.fetch,
                    source.adapter.fetch(&request.symbol, request.data_type, &params),
                ),
            )
            .await?;

            let error = match outcome {
                Ok(Ok(payload)) if payload.is_empty() => {
                    AdapterError::NotFound(format!("{} returned no data", source.name()))
                }
                Ok(Ok(payload)) => {
                    return self.store(request, payload, source.name(), per_source, token).await;
                }
                Ok(Err(e)) => e,
                Err(_) => AdapterError::Timeout(self.timeouts.fetch),
            };

            warn!(source = source.name(), error = %error, "Source failed, trying next");
            attempts.push(SourceFailure {
                source: source.name().to_string(),
                error,
            });
        }

        warn!(
            attempted = attempts.len(),
            skipped = skipped.len(),
            "All data sources failed"
        );
        Err(FallbackError::AllSourcesFailed { attempts, skipped })
    }

    async fn store(
        &self,
        request: &DataRequest,
        payload: Payload,
        source: &str,
        per_source: bool,
        token: &CancellationToken,
    ) -> Result<Fetched, FallbackError> {
        if token.is_cancelled() {
            return Err(FallbackError::Cancelled);
        }

        let entry = if per_source {
            let pinned = request.clone().pinned_to(source);
            self.cache.entry_for(&pinned, payload, source)
        } else {
            self.cache.entry_for(request, payload, source)
        };

        // Commit point: once started, the write runs to completion so no tier
        // is left holding an entry the others lack.
        let cached_at = match self.cache.store(&entry).await {
            Ok(()) => Some(entry.created_at),
            Err(e) => {
                warn!(source, error = %e, "Failed to cache fetched data");
                None
            }
        };

        info!(source, items = entry.payload.len(), "Fetched from source");
        Ok(Fetched {
            payload: entry.payload,
            source: entry.source,
            from_cache: false,
            cached_at,
        })
    }

    /// Remove cache entries older than `older_than`; `None` covers every data type.
    pub async fn clear(&self, data_type: Option<DataType>, older_than: Duration) -> usize {
        self.cache.clear(data_type, older_than).await
    }
}

/// Run `fut` unless `token` is cancelled first.
async fn cancellable<T>(
    token: &CancellationToken,
    fut: impl Future<Output = T>,
) -> Result<T, FallbackError> {
    tokio::select! {
        biased;
        () = token.cancelled() => Err(FallbackError::Cancelled),
        out = fut => Ok(out),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{AdapterRegistry, DataSourceDescriptor, SourceConfig};
    use async_trait::async_trait;
    use chrono::{NaiveDate, TimeZone};
    use feed_cache::{BackendHealthMonitor, FileStore, Health, MemoryStore};
    use feed_core::{
        AdapterResult, BackendKind, BackendStore, FetchParams, KeyMetrics, MarketCategory,
        OhlcvBar, SourceAdapter, StoreError, StoreResult, Symbol,
    };
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Debug)]
    struct MockAdapter {
        name: &'static str,
        available: AtomicBool,
        result: Result<Payload, AdapterError>,
        delay: Duration,
        fetches: AtomicUsize,
    }

    impl MockAdapter {
        fn ok(name: &'static str, payload: Payload) -> Self {
            Self {
                name,
                available: AtomicBool::new(true),
                result: Ok(payload),
                delay: Duration::ZERO,
                fetches: AtomicUsize::new(0),
            }
        }

        fn failing(name: &'static str, error: AdapterError) -> Self {
            Self {
                result: Err(error),
                ..Self::ok(name, Payload::Bars(Vec::new()))
            }
        }

        fn unavailable(self) -> Self {
            self.available.store(false, Ordering::SeqCst);
            self
        }

        fn slow(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        fn fetches(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SourceAdapter for MockAdapter {
        fn name(&self) -> &str {
            self.name
        }

        async fn is_available(&self) -> bool {
            self.available.load(Ordering::SeqCst)
        }

        async fn fetch(&self, _: &Symbol, _: DataType, _: &FetchParams) -> AdapterResult<Payload> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.result.clone()
        }
    }

    /// Backend that always fails.
    #[derive(Debug)]
    struct DownStore(&'static str, BackendKind);

    #[async_trait]
    impl BackendStore for DownStore {
        fn name(&self) -> &str {
            self.0
        }

        fn kind(&self) -> BackendKind {
            self.1
        }

        async fn put(&self, _: &CacheEntry) -> StoreResult<()> {
            Err(StoreError::Unavailable("down".to_string()))
        }

        async fn get(&self, _: &CacheKey) -> StoreResult<Option<CacheEntry>> {
            Err(StoreError::Unavailable("down".to_string()))
        }

        async fn delete(&self, _: &CacheKey) -> StoreResult<()> {
            Err(StoreError::Unavailable("down".to_string()))
        }

        async fn delete_older_than(&self, _: DataType, _: Duration) -> StoreResult<usize> {
            Err(StoreError::Unavailable("down".to_string()))
        }

        async fn ping(&self) -> StoreResult<()> {
            Err(StoreError::Unavailable("down".to_string()))
        }
    }

    /// FILE store whose writes take `delay`.
    #[derive(Debug)]
    struct SlowFileStore {
        inner: FileStore,
        delay: Duration,
    }

    #[async_trait]
    impl BackendStore for SlowFileStore {
        fn name(&self) -> &str {
            self.inner.name()
        }

        fn kind(&self) -> BackendKind {
            BackendKind::File
        }

        async fn put(&self, entry: &CacheEntry) -> StoreResult<()> {
            tokio::time::sleep(self.delay).await;
            self.inner.put(entry).await
        }

        async fn get(&self, key: &CacheKey) -> StoreResult<Option<CacheEntry>> {
            self.inner.get(key).await
        }

        async fn delete(&self, key: &CacheKey) -> StoreResult<()> {
            self.inner.delete(key).await
        }

        async fn delete_older_than(
            &self,
            data_type: DataType,
            age: Duration,
        ) -> StoreResult<usize> {
            self.inner.delete_older_than(data_type, age).await
        }

        async fn ping(&self) -> StoreResult<()> {
            self.inner.ping().await
        }
    }

    fn bars() -> Payload {
        let ts = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        Payload::Bars(vec![OhlcvBar::new(ts, 9.3, 9.42, 9.25, 9.39, 1000.0)])
    }

    fn metrics(pe: f64) -> Payload {
        let day = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let mut m = KeyMetrics::new(Symbol::new("000001"), day);
        m.pe_ratio = Some(pe);
        Payload::Metrics(m)
    }

    fn request() -> DataRequest {
        DataRequest::historical("000001", "2024-01-01..2024-01-31".parse().unwrap())
    }

    struct Harness {
        facade: FallbackOrchestrator,
        memory: Arc<MemoryStore>,
    }

    fn harness(adapters: Vec<(Arc<MockAdapter>, i32)>) -> Harness {
        let memory = Arc::new(MemoryStore::new());
        let cache = CacheOrchestrator::new(Arc::new(BackendHealthMonitor::default()))
            .with_backend(memory.clone());
        harness_with_cache(cache, memory, adapters)
    }

    fn harness_with_cache(
        cache: CacheOrchestrator,
        memory: Arc<MemoryStore>,
        adapters: Vec<(Arc<MockAdapter>, i32)>,
    ) -> Harness {
        let mut registry = AdapterRegistry::new();
        let mut descriptors = Vec::new();
        for (adapter, priority) in adapters {
            descriptors.push(
                DataSourceDescriptor::new(adapter.name, adapter.name)
                    .with_priority(priority)
                    .with_markets([MarketCategory::AShares]),
            );
            registry.register(adapter);
        }
        let resolver = DataSourcePriorityResolver::new(
            Arc::new(SourceConfig::new(descriptors).unwrap()),
            Arc::new(registry),
        );
        let facade =
            FallbackOrchestrator::new(Arc::new(cache), resolver).with_timeouts(SourceTimeouts {
                fetch: Duration::from_millis(200),
                availability: Duration::from_millis(200),
            });
        Harness { facade, memory }
    }

    #[tokio::test]
    async fn test_miss_fetches_stores_and_serves_from_cache() {
        let tushare = Arc::new(MockAdapter::ok("tushare", bars()));
        let akshare = Arc::new(MockAdapter::ok("akshare", bars()));
        let h = harness(vec![(tushare.clone(), 10), (akshare.clone(), 5)]);

        let first = h.facade.resolve_and_fetch(&request()).await.unwrap();
        assert_eq!(first.source, "tushare");
        assert!(!first.from_cache);
        assert!(first.cached_at.is_some());
        assert_eq!(h.memory.len().await, 1);

        let second = h.facade.resolve_and_fetch(&request()).await.unwrap();
        assert!(second.from_cache);
        assert_eq!(second.source, "tushare");
        assert_eq!(second.payload, first.payload);
        assert_eq!(tushare.fetches(), 1);
        assert_eq!(akshare.fetches(), 0);
    }

    #[tokio::test]
    async fn test_unavailable_source_is_skipped() {
        let tushare = Arc::new(MockAdapter::ok("tushare", bars()).unavailable());
        let akshare = Arc::new(MockAdapter::ok("akshare", bars()));
        let h = harness(vec![(tushare.clone(), 10), (akshare.clone(), 5)]);

        let fetched = h.facade.resolve_and_fetch(&request()).await.unwrap();
        assert_eq!(fetched.source, "akshare");
        assert_eq!(tushare.fetches(), 0);
        assert_eq!(akshare.fetches(), 1);
    }

    #[tokio::test]
    async fn test_failure_falls_through_to_next_source() {
        let limited = AdapterError::RateLimited { retry_after: None };
        let tushare = Arc::new(MockAdapter::failing("tushare", limited));
        let akshare = Arc::new(MockAdapter::ok("akshare", Payload::Bars(Vec::new())));
        let baostock = Arc::new(MockAdapter::ok("baostock", bars()));
        let h = harness(vec![(tushare.clone(), 10), (akshare.clone(), 5), (baostock.clone(), 1)]);

        let fetched = h.facade.resolve_and_fetch(&request()).await.unwrap();
        assert_eq!(fetched.source, "baostock");
        assert_eq!((tushare.fetches(), akshare.fetches(), baostock.fetches()), (1, 1, 1));
    }

    #[tokio::test]
    async fn test_exhaustion_names_every_source() {
        let denied = AdapterError::AuthFailure("bad token".to_string());
        let tushare = Arc::new(MockAdapter::failing("tushare", denied));
        let akshare = Arc::new(MockAdapter::ok("akshare", bars()).slow(Duration::from_secs(5)));
        let baostock = Arc::new(MockAdapter::ok("baostock", bars()).unavailable());
        let h = harness(vec![(tushare, 10), (akshare, 5), (baostock, 1)]);

        let err = h.facade.resolve_and_fetch(&request()).await.unwrap_err();
        let FallbackError::AllSourcesFailed { attempts, skipped } = &err else {
            panic!("unexpected error: {err:?}");
        };
        assert_eq!(err.attempted_sources(), vec!["tushare", "akshare"]);
        assert!(matches!(attempts[0].error, AdapterError::AuthFailure(_)));
        assert!(matches!(attempts[1].error, AdapterError::Timeout(_)));
        assert_eq!(skipped, &vec!["baostock".to_string()]);
        assert_eq!(h.memory.len().await, 0);
    }

    #[tokio::test]
    async fn test_no_source_configured() {
        let h = harness(vec![(Arc::new(MockAdapter::ok("tushare", bars())), 10)]);
        let request = DataRequest::quote("AAPL");
        let err = h.facade.resolve_and_fetch(&request).await.unwrap_err();
        assert_eq!(err, FallbackError::NoSourceConfigured { market: MarketCategory::UsStocks });
    }

    #[tokio::test]
    async fn test_pinned_request_uses_only_that_source() {
        let tushare = Arc::new(MockAdapter::ok("tushare", bars()));
        let akshare = Arc::new(MockAdapter::ok("akshare", bars()));
        let h = harness(vec![(tushare.clone(), 10), (akshare.clone(), 5)]);

        let fetched = h.facade.resolve_and_fetch(&request().pinned_to("akshare")).await.unwrap();
        assert_eq!(fetched.source, "akshare");
        assert_eq!(tushare.fetches(), 0);
    }

    #[tokio::test]
    async fn test_fundamentals_cached_per_source_in_priority_order() {
        let missing = AdapterError::NotFound("x".to_string());
        let tushare = Arc::new(MockAdapter::failing("tushare", missing));
        let akshare = Arc::new(MockAdapter::ok("akshare", metrics(7.1)));
        let h = harness(vec![(tushare.clone(), 10), (akshare.clone(), 5)]);
        let request = DataRequest::fundamentals("000001");

        let first = h.facade.resolve_and_fetch(&request).await.unwrap();
        assert_eq!(first.source, "akshare");

        // Stored under the winning source's key, not the unified one
        let cache = h.facade.cache();
        let akshare_key = request.cache_key_for_source("akshare");
        assert!(cache.lookup_key(&akshare_key).await.unwrap().is_some());
        assert!(cache.lookup(&request).await.unwrap().is_none());

        let second = h.facade.resolve_and_fetch(&request).await.unwrap();
        assert!(second.from_cache);
        assert_eq!(second.source, "akshare");
        assert_eq!(akshare.fetches(), 1);
        assert_eq!(tushare.fetches(), 1);
    }

    #[tokio::test]
    async fn test_higher_priority_source_cache_wins() {
        let tushare = Arc::new(MockAdapter::ok("tushare", metrics(6.5)));
        let akshare = Arc::new(MockAdapter::ok("akshare", metrics(7.1)));
        let h = harness(vec![(tushare.clone(), 10), (akshare.clone(), 5)]);
        let request = DataRequest::fundamentals("000001");

        let cache = h.facade.cache();
        for (source, pe) in [("akshare", 7.1), ("tushare", 6.5)] {
            let entry = cache.entry_for(&request.clone().pinned_to(source), metrics(pe), source);
            cache.store(&entry).await.unwrap();
        }

        let fetched = h.facade.resolve_and_fetch(&request).await.unwrap();
        assert!(fetched.from_cache);
        assert_eq!(fetched.source, "tushare");
        assert_eq!(fetched.payload, metrics(6.5));
        assert_eq!(tushare.fetches() + akshare.fetches(), 0);
    }

    #[tokio::test]
    async fn test_cache_outage_still_returns_data() {
        let monitor = Arc::new(BackendHealthMonitor::default());
        let cache = CacheOrchestrator::new(monitor.clone())
            .with_backend(Arc::new(DownStore("redis", BackendKind::Fast)))
            .with_backend(Arc::new(DownStore("file", BackendKind::File)));
        let tushare = Arc::new(MockAdapter::ok("tushare", bars()));
        let unused = Arc::new(MemoryStore::new());
        let h = harness_with_cache(cache, unused, vec![(tushare.clone(), 10)]);

        let fetched = h.facade.resolve_and_fetch(&request()).await.unwrap();
        assert_eq!(fetched.source, "tushare");
        assert!(!fetched.from_cache);
        assert_eq!(fetched.cached_at, None);
        assert_ne!(monitor.status("redis"), Health::Healthy);
    }

    #[tokio::test]
    async fn test_degraded_tiers_fall_back_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let monitor = Arc::new(BackendHealthMonitor::default());
        let cache = CacheOrchestrator::new(monitor)
            .with_backend(Arc::new(DownStore("redis", BackendKind::Fast)))
            .with_backend(Arc::new(DownStore("sqlite", BackendKind::Document)))
            .with_backend(Arc::new(FileStore::new(dir.path())));
        let tushare = Arc::new(MockAdapter::ok("tushare", bars()));
        let unused = Arc::new(MemoryStore::new());
        let h = harness_with_cache(cache, unused, vec![(tushare.clone(), 10)]);

        let first = h.facade.resolve_and_fetch(&request()).await.unwrap();
        assert!(first.cached_at.is_some());
        let second = h.facade.resolve_and_fetch(&request()).await.unwrap();
        assert!(second.from_cache);
        assert_eq!(tushare.fetches(), 1);
    }

    #[tokio::test]
    async fn test_cancellation_stores_nothing() {
        let tushare = Arc::new(MockAdapter::ok("tushare", bars()).slow(Duration::from_millis(150)));
        let h = harness(vec![(tushare.clone(), 10)]);
        let token = CancellationToken::new();

        let canceller = {
            let token = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                token.cancel();
            })
        };

        let err = h
            .facade
            .resolve_and_fetch_with_cancel(&request(), &token)
            .await
            .unwrap_err();
        canceller.await.unwrap();

        assert_eq!(err, FallbackError::Cancelled);
        assert_eq!(tushare.fetches(), 1);
        assert_eq!(h.memory.len().await, 0);
    }

    #[tokio::test]
    async fn test_cancellation_during_store_commits_every_tier() {
        let dir = tempfile::tempdir().unwrap();
        let memory = Arc::new(MemoryStore::new());
        let file = Arc::new(SlowFileStore {
            inner: FileStore::new(dir.path()),
            delay: Duration::from_millis(300),
        });
        let cache = CacheOrchestrator::new(Arc::new(BackendHealthMonitor::default()))
            .with_backend(memory.clone())
            .with_backend(file.clone());
        let tushare = Arc::new(MockAdapter::ok("tushare", bars()));
        let h = harness_with_cache(cache, memory, vec![(tushare.clone(), 10)]);
        let token = CancellationToken::new();

        // Fires while the FILE mirror write is in flight
        let canceller = {
            let token = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                token.cancel();
            })
        };

        let fetched = h
            .facade
            .resolve_and_fetch_with_cancel(&request(), &token)
            .await
            .unwrap();
        canceller.await.unwrap();

        assert!(token.is_cancelled());
        assert_eq!(fetched.source, "tushare");
        assert!(fetched.cached_at.is_some());
        assert_eq!(h.memory.len().await, 1);
        let mirrored = file.get(&request().cache_key()).await.unwrap();
        assert_eq!(mirrored.map(|e| e.payload), Some(bars()));
    }

    #[tokio::test]
    async fn test_already_cancelled_token() {
        let tushare = Arc::new(MockAdapter::ok("tushare", bars()));
        let h = harness(vec![(tushare.clone(), 10)]);
        let token = CancellationToken::new();
        token.cancel();

        let err = h.facade.resolve_and_fetch_with_cancel(&request(), &token).await.unwrap_err();
        assert_eq!(err, FallbackError::Cancelled);
        assert_eq!(tushare.fetches(), 0);
    }

    #[tokio::test]
    async fn test_preferred_sources_tried_first() {
        let tushare = Arc::new(MockAdapter::ok("tushare", bars()));
        let akshare = Arc::new(MockAdapter::ok("akshare", bars()));
        let baostock = Arc::new(MockAdapter::ok("baostock", bars()));
        let h = harness(vec![(tushare.clone(), 10), (akshare.clone(), 5), (baostock.clone(), 1)]);

        let preferred = request().with_preferred_sources(["baostock", "akshare"]);
        let fetched = h.facade.resolve_and_fetch(&preferred).await.unwrap();
        assert_eq!(fetched.source, "baostock");
        assert_eq!((tushare.fetches(), akshare.fetches(), baostock.fetches()), (0, 0, 1));

        // Same cache key with or without a preference
        let again = h.facade.resolve_and_fetch(&request()).await.unwrap();
        assert!(again.from_cache);
        assert_eq!(again.source, "baostock");
    }

    #[tokio::test]
    async fn test_preferred_source_cache_checked_first() {
        let tushare = Arc::new(MockAdapter::ok("tushare", metrics(6.5)));
        let akshare = Arc::new(MockAdapter::ok("akshare", metrics(7.1)));
        let h = harness(vec![(tushare.clone(), 10), (akshare.clone(), 5)]);
        let request = DataRequest::fundamentals("000001");

        let cache = h.facade.cache();
        for (source, pe) in [("akshare", 7.1), ("tushare", 6.5)] {
            let entry = cache.entry_for(&request.clone().pinned_to(source), metrics(pe), source);
            cache.store(&entry).await.unwrap();
        }

        let preferred = request.with_preferred_sources(["akshare"]);
        let fetched = h.facade.resolve_and_fetch(&preferred).await.unwrap();
        assert!(fetched.from_cache);
        assert_eq!(fetched.source, "akshare");
        assert_eq!(fetched.payload, metrics(7.1));
        assert_eq!(tushare.fetches() + akshare.fetches(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_requests_share_health_monitor() {
        let dir = tempfile::tempdir().unwrap();
        let monitor = Arc::new(BackendHealthMonitor::default());
        let cache = CacheOrchestrator::new(monitor.clone())
            .with_backend(Arc::new(DownStore("redis", BackendKind::Fast)))
            .with_backend(Arc::new(FileStore::new(dir.path())));
        let tushare = Arc::new(MockAdapter::ok("tushare", bars()).slow(Duration::from_millis(20)));
        let unused = Arc::new(MemoryStore::new());
        let h = harness_with_cache(cache, unused, vec![(tushare.clone(), 10)]);

        let history = request();
        let quote = DataRequest::quote("000001");
        let fundamentals = DataRequest::fundamentals("000001");

        let (a, b, c) = tokio::join!(
            h.facade.resolve_and_fetch(&history),
            h.facade.resolve_and_fetch(&quote),
            h.facade.resolve_and_fetch(&fundamentals),
        );
        for fetched in [a, b, c] {
            let fetched = fetched.unwrap();
            assert_eq!(fetched.source, "tushare");
            assert!(!fetched.from_cache);
            assert!(fetched.cached_at.is_some());
        }
        assert_ne!(monitor.status("redis"), Health::Healthy);
        assert_eq!(monitor.status("file"), Health::Healthy);

        let (a, b, c) = tokio::join!(
            h.facade.resolve_and_fetch(&history),
            h.facade.resolve_and_fetch(&quote),
            h.facade.resolve_and_fetch(&fundamentals),
        );
        assert!([a, b, c].into_iter().all(|f| f.unwrap().from_cache));
        assert_eq!(tushare.fetches(), 3);
    }

    #[tokio::test]
    async fn test_clear_delegates_to_cache() {
        let h = harness(vec![(Arc::new(MockAdapter::ok("tushare", bars())), 10)]);
        h.facade.resolve_and_fetch(&request()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert_eq!(h.facade.clear(None, Duration::ZERO).await, 1);
        assert_eq!(h.memory.len().await, 0);
    }
}
