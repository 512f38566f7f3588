//! Tiered cache orchestration across FAST, DOCUMENT and FILE backends.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use feed_core::{
    BackendKind, BackendStore, CacheEntry, CacheKey, DataRequest, DataType, OrchestratorError,
    Payload, StoreError, StoreResult, TtlPolicy,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::health::{BackendDescriptor, BackendHealthMonitor, Health};
use crate::stats::{BackendStats, CacheStats, Outcome};

/// Which backends the orchestrator may use.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheStrategy {
    /// FILE backends only.
    File,
    /// FAST, DOCUMENT and FILE tiers.
    #[default]
    Integrated,
}

impl CacheStrategy {
    /// Backend kinds to try, in order.
    #[must_use]
    pub const fn preference(&self) -> &'static [BackendKind] {
        match self {
            Self::File => &[BackendKind::File],
            Self::Integrated => &BackendKind::PREFERENCE,
        }
    }

    /// Returns true if backends of `kind` may be used.
    #[must_use]
    pub fn allows(&self, kind: BackendKind) -> bool {
        self.preference().contains(&kind)
    }
}

impl fmt::Display for CacheStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File => f.write_str("file"),
            Self::Integrated => f.write_str("integrated"),
        }
    }
}

/// Error returned when a cache strategy name is not recognized.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown cache strategy '{0}' (expected 'file' or 'integrated')")]
pub struct UnknownStrategy(pub String);

impl FromStr for CacheStrategy {
    type Err = UnknownStrategy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" => Ok(Self::File),
            "integrated" => Ok(Self::Integrated),
            _ => Err(UnknownStrategy(s.to_string())),
        }
    }
}

/// Per-kind timeout applied to every backend call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BackendTimeouts {
    /// FAST backends.
    pub fast: Duration,
    /// DOCUMENT backends.
    pub document: Duration,
    /// FILE backends.
    pub file: Duration,
}

impl Default for BackendTimeouts {
    fn default() -> Self {
        Self {
            fast: Duration::from_millis(500),
            document: Duration::from_secs(5),
            file: Duration::from_secs(5),
        }
    }
}

impl BackendTimeouts {
    /// Timeout for a backend kind.
    #[must_use]
    pub const fn for_kind(&self, kind: BackendKind) -> Duration {
        match kind {
            BackendKind::Fast => self.fast,
            BackendKind::Document => self.document,
            BackendKind::File => self.file,
        }
    }
}

/// Serves and stores cache entries across tiers, guided by backend health.
///
/// Reads walk the tiers in preference order and stop at the first live hit.
/// Writes go to one backend only (the best healthy one), plus a best-effort
/// mirror to FILE when the winner is not FILE.
///
/// Every backend call is counted per backend; see [`Self::stats`].
pub struct CacheOrchestrator {
    backends: Vec<Arc<dyn BackendStore>>,
    monitor: Arc<BackendHealthMonitor>,
    strategy: CacheStrategy,
    timeouts: BackendTimeouts,
    ttl: TtlPolicy,
    stats: CacheStats,
}

impl fmt::Debug for CacheOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheOrchestrator")
            .field(
                "backends",
                &self.backends.iter().map(|b| b.name()).collect::<Vec<_>>(),
            )
            .field("strategy", &self.strategy)
            .field("timeouts", &self.timeouts)
            .finish_non_exhaustive()
    }
}

impl CacheOrchestrator {
    /// Create an orchestrator with no backends.
    #[must_use]
    pub fn new(monitor: Arc<BackendHealthMonitor>) -> Self {
        Self {
            backends: Vec::new(),
            monitor,
            strategy: CacheStrategy::default(),
            timeouts: BackendTimeouts::default(),
            ttl: TtlPolicy::default(),
            stats: CacheStats::default(),
        }
    }

    /// Add a backend and register it with the health monitor.
    #[must_use]
    pub fn with_backend(mut self, backend: Arc<dyn BackendStore>) -> Self {
        self.register(backend);
        self
    }

    /// Add a backend and register it with the health monitor.
    pub fn register(&mut self, backend: Arc<dyn BackendStore>) {
        debug!(backend = backend.name(), kind = %backend.kind(), "Registering cache backend");
        self.monitor.register(backend.name(), backend.kind());
        self.stats.register(backend.name());
        self.backends.push(backend);
    }

    /// Set the cache strategy.
    #[must_use]
    pub const fn with_strategy(mut self, strategy: CacheStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Set per-kind backend timeouts.
    #[must_use]
    pub const fn with_timeouts(mut self, timeouts: BackendTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Set the TTL policy used by [`Self::entry_for`].
    #[must_use]
    pub const fn with_ttl_policy(mut self, ttl: TtlPolicy) -> Self {
        self.ttl = ttl;
        self
    }

    /// Active cache strategy.
    #[must_use]
    pub const fn strategy(&self) -> CacheStrategy {
        self.strategy
    }

    /// TTL policy in use.
    #[must_use]
    pub const fn ttl_policy(&self) -> &TtlPolicy {
        &self.ttl
    }

    /// Hit, miss, store and error counts per registered backend.
    #[must_use]
    pub fn stats(&self) -> BTreeMap<String, BackendStats> {
        self.stats.snapshot()
    }

    /// Zero every counter.
    pub fn reset_stats(&self) {
        self.stats.reset();
    }

    /// Health monitor shared with this orchestrator.
    #[must_use]
    pub fn monitor(&self) -> &Arc<BackendHealthMonitor> {
        &self.monitor
    }

    fn backend(&self, name: &str) -> Option<&Arc<dyn BackendStore>> {
        self.backends
            .iter()
            .find(|b| b.name() == name && self.strategy.allows(b.kind()))
    }

    fn ordered(&self) -> Vec<&Arc<dyn BackendStore>> {
        self.monitor
            .ordered_backends(self.strategy.preference())
            .iter()
            .filter_map(|name| self.backend(name))
            .collect()
    }

    async fn timed<T>(
        &self,
        backend: &dyn BackendStore,
        op: impl Future<Output = StoreResult<T>>,
    ) -> StoreResult<T> {
        let limit = self.timeouts.for_kind(backend.kind());
        tokio::time::timeout(limit, op)
            .await
            .unwrap_or(Err(StoreError::Timeout(limit)))
    }

    /// Build an entry for `request` with the TTL policy's value.
    #[must_use]
    pub fn entry_for(&self, request: &DataRequest, payload: Payload, source: &str) -> CacheEntry {
        let ttl = self.ttl.ttl_for(request, Utc::now().date_naive());
        CacheEntry::new(request.cache_key(), payload, source, ttl)
    }

    /// Look up the entry for a request.
    ///
    /// # Errors
    /// Returns [`OrchestratorError::AllBackendsUnavailable`] if every attempted
    /// backend failed.
    pub async fn lookup(
        &self,
        request: &DataRequest,
    ) -> Result<Option<CacheEntry>, OrchestratorError> {
        self.lookup_key(&request.cache_key()).await
    }

    /// Look up an entry by key.
    ///
    /// Backends are tried in preference order; the first live hit wins. Expired
    /// and corrupt entries are deleted and treated as misses.
    ///
    /// # Errors
    /// Returns [`OrchestratorError::AllBackendsUnavailable`] if every attempted
    /// backend failed.
    #[instrument(skip(self), fields(key = %key))]
    pub async fn lookup_key(
        &self,
        key: &CacheKey,
    ) -> Result<Option<CacheEntry>, OrchestratorError> {
        let mut attempted = 0usize;
        let mut failed = 0usize;

        for backend in self.ordered() {
            attempted += 1;
            match self.timed(backend.as_ref(), backend.get(key)).await {
                Ok(Some(entry)) if entry.is_expired() => {
                    self.monitor.report_outcome(backend.name(), true);
                    self.stats.record(backend.name(), Outcome::Miss);
                    debug!(backend = backend.name(), "Expired entry, removing");
                    self.remove(backend.as_ref(), key).await;
                }
                Ok(Some(entry)) => {
                    self.monitor.report_outcome(backend.name(), true);
                    self.stats.record(backend.name(), Outcome::Hit);
                    debug!(backend = backend.name(), source = %entry.source, "Cache hit");
                    return Ok(Some(entry));
                }
                Ok(None) => {
                    self.monitor.report_outcome(backend.name(), true);
                    self.stats.record(backend.name(), Outcome::Miss);
                }
                Err(StoreError::Corrupt(reason)) => {
                    self.monitor.report_outcome(backend.name(), true);
                    self.stats.record(backend.name(), Outcome::Miss);
                    warn!(backend = backend.name(), %reason, "Corrupt cache entry, removing");
                    self.remove(backend.as_ref(), key).await;
                }
                Err(e) => {
                    self.monitor.report_outcome(backend.name(), false);
                    self.stats.record(backend.name(), Outcome::Error);
                    failed += 1;
                    warn!(backend = backend.name(), error = %e, "Cache backend read failed");
                }
            }
        }

        if failed == attempted {
            warn!(attempted, "No cache backend could answer");
            return Err(OrchestratorError::AllBackendsUnavailable);
        }
        debug!("Cache miss");
        Ok(None)
    }

    async fn remove(&self, backend: &dyn BackendStore, key: &CacheKey) {
        if let Err(e) = self.timed(backend, backend.delete(key)).await {
            debug!(backend = backend.name(), error = %e, "Failed to remove entry");
        }
    }

    /// Store an entry under `entry.key`.
    ///
    /// Writes to the highest-priority healthy backend (Healthy before Degraded),
    /// falling through on failure. When the winner is not FILE, the entry is
    /// mirrored to FILE on a best-effort basis.
    ///
    /// # Errors
    /// Returns [`OrchestratorError::AllBackendsUnavailable`] if no backend
    /// accepted the write.
    #[instrument(skip(self, entry), fields(key = %entry.key))]
    pub async fn store(&self, entry: &CacheEntry) -> Result<(), OrchestratorError> {
        let mut candidates = self.ordered();
        candidates.sort_by_key(|b| match self.monitor.status(b.name()) {
            Health::Healthy => 0,
            Health::Degraded => 1,
            Health::Unavailable => 2,
        });

        for backend in candidates {
            match self.timed(backend.as_ref(), backend.put(entry)).await {
                Ok(()) => {
                    self.monitor.report_outcome(backend.name(), true);
                    self.stats.record(backend.name(), Outcome::Stored);
                    debug!(backend = backend.name(), ttl = entry.ttl_seconds, "Stored entry");
                    if backend.kind() != BackendKind::File {
                        self.mirror_to_file(entry).await;
                    }
                    return Ok(());
                }
                Err(e) => {
                    self.monitor.report_outcome(backend.name(), false);
                    self.stats.record(backend.name(), Outcome::Error);
                    warn!(backend = backend.name(), error = %e, "Cache backend write failed");
                }
            }
        }

        Err(OrchestratorError::AllBackendsUnavailable)
    }

    async fn mirror_to_file(&self, entry: &CacheEntry) {
        let Some(file) = self
            .backends
            .iter()
            .find(|b| b.kind() == BackendKind::File && self.strategy.allows(b.kind()))
        else {
            return;
        };
        match self.timed(file.as_ref(), file.put(entry)).await {
            Ok(()) => {
                self.monitor.report_outcome(file.name(), true);
                self.stats.record(file.name(), Outcome::Stored);
            }
            Err(e) => {
                self.monitor.report_outcome(file.name(), false);
                self.stats.record(file.name(), Outcome::Error);
                warn!(backend = file.name(), error = %e, "Mirror write to file backend failed");
            }
        }
    }

    /// Build an entry for `request` and store it.
    ///
    /// # Errors
    /// Returns [`OrchestratorError::AllBackendsUnavailable`] if no backend
    /// accepted the write.
    pub async fn store_payload(
        &self,
        request: &DataRequest,
        payload: Payload,
        source: &str,
    ) -> Result<CacheEntry, OrchestratorError> {
        let entry = self.entry_for(request, payload, source);
        self.store(&entry).await?;
        Ok(entry)
    }

    /// Remove entries older than `older_than` from every backend.
    ///
    /// `None` clears every data type. Backend failures are logged and reported
    /// to the health monitor; the count covers the backends that answered.
    #[instrument(skip(self))]
    pub async fn clear(&self, data_type: Option<DataType>, older_than: Duration) -> usize {
        let data_types: Vec<DataType> =
            data_type.map_or_else(|| DataType::ALL.to_vec(), |dt| vec![dt]);
        let mut removed = 0;

        for backend in self.backends.iter().filter(|b| self.strategy.allows(b.kind())) {
            for dt in &data_types {
                match self
                    .timed(backend.as_ref(), backend.delete_older_than(*dt, older_than))
                    .await
                {
                    Ok(n) => {
                        self.monitor.report_outcome(backend.name(), true);
                        removed += n;
                    }
                    Err(e) => {
                        self.monitor.report_outcome(backend.name(), false);
                        warn!(
                            backend = backend.name(),
                            data_type = %dt,
                            error = %e,
                            "Cache sweep failed"
                        );
                    }
                }
            }
        }

        info!(removed, "Cache cleared");
        removed
    }

    /// Ping every backend and update health.
    ///
    /// A successful ping marks the backend healthy; a failed one marks it
    /// unavailable.
    pub async fn probe(&self) -> Vec<BackendDescriptor> {
        for backend in &self.backends {
            match self.timed(backend.as_ref(), backend.ping()).await {
                Ok(()) => self.monitor.report_outcome(backend.name(), true),
                Err(e) => {
                    warn!(backend = backend.name(), error = %e, "Backend probe failed");
                    self.monitor.mark_unavailable(backend.name());
                }
            }
        }
        self.monitor.descriptors()
    }

    /// Probe backends every `interval` until `token` is cancelled.
    pub fn spawn_prober(
        self: Arc<Self>,
        interval: Duration,
        token: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = token.cancelled() => {
                        debug!("Backend prober stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        self.probe().await;
                    }
                }
            }
        })
    }
}
