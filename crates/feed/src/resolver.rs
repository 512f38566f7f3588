//! Priority resolution of data sources per market.

use std::fmt;
use std::sync::Arc;

use feed_core::{MarketCategory, SourceAdapter, Symbol};
use tracing::{debug, warn};

use crate::registry::{AdapterRegistry, DataSourceDescriptor, SourceConfig};

/// A descriptor paired with the adapter that serves it.
#[derive(Clone)]
pub struct ResolvedSource {
    /// Descriptor as of the snapshot used for resolution.
    pub descriptor: DataSourceDescriptor,
    /// Adapter registered for the descriptor's type.
    pub adapter: Arc<dyn SourceAdapter>,
    /// Effective priority (configured, or the adapter default).
    pub priority: i32,
}

impl ResolvedSource {
    /// Source name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }
}

impl fmt::Debug for ResolvedSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedSource")
            .field("name", &self.descriptor.name)
            .field("adapter", &self.adapter.name())
            .field("priority", &self.priority)
            .finish()
    }
}

/// Computes the ordered list of sources to try for a market.
///
/// Resolution reads the live [`SourceConfig`] snapshot on every call, so
/// priority and enable/disable changes apply to the next request.
#[derive(Debug, Clone)]
pub struct DataSourcePriorityResolver {
    sources: Arc<SourceConfig>,
    adapters: Arc<AdapterRegistry>,
}

impl DataSourcePriorityResolver {
    /// Create a resolver over a live descriptor set and an adapter registry.
    #[must_use]
    pub const fn new(sources: Arc<SourceConfig>, adapters: Arc<AdapterRegistry>) -> Self {
        Self { sources, adapters }
    }

    /// The live descriptor set.
    #[must_use]
    pub fn sources(&self) -> &Arc<SourceConfig> {
        &self.sources
    }

    /// The adapter registry.
    #[must_use]
    pub fn adapters(&self) -> &Arc<AdapterRegistry> {
        &self.adapters
    }

    /// Enabled sources serving `market`, highest priority first.
    ///
    /// Ties keep configuration order. Descriptors whose type has no registered
    /// adapter are dropped. An empty result means no source is configured.
    #[must_use]
    pub fn resolve(&self, market: MarketCategory, symbol: &Symbol) -> Vec<ResolvedSource> {
        self.resolve_filtered(market, symbol, |_| true)
    }

    /// Like [`Self::resolve`], restricted to the source called `source`.
    #[must_use]
    pub fn resolve_pinned(
        &self,
        market: MarketCategory,
        symbol: &Symbol,
        source: &str,
    ) -> Vec<ResolvedSource> {
        self.resolve_filtered(market, symbol, |d| d.name == source)
    }

    /// Like [`Self::resolve`], with the sources named in `preferred` moved to
    /// the front in that order.
    ///
    /// Names that match no resolved source are ignored. Sources not named keep
    /// their priority order after the preferred ones.
    #[must_use]
    pub fn resolve_preferred(
        &self,
        market: MarketCategory,
        symbol: &Symbol,
        preferred: &[String],
    ) -> Vec<ResolvedSource> {
        let resolved = self.resolve(market, symbol);
        if preferred.is_empty() {
            return resolved;
        }

        let rank = |s: &ResolvedSource| preferred.iter().position(|p| p == s.name());
        let (mut front, rest): (Vec<_>, Vec<_>) =
            resolved.into_iter().partition(|s| rank(s).is_some());
        front.sort_by_key(rank);
        front.extend(rest);

        debug!(
            %market,
            symbol = %symbol,
            ?preferred,
            sources = ?front.iter().map(ResolvedSource::name).collect::<Vec<_>>(),
            "Reordered data sources by preference"
        );
        front
    }

    fn resolve_filtered(
        &self,
        market: MarketCategory,
        symbol: &Symbol,
        keep: impl Fn(&DataSourceDescriptor) -> bool,
    ) -> Vec<ResolvedSource> {
        let snapshot = self.sources.snapshot();

        let mut resolved: Vec<ResolvedSource> = snapshot
            .descriptors()
            .iter()
            .filter(|d| d.enabled && d.applies_to(market) && keep(d))
            .filter_map(|d| {
                let Some(adapter) = self.adapters.get(&d.source_type) else {
                    warn!(
                        source = %d.name,
                        source_type = %d.source_type,
                        "No adapter registered, skipping source"
                    );
                    return None;
                };
                Some(ResolvedSource {
                    descriptor: d.clone(),
                    adapter: Arc::clone(adapter),
                    priority: d.priority.unwrap_or_else(|| adapter.default_priority()),
                })
            })
            .collect();

        // sort_by_key is stable
        resolved.sort_by_key(|s| std::cmp::Reverse(s.priority));

        debug!(
            %market,
            symbol = %symbol,
            version = snapshot.version(),
            sources = ?resolved.iter().map(ResolvedSource::name).collect::<Vec<_>>(),
            "Resolved data sources"
        );
        resolved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use feed_core::{AdapterError, AdapterResult, DataType, FetchParams, Payload};

    #[derive(Debug)]
    struct StubAdapter {
        name: &'static str,
        default_priority: i32,
    }

    #[async_trait]
    impl SourceAdapter for StubAdapter {
        fn name(&self) -> &str {
            self.name
        }

        fn default_priority(&self) -> i32 {
            self.default_priority
        }

        async fn is_available(&self) -> bool {
            true
        }

        async fn fetch(
            &self,
            symbol: &Symbol,
            _: DataType,
            _: &FetchParams,
        ) -> AdapterResult<Payload> {
            Err(AdapterError::NotFound(symbol.to_string()))
        }
    }

    fn registry() -> Arc<AdapterRegistry> {
        let mut registry = AdapterRegistry::new();
        let defaults = [("tushare", 3), ("akshare", 2), ("baostock", 1), ("yahoo", 1)];
        for (name, default_priority) in defaults {
            registry.register(Arc::new(StubAdapter { name, default_priority }));
        }
        Arc::new(registry)
    }

    fn resolver(descriptors: Vec<DataSourceDescriptor>) -> DataSourcePriorityResolver {
        let sources = Arc::new(SourceConfig::new(descriptors).unwrap());
        DataSourcePriorityResolver::new(sources, registry())
    }

    fn names(sources: &[ResolvedSource]) -> Vec<&str> {
        sources.iter().map(ResolvedSource::name).collect()
    }

    fn cn() -> [MarketCategory; 1] {
        [MarketCategory::AShares]
    }

    #[test]
    fn test_priority_order() {
        let resolver = resolver(vec![
            DataSourceDescriptor::new("akshare", "akshare").with_priority(5).with_markets(cn()),
            DataSourceDescriptor::new("tushare", "tushare").with_priority(10).with_markets(cn()),
        ]);
        let symbol = Symbol::new("000001");
        let sources = resolver.resolve(MarketCategory::AShares, &symbol);
        assert_eq!(names(&sources), vec!["tushare", "akshare"]);
        assert_eq!(sources[0].priority, 10);

        // Deterministic across calls
        let again = resolver.resolve(MarketCategory::AShares, &symbol);
        assert_eq!(names(&sources), names(&again));
    }

    #[test]
    fn test_filters_market_and_enabled() {
        let resolver = resolver(vec![
            DataSourceDescriptor::new("tushare", "tushare").with_priority(10).with_markets(cn()),
            DataSourceDescriptor::new("akshare", "akshare").with_priority(5).with_enabled(false),
            DataSourceDescriptor::new("yahoo", "yahoo")
                .with_markets([MarketCategory::UsStocks, MarketCategory::HkStocks]),
            DataSourceDescriptor::new("baostock", "baostock"),
        ]);

        let us = resolver.resolve(MarketCategory::UsStocks, &Symbol::new("AAPL"));
        assert_eq!(names(&us), vec!["yahoo", "baostock"]);

        let cn = resolver.resolve(MarketCategory::AShares, &Symbol::new("000001"));
        assert_eq!(names(&cn), vec!["tushare", "baostock"]);
    }

    #[test]
    fn test_ties_keep_configuration_order() {
        let resolver = resolver(vec![
            DataSourceDescriptor::new("yahoo", "yahoo").with_priority(1),
            DataSourceDescriptor::new("baostock", "baostock").with_priority(1),
            DataSourceDescriptor::new("akshare", "akshare"),
        ]);
        let sources = resolver.resolve(MarketCategory::AShares, &Symbol::new("000001"));
        assert_eq!(names(&sources), vec!["akshare", "yahoo", "baostock"]);
    }

    #[test]
    fn test_unregistered_type_dropped() {
        let resolver = resolver(vec![
            DataSourceDescriptor::new("eastmoney", "eastmoney").with_priority(100),
            DataSourceDescriptor::new("tushare", "tushare"),
        ]);
        let sources = resolver.resolve(MarketCategory::AShares, &Symbol::new("000001"));
        assert_eq!(names(&sources), vec!["tushare"]);
    }

    #[test]
    fn test_live_changes_apply_to_next_resolution() {
        let resolver = resolver(vec![
            DataSourceDescriptor::new("tushare", "tushare").with_priority(10),
            DataSourceDescriptor::new("akshare", "akshare").with_priority(5),
        ]);
        let symbol = Symbol::new("000001");

        resolver.sources().set_priority("akshare", 20);
        let sources = resolver.resolve(MarketCategory::AShares, &symbol);
        assert_eq!(names(&sources), vec!["akshare", "tushare"]);

        resolver.sources().set_enabled("akshare", false);
        let sources = resolver.resolve(MarketCategory::AShares, &symbol);
        assert_eq!(names(&sources), vec!["tushare"]);
    }

    #[test]
    fn test_resolve_pinned() {
        let resolver = resolver(vec![
            DataSourceDescriptor::new("tushare", "tushare").with_priority(10),
            DataSourceDescriptor::new("akshare", "akshare").with_priority(5),
        ]);
        let symbol = Symbol::new("000001");
        let pinned = resolver.resolve_pinned(MarketCategory::AShares, &symbol, "akshare");
        assert_eq!(names(&pinned), vec!["akshare"]);
        assert!(resolver.resolve_pinned(MarketCategory::AShares, &symbol, "nope").is_empty());
    }

    #[test]
    fn test_empty_when_nothing_applies() {
        let resolver = resolver(vec![
            DataSourceDescriptor::new("yahoo", "yahoo").with_markets([MarketCategory::UsStocks]),
        ]);
        assert!(resolver.resolve(MarketCategory::HkStocks, &Symbol::new("0700.HK")).is_empty());
    }

    #[test]
    fn test_preferred_sources_move_to_front() {
        let resolver = resolver(vec![
            DataSourceDescriptor::new("tushare", "tushare").with_priority(10),
            DataSourceDescriptor::new("akshare", "akshare").with_priority(5),
            DataSourceDescriptor::new("baostock", "baostock").with_priority(3),
            DataSourceDescriptor::new("yahoo", "yahoo").with_priority(1),
        ]);
        let symbol = Symbol::new("000001");
        let preferred = vec!["yahoo".to_string(), "akshare".to_string()];

        let sources = resolver.resolve_preferred(MarketCategory::AShares, &symbol, &preferred);
        assert_eq!(names(&sources), vec!["yahoo", "akshare", "tushare", "baostock"]);

        // Unknown and disabled names are ignored
        resolver.sources().set_enabled("yahoo", false);
        let preferred = vec!["nope".to_string(), "yahoo".to_string(), "baostock".to_string()];
        let sources = resolver.resolve_preferred(MarketCategory::AShares, &symbol, &preferred);
        assert_eq!(names(&sources), vec!["baostock", "tushare", "akshare"]);

        let sources = resolver.resolve_preferred(MarketCategory::AShares, &symbol, &[]);
        assert_eq!(names(&sources), vec!["tushare", "akshare", "baostock"]);
    }
}
