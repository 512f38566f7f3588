//! Logical data requests and the parameters handed to source adapters.

use serde::{Deserialize, Serialize};

use crate::frequency::DataFrequency;
use crate::key::{CacheKey, DataType, DateRange, SourceTag};
use crate::market::MarketCategory;
use crate::types::Symbol;

/// Parameters passed to [`SourceAdapter::fetch`](crate::adapter::SourceAdapter::fetch).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchParams {
    /// Date range for historical data.
    pub range: Option<DateRange>,
    /// Report period (e.g. `2023Q4`, `20240131`) for fundamentals.
    pub period: Option<String>,
    /// Bar frequency for historical prices.
    pub frequency: DataFrequency,
    /// Maximum number of items (news, statements).
    pub limit: Option<usize>,
}

/// "Give me `data_type` for `symbol` over `range`".
///
/// This is the only input callers hand to the cache and fallback layers; the
/// cache key is derived from it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataRequest {
    /// Requested symbol.
    pub symbol: Symbol,
    /// Requested data type.
    pub data_type: DataType,
    /// Date range, if the data type is ranged.
    pub range: Option<DateRange>,
    /// Report period, if any.
    pub period: Option<String>,
    /// Bar frequency.
    pub frequency: DataFrequency,
    /// Maximum number of items.
    pub limit: Option<usize>,
    /// Restricts the request to one source when set.
    #[serde(skip)]
    pub source: SourceTag,
    /// Overrides market detection from the symbol.
    pub market: Option<MarketCategory>,
    /// Source names to try first, in this order. Does not affect the cache key.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub preferred_sources: Vec<String>,
}

impl DataRequest {
    /// Creates a request with no range, period or source pin.
    #[must_use]
    pub fn new(symbol: impl Into<Symbol>, data_type: DataType) -> Self {
        Self {
            symbol: symbol.into(),
            data_type,
            range: None,
            period: None,
            frequency: DataFrequency::Daily,
            limit: None,
            source: SourceTag::Unified,
            market: None,
            preferred_sources: Vec::new(),
        }
    }

    /// Daily bars over `range`.
    #[must_use]
    pub fn historical(symbol: impl Into<Symbol>, range: DateRange) -> Self {
        Self::new(symbol, DataType::HistoricalPrices).with_range(range)
    }

    /// Latest quote.
    #[must_use]
    pub fn quote(symbol: impl Into<Symbol>) -> Self {
        Self::new(symbol, DataType::QuoteSnapshot)
    }

    /// Latest fundamentals.
    #[must_use]
    pub fn fundamentals(symbol: impl Into<Symbol>) -> Self {
        Self::new(symbol, DataType::Fundamentals)
    }

    /// Recent news.
    #[must_use]
    pub fn news(symbol: impl Into<Symbol>) -> Self {
        Self::new(symbol, DataType::News)
    }

    /// Sets the date range.
    #[must_use]
    pub const fn with_range(mut self, range: DateRange) -> Self {
        self.range = Some(range);
        self
    }

    /// Sets the report period.
    #[must_use]
    pub fn with_period(mut self, period: impl Into<String>) -> Self {
        self.period = Some(period.into());
        self
    }

    /// Sets the bar frequency.
    #[must_use]
    pub const fn with_frequency(mut self, frequency: DataFrequency) -> Self {
        self.frequency = frequency;
        self
    }

    /// Sets the item limit.
    #[must_use]
    pub const fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Pins the request to a single source.
    #[must_use]
    pub fn pinned_to(mut self, source: impl Into<String>) -> Self {
        self.source = SourceTag::source(source);
        self
    }

    /// Tries `sources` first, in the given order, before the remaining
    /// sources in priority order.
    #[must_use]
    pub fn with_preferred_sources<I, S>(mut self, sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.preferred_sources = sources.into_iter().map(Into::into).collect();
        self
    }

    /// Overrides the detected market.
    #[must_use]
    pub const fn with_market(mut self, market: MarketCategory) -> Self {
        self.market = Some(market);
        self
    }

    /// Market of the request: explicit override or detected from the symbol.
    #[must_use]
    pub fn market(&self) -> MarketCategory {
        self.market
            .unwrap_or_else(|| MarketCategory::detect(&self.symbol))
    }

    /// Scope component of the cache key.
    ///
    /// Range takes precedence over period; neither gives `latest`. Bar frequency
    /// and limit are appended when they affect the payload.
    #[must_use]
    pub fn scope(&self) -> String {
        let mut scope = match (&self.range, &self.period) {
            (Some(range), _) => range.to_string(),
            (None, Some(period)) => period.trim().to_string(),
            (None, None) => "latest".to_string(),
        };
        if self.data_type == DataType::HistoricalPrices {
            scope.push('@');
            scope.push_str(self.frequency.as_str());
        }
        if let Some(limit) = self.limit {
            scope.push_str(&format!("#{limit}"));
        }
        scope
    }

    /// Cache key under the request's own source tag.
    #[must_use]
    pub fn cache_key(&self) -> CacheKey {
        CacheKey::new(&self.symbol, self.data_type, &self.scope(), self.source.clone())
    }

    /// Cache key pinned to `source`.
    #[must_use]
    pub fn cache_key_for_source(&self, source: &str) -> CacheKey {
        CacheKey::new(&self.symbol, self.data_type, &self.scope(), SourceTag::source(source))
    }

    /// Parameters handed to adapters.
    #[must_use]
    pub fn fetch_params(&self) -> FetchParams {
        FetchParams {
            range: self.range,
            period: self.period.clone(),
            frequency: self.frequency,
            limit: self.limit,
        }
    }
}
