//! Core data types moved between sources, caches and callers.
//!
//! - [`Symbol`] - Trading symbol/ticker
//! - [`OhlcvBar`] - OHLCV price bar
//! - [`QuoteSnapshot`] - Latest quote for a symbol
//! - [`FinancialStatement`] - Financial statement data
//! - [`KeyMetrics`] - Valuation metrics for a trading day
//! - [`NewsItem`] - News headline or company announcement
//! - [`Payload`] - The structured value stored in a cache entry

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::frequency::PeriodType;

/// A trading symbol/ticker.
///
/// Symbols are trimmed and uppercased on creation so that `"aapl "` and
/// `"AAPL"` produce the same cache key.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Symbol(String);

impl Symbol {
    /// Creates a new symbol from a string, converting to uppercase.
    #[must_use]
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into().trim().to_uppercase())
    }

    /// Returns the symbol as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Symbol {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}

impl From<&str> for Symbol {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Symbol {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// OHLCV (Open, High, Low, Close, Volume) bar data.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OhlcvBar {
    /// Timestamp of the bar.
    pub timestamp: DateTime<Utc>,
    /// Opening price.
    pub open: f64,
    /// Highest price during the period.
    pub high: f64,
    /// Lowest price during the period.
    pub low: f64,
    /// Closing price.
    pub close: f64,
    /// Trading volume.
    pub volume: f64,
    /// Split/dividend adjusted closing price.
    pub adjusted_close: Option<f64>,
}

impl OhlcvBar {
    /// Creates a new OHLCV bar.
    #[must_use]
    pub const fn new(
        timestamp: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
            adjusted_close: None,
        }
    }

    /// Sets the adjusted close price.
    #[must_use]
    pub const fn with_adjusted_close(mut self, adjusted_close: f64) -> Self {
        self.adjusted_close = Some(adjusted_close);
        self
    }
}

/// Latest quote for a symbol.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuoteSnapshot {
    /// Stock symbol.
    pub symbol: Symbol,
    /// Last traded price.
    pub price: f64,
    /// Previous session close, if known.
    pub previous_close: Option<f64>,
    /// Session volume, if known.
    pub volume: Option<f64>,
    /// Trading currency, if known.
    pub currency: Option<String>,
    /// When the quote was observed upstream.
    pub as_of: DateTime<Utc>,
}

/// Income statement summary for one reporting period.
///
/// Amounts are in the reporting currency; cumulative year-to-date figures as
/// published, not single-quarter values.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FinancialStatement {
    /// Stock symbol.
    pub symbol: Symbol,
    /// End date of the reporting period.
    pub period_end: NaiveDate,
    /// Type of period (annual or quarterly).
    pub period_type: PeriodType,
    /// Date the report was published.
    pub announced_on: Option<NaiveDate>,
    /// Total revenue.
    pub revenue: Option<f64>,
    /// Operating profit.
    pub operating_profit: Option<f64>,
    /// Profit before tax.
    pub total_profit: Option<f64>,
    /// Net income.
    pub net_income: Option<f64>,
    /// Net income attributable to shareholders of the parent.
    pub net_income_attributable: Option<f64>,
    /// Basic earnings per share.
    pub eps_basic: Option<f64>,
}

impl FinancialStatement {
    /// Creates a new financial statement with required fields.
    #[must_use]
    pub fn new(symbol: Symbol, period_end: NaiveDate, period_type: PeriodType) -> Self {
        Self {
            symbol,
            period_end,
            period_type,
            ..Default::default()
        }
    }
}

/// Valuation metrics for one trading day, as reported by the source.
///
/// Values are passed through untouched; deriving ratios from statements is
/// left to consumers.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct KeyMetrics {
    /// Stock symbol.
    pub symbol: Symbol,
    /// Trading day of the metrics.
    pub date: NaiveDate,
    /// Closing price on that day.
    pub close: Option<f64>,
    /// Total market capitalization.
    pub market_cap: Option<f64>,
    /// Market capitalization of tradable shares.
    pub circulating_market_cap: Option<f64>,
    /// Price-to-earnings ratio.
    pub pe_ratio: Option<f64>,
    /// Trailing twelve months price-to-earnings ratio.
    pub pe_ttm: Option<f64>,
    /// Price-to-book ratio.
    pub pb_ratio: Option<f64>,
    /// Price-to-sales ratio.
    pub ps_ratio: Option<f64>,
    /// Dividend yield in percent.
    pub dividend_yield: Option<f64>,
    /// Turnover rate in percent.
    pub turnover_rate: Option<f64>,
    /// Total shares outstanding.
    pub total_shares: Option<f64>,
}

impl KeyMetrics {
    /// Creates new key metrics with required fields.
    #[must_use]
    pub fn new(symbol: Symbol, date: NaiveDate) -> Self {
        Self {
            symbol,
            date,
            ..Default::default()
        }
    }
}

/// A news headline or company announcement.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewsItem {
    /// Headline.
    pub title: String,
    /// Link to the full article, if any.
    pub url: Option<String>,
    /// Publisher name.
    pub publisher: Option<String>,
    /// Publication time.
    pub published_at: DateTime<Utc>,
    /// True for official exchange announcements.
    #[serde(default)]
    pub announcement: bool,
}

/// Structured value carried by a cache entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Payload {
    /// Historical price bars, oldest first.
    Bars(Vec<OhlcvBar>),
    /// Latest quote.
    Quote(QuoteSnapshot),
    /// Financial statements, most recent first.
    Financials(Vec<FinancialStatement>),
    /// Daily valuation metrics.
    Metrics(KeyMetrics),
    /// News and announcements, most recent first.
    News(Vec<NewsItem>),
    /// Provider-specific structured value.
    Json(serde_json::Value),
}

impl Payload {
    /// Returns true if the payload carries no data points.
    ///
    /// An empty payload is never a valid answer; the facade treats it as
    /// "source has no data".
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Bars(bars) => bars.is_empty(),
            Self::Financials(statements) => statements.is_empty(),
            Self::News(items) => items.is_empty(),
            Self::Quote(_) | Self::Metrics(_) => false,
            Self::Json(value) => match value {
                serde_json::Value::Null => true,
                serde_json::Value::Array(items) => items.is_empty(),
                serde_json::Value::Object(fields) => fields.is_empty(),
                _ => false,
            },
        }
    }

    /// Short label of the payload variant, for logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Bars(_) => "bars",
            Self::Quote(_) => "quote",
            Self::Financials(_) => "financials",
            Self::Metrics(_) => "metrics",
            Self::News(_) => "news",
            Self::Json(_) => "json",
        }
    }

    /// Number of data points (bars, statements, news items); one for single values.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Bars(bars) => bars.len(),
            Self::Financials(statements) => statements.len(),
            Self::News(items) => items.len(),
            Self::Json(serde_json::Value::Array(items)) => items.len(),
            _ if self.is_empty() => 0,
            _ => 1,
        }
    }
}
