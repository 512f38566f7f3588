#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factordynamics/feed/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

//! Yahoo Finance source adapter.
//!
//! This crate provides a Yahoo Finance adapter that implements the
//! [`SourceAdapter`] trait from `feed-core`.
//!
//! # Features
//!
//! - Historical OHLCV bars using Yahoo Finance's chart API
//! - Quote snapshots from the chart API `meta` block
//! - Built-in rate limiting (1 request per second by default)
//! - Cool-down after HTTP 429, reported through `is_available`
//!
//! # Example
//!
//! ```no_run
//! use feed_yahoo::YahooAdapter;
//! use feed_core::{DataType, FetchParams, SourceAdapter, Symbol};
//!
//! # async fn example() -> feed_core::AdapterResult<()> {
//! let adapter = YahooAdapter::new();
//! let params = FetchParams {
//!     range: Some("2024-01-01..2024-12-31".parse().unwrap()),
//!     ..FetchParams::default()
//! };
//!
//! let payload = adapter
//!     .fetch(&Symbol::new("AAPL"), DataType::HistoricalPrices, &params)
//!     .await?;
//! println!("Fetched {} bars", payload.len());
//! # Ok(())
//! # }
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, TimeZone, Utc};
use feed_core::{
    AdapterError, AdapterResult, DataFrequency, DataType, FetchParams, OhlcvBar, Payload,
    QuoteSnapshot, SourceAdapter, Symbol,
};
use serde::Deserialize;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Yahoo Finance chart API base URL.
const CHART_API_URL: &str = "https://query1.finance.yahoo.com/v8/finance/chart";

/// Default rate limit delay in milliseconds.
const DEFAULT_RATE_LIMIT_MS: u64 = 1000;

/// Cool-down after an HTTP 429.
const RATE_LIMIT_COOLDOWN: Duration = Duration::from_secs(60);

/// User agent for HTTP requests.
const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36";

/// Registry name of this adapter.
pub const NAME: &str = "yahoo";

fn now_millis() -> u64 {
    u64::try_from(Utc::now().timestamp_millis()).unwrap_or_default()
}

/// Yahoo Finance source adapter.
///
/// Serves [`DataType::HistoricalPrices`] and [`DataType::QuoteSnapshot`]; other
/// data types are reported as not found.
#[derive(Debug)]
pub struct YahooAdapter {
    client: reqwest::Client,
    base_url: String,
    rate_limit_ms: u64,
    last_request_time: AtomicU64,
    rate_limited_until: AtomicU64,
}

impl YahooAdapter {
    /// Create a new Yahoo Finance adapter with default settings.
    ///
    /// Uses built-in rate limiting of 1 request per second.
    #[must_use]
    pub fn new() -> Self {
        Self::with_rate_limit(Duration::from_millis(DEFAULT_RATE_LIMIT_MS))
    }

    /// Create a new Yahoo Finance adapter with a custom HTTP client.
    ///
    /// Rate limiting is still applied.
    #[must_use]
    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            base_url: CHART_API_URL.to_string(),
            rate_limit_ms: DEFAULT_RATE_LIMIT_MS,
            last_request_time: AtomicU64::new(0),
            rate_limited_until: AtomicU64::new(0),
        }
    }

    /// Create a new Yahoo Finance adapter with custom rate limiting.
    #[must_use]
    pub fn with_rate_limit(rate_limit: Duration) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Falling back to default HTTP client");
                reqwest::Client::new()
            });

        Self {
            rate_limit_ms: u64::try_from(rate_limit.as_millis()).unwrap_or(u64::MAX),
            ..Self::with_client(client)
        }
    }

    /// Override the chart API base URL.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Apply rate limiting before making a request.
    async fn apply_rate_limit(&self) {
        let last = self.last_request_time.load(Ordering::Relaxed);
        let elapsed = now_millis().saturating_sub(last);

        if elapsed < self.rate_limit_ms {
            let wait_time = self.rate_limit_ms - elapsed;
            debug!("Rate limiting: waiting {}ms", wait_time);
            sleep(Duration::from_millis(wait_time)).await;
        }

        self.last_request_time.store(now_millis(), Ordering::Relaxed);
    }

    /// Build the chart API URL for a symbol and date range.
    fn build_chart_url(&self, symbol: &Symbol, params: &FetchParams) -> String {
        let interval = match params.frequency {
            DataFrequency::Weekly => "1wk",
            other => other.as_str(),
        };

        match params.range {
            Some(range) => {
                let start_ts = range
                    .start()
                    .and_hms_opt(0, 0, 0)
                    .map(|dt| Utc.from_utc_datetime(&dt).timestamp())
                    .unwrap_or(0);
                let end_ts = range
                    .end()
                    .and_hms_opt(23, 59, 59)
                    .map(|dt| Utc.from_utc_datetime(&dt).timestamp())
                    .unwrap_or(0);
                format!(
                    "{}/{}?period1={}&period2={}&interval={}&includeAdjustedClose=true",
                    self.base_url,
                    symbol.as_str(),
                    start_ts,
                    end_ts,
                    interval
                )
            }
            None => format!(
                "{}/{}?range=1mo&interval={}&includeAdjustedClose=true",
                self.base_url,
                symbol.as_str(),
                interval
            ),
        }
    }

    /// Build the chart API URL used for quote snapshots.
    fn build_quote_url(&self, symbol: &Symbol) -> String {
        format!("{}/{}?range=1d&interval=1d", self.base_url, symbol.as_str())
    }

    /// Fetch and decode a chart response.
    async fn fetch_chart(&self, symbol: &Symbol, url: &str) -> AdapterResult<ChartData> {
        self.apply_rate_limit().await;
        debug!("Fetching chart: {}", url);

        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                AdapterError::Timeout(Duration::from_secs(30))
            } else {
                AdapterError::Unknown(e.to_string())
            }
        })?;

        match response.status() {
            reqwest::StatusCode::TOO_MANY_REQUESTS => {
                self.rate_limited_until.store(
                    now_millis().saturating_add(
                        u64::try_from(RATE_LIMIT_COOLDOWN.as_millis()).unwrap_or(u64::MAX),
                    ),
                    Ordering::Relaxed,
                );
                return Err(AdapterError::RateLimited {
                    retry_after: Some(RATE_LIMIT_COOLDOWN),
                });
            }
            reqwest::StatusCode::NOT_FOUND => {
                return Err(AdapterError::NotFound(symbol.to_string()));
            }
            reqwest::StatusCode::UNAUTHORIZED | reqwest::StatusCode::FORBIDDEN => {
                return Err(AdapterError::AuthFailure(format!(
                    "HTTP {} for {}",
                    response.status(),
                    symbol
                )));
            }
            status if !status.is_success() => {
                return Err(AdapterError::Unknown(format!("HTTP {status} for {symbol}")));
            }
            _ => {}
        }

        let chart_response: ChartResponse = response
            .json()
            .await
            .map_err(|e| AdapterError::Unknown(e.to_string()))?;

        first_result(symbol, chart_response)
    }
}

impl Default for YahooAdapter {
    fn default() -> Self {
        Self::new()
    }
}

/// Extract the single chart result, mapping API-level errors.
fn first_result(symbol: &Symbol, response: ChartResponse) -> AdapterResult<ChartData> {
    if let Some(error) = response.chart.error {
        if error.code == "Not Found" {
            return Err(AdapterError::NotFound(symbol.to_string()));
        }
        return Err(AdapterError::Unknown(format!(
            "{}: {}",
            error.code, error.description
        )));
    }

    response
        .chart
        .result
        .into_iter()
        .flatten()
        .next()
        .ok_or_else(|| AdapterError::NotFound(symbol.to_string()))
}

/// Convert chart data into OHLCV bars, skipping rows with missing prices.
fn parse_bars(symbol: &Symbol, data: ChartData) -> AdapterResult<Vec<OhlcvBar>> {
    let timestamps = data.timestamp.unwrap_or_default();
    if timestamps.is_empty() {
        return Err(AdapterError::NotFound(format!("no bars for {symbol}")));
    }

    let quote = data
        .indicators
        .quote
        .into_iter()
        .next()
        .ok_or_else(|| AdapterError::Unknown("Missing quote data".to_string()))?;

    let adj_close = data
        .indicators
        .adjclose
        .and_then(|ac| ac.into_iter().next())
        .map(|ac| ac.adjclose)
        .unwrap_or_default();

    let bars = timestamps
        .iter()
        .enumerate()
        .filter_map(|(i, &ts)| {
            let timestamp = Utc.timestamp_opt(ts, 0).single()?;
            let open = (*quote.open.get(i)?)?;
            let high = (*quote.high.get(i)?)?;
            let low = (*quote.low.get(i)?)?;
            let close = (*quote.close.get(i)?)?;
            let volume = quote.volume.get(i).copied().flatten().unwrap_or(0) as f64;
            let bar = OhlcvBar::new(timestamp, open, high, low, close, volume);
            Some(match adj_close.get(i).copied().flatten() {
                Some(adjusted) => bar.with_adjusted_close(adjusted),
                None => bar,
            })
        })
        .collect::<Vec<_>>();

    if bars.is_empty() {
        return Err(AdapterError::NotFound(format!("no complete bars for {symbol}")));
    }
    Ok(bars)
}

/// Build a quote snapshot from the chart `meta` block.
fn parse_quote(symbol: &Symbol, data: ChartData) -> AdapterResult<QuoteSnapshot> {
    let meta = data
        .meta
        .ok_or_else(|| AdapterError::Unknown("Missing chart meta".to_string()))?;
    let price = meta
        .regular_market_price
        .ok_or_else(|| AdapterError::NotFound(format!("no price for {symbol}")))?;
    let as_of = meta
        .regular_market_time
        .and_then(|ts| Utc.timestamp_opt(ts, 0).single())
        .unwrap_or_else(Utc::now);

    Ok(QuoteSnapshot {
        symbol: symbol.clone(),
        price,
        previous_close: meta.chart_previous_close.or(meta.previous_close),
        volume: meta.regular_market_volume.map(|v| v as f64),
        currency: meta.currency,
        as_of,
    })
}

#[async_trait]
impl SourceAdapter for YahooAdapter {
    fn name(&self) -> &str {
        NAME
    }

    fn default_priority(&self) -> i32 {
        1
    }

    async fn is_available(&self) -> bool {
        now_millis() >= self.rate_limited_until.load(Ordering::Relaxed)
    }

    async fn fetch(
        &self,
        symbol: &Symbol,
        data_type: DataType,
        params: &FetchParams,
    ) -> AdapterResult<Payload> {
        match data_type {
            DataType::HistoricalPrices => {
                let url = self.build_chart_url(symbol, params);
                let data = self.fetch_chart(symbol, &url).await?;
                let mut bars = parse_bars(symbol, data)?;
                if let Some(range) = params.range {
                    bars.retain(|b| {
                        let day: NaiveDate = b.timestamp.date_naive();
                        day >= range.start() && day <= range.end()
                    });
                }
                debug!(symbol = %symbol, bars = bars.len(), "Fetched bars");
                Ok(Payload::Bars(bars))
            }
            DataType::QuoteSnapshot => {
                let url = self.build_quote_url(symbol);
                let data = self.fetch_chart(symbol, &url).await?;
                Ok(Payload::Quote(parse_quote(symbol, data)?))
            }
            other => Err(AdapterError::NotFound(format!(
                "{other} is not provided by Yahoo Finance"
            ))),
        }
    }
}

// ============================================================================
// Yahoo Finance API Response Types
// ============================================================================

/// Chart API response.
#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartResult,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    result: Option<Vec<ChartData>>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    code: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartData {
    meta: Option<ChartMeta>,
    timestamp: Option<Vec<i64>>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartMeta {
    currency: Option<String>,
    regular_market_price: Option<f64>,
    regular_market_time: Option<i64>,
    regular_market_volume: Option<u64>,
    chart_previous_close: Option<f64>,
    previous_close: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    quote: Vec<QuoteData>,
    adjclose: Option<Vec<AdjClose>>,
}

#[derive(Debug, Deserialize)]
struct QuoteData {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<u64>>,
}

#[derive(Debug, Deserialize)]
struct AdjClose {
    adjclose: Vec<Option<f64>>,
}
