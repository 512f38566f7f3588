#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factordynamics/feed/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

//! Tushare Pro source adapter.
//!
//! This crate implements the `feed-core` [`SourceAdapter`] trait for the
//! [Tushare Pro](https://tushare.pro/) API, which covers mainland China A shares.
//!
//! # Usage
//!
//! ```rust,ignore
//! use feed_tushare::TushareAdapter;
//! use feed_core::{DataType, FetchParams, SourceAdapter, Symbol};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let adapter = TushareAdapter::new("your_token");
//!
//!     let params = FetchParams {
//!         range: Some("2024-01-01..2024-01-31".parse()?),
//!         ..FetchParams::default()
//!     };
//!     let bars = adapter
//!         .fetch(&Symbol::new("000001"), DataType::HistoricalPrices, &params)
//!         .await?;
//!
//!     let metrics = adapter
//!         .fetch(&Symbol::new("600519"), DataType::Fundamentals, &FetchParams::default())
//!         .await?;
//!
//!     Ok(())
//! }
//! ```

use async_trait::async_trait;
use chrono::{Datelike, Days, NaiveDate, Utc};
use feed_core::{
    AdapterError, AdapterResult, DataFrequency, DataType, FetchParams, FinancialStatement,
    KeyMetrics, OhlcvBar, Payload, PeriodType, SourceAdapter, Symbol,
};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use tracing::debug;

/// Tushare Pro HTTP endpoint.
const TUSHARE_API_URL: &str = "http://api.tushare.pro";

/// Registry name of this adapter.
pub const NAME: &str = "tushare";

/// Days looked back when no range is given.
const DEFAULT_LOOKBACK_DAYS: u64 = 30;

/// Days looked back to find the latest `daily_basic` row.
const METRICS_LOOKBACK_DAYS: u64 = 14;

/// Request timeout for the HTTP client.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const DAILY_FIELDS: &str = "ts_code,trade_date,open,high,low,close,pre_close,vol,amount";
const DAILY_BASIC_FIELDS: &str =
    "ts_code,trade_date,close,turnover_rate,pe,pe_ttm,pb,ps,dv_ratio,total_share,total_mv,circ_mv";
const INCOME_FIELDS: &str = "ts_code,ann_date,end_date,revenue,operate_profit,total_profit,\
n_income,n_income_attr_p,basic_eps";

/// Statements returned for `period = "statements"` without a limit.
const DEFAULT_STATEMENT_LIMIT: usize = 4;

// Token errors: invalid token, insufficient points for the interface.
const TOKEN_ERROR_CODES: &[i64] = &[40101, 40203];

/// Tushare Pro source adapter.
///
/// Serves [`DataType::HistoricalPrices`] (daily bars from `daily`) and
/// [`DataType::Fundamentals`]. Fundamentals are valuation metrics from
/// `daily_basic`, unless the period names a report (`2023Q3`, `2023`, or
/// `statements` for the latest ones), in which case income statements come
/// from `income`. Without a token the adapter reports itself unavailable.
#[derive(Clone)]
pub struct TushareAdapter {
    client: Client,
    base_url: String,
    token: String,
}

impl fmt::Debug for TushareAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TushareAdapter")
            .field("base_url", &self.base_url)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

impl TushareAdapter {
    /// Create a new Tushare adapter with the given API token.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Falling back to default HTTP client");
                Client::new()
            });
        Self::with_client(client, token)
    }

    /// Create a new Tushare adapter with a custom HTTP client.
    #[must_use]
    pub fn with_client(client: Client, token: impl Into<String>) -> Self {
        Self {
            client,
            base_url: TUSHARE_API_URL.to_string(),
            token: token.into().trim().to_string(),
        }
    }

    /// Override the API endpoint.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn has_token(&self) -> bool {
        !self.token.is_empty()
    }

    /// Call one Tushare interface and return its table.
    async fn call(&self, api_name: &str, params: Value, fields: &str) -> AdapterResult<Table> {
        if !self.has_token() {
            return Err(AdapterError::AuthFailure("Tushare token not configured".to_string()));
        }

        let body = ApiRequest {
            api_name,
            token: &self.token,
            params,
            fields,
        };
        debug!(api_name, "Tushare request");

        let response = self
            .client
            .post(&self.base_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AdapterError::Timeout(REQUEST_TIMEOUT)
                } else {
                    AdapterError::Unknown(e.to_string())
                }
            })?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(AdapterError::RateLimited { retry_after: None });
        }

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(AdapterError::Unknown(format!("HTTP {status}: {text}")));
        }

        let text = response
            .text()
            .await
            .map_err(|e| AdapterError::Unknown(e.to_string()))?;

        parse_response(&text)
    }

    async fn fetch_daily(
        &self,
        symbol: &Symbol,
        params: &FetchParams,
    ) -> AdapterResult<Vec<OhlcvBar>> {
        if params.frequency != DataFrequency::Daily {
            return Err(AdapterError::NotFound(format!(
                "Tushare daily only serves 1d bars, got {}",
                params.frequency
            )));
        }

        let ts_code = to_ts_code(symbol);
        let (start, end) = match params.range {
            Some(range) => (range.start(), range.end()),
            None => lookback(DEFAULT_LOOKBACK_DAYS),
        };
        let table = self
            .call(
                "daily",
                serde_json::json!({
                    "ts_code": ts_code,
                    "start_date": tushare_date(start),
                    "end_date": tushare_date(end),
                }),
                DAILY_FIELDS,
            )
            .await?;

        let bars = parse_daily(&table)?;
        if bars.is_empty() {
            return Err(AdapterError::NotFound(format!("no bars for {ts_code}")));
        }
        Ok(bars)
    }

    async fn fetch_daily_basic(
        &self,
        symbol: &Symbol,
        params: &FetchParams,
    ) -> AdapterResult<KeyMetrics> {
        let ts_code = to_ts_code(symbol);
        // A YYYYMMDD period pins the trading day; anything else means latest.
        let request = match params.period.as_deref().filter(|p| is_trade_date(p)) {
            Some(day) => serde_json::json!({ "ts_code": ts_code, "trade_date": day }),
            None => {
                let (start, end) = lookback(METRICS_LOOKBACK_DAYS);
                serde_json::json!({
                    "ts_code": ts_code,
                    "start_date": tushare_date(start),
                    "end_date": tushare_date(end),
                })
            }
        };

        let table = self.call("daily_basic", request, DAILY_BASIC_FIELDS).await?;
        parse_daily_basic(symbol, &table)?
            .ok_or_else(|| AdapterError::NotFound(format!("no daily_basic rows for {ts_code}")))
    }

    async fn fetch_income(
        &self,
        symbol: &Symbol,
        query: StatementQuery,
        limit: Option<usize>,
    ) -> AdapterResult<Vec<FinancialStatement>> {
        let ts_code = to_ts_code(symbol);
        // report_type 1: consolidated statements
        let mut request = serde_json::json!({ "ts_code": ts_code, "report_type": "1" });
        let limit = match query {
            StatementQuery::Period(period_end) => {
                request["period"] = Value::from(tushare_date(period_end));
                1
            }
            StatementQuery::Latest => limit.unwrap_or(DEFAULT_STATEMENT_LIMIT),
        };

        let table = self.call("income", request, INCOME_FIELDS).await?;
        let mut statements = parse_income(symbol, &table)?;
        statements.truncate(limit);
        if statements.is_empty() {
            return Err(AdapterError::NotFound(format!("no income statements for {ts_code}")));
        }
        Ok(statements)
    }
}

#[async_trait]
impl SourceAdapter for TushareAdapter {
    fn name(&self) -> &str {
        NAME
    }

    fn default_priority(&self) -> i32 {
        3
    }

    async fn is_available(&self) -> bool {
        self.has_token()
    }

    async fn fetch(
        &self,
        symbol: &Symbol,
        data_type: DataType,
        params: &FetchParams,
    ) -> AdapterResult<Payload> {
        match data_type {
            DataType::HistoricalPrices => {
                let bars = self.fetch_daily(symbol, params).await?;
                debug!(symbol = %symbol, bars = bars.len(), "Fetched bars");
                Ok(Payload::Bars(bars))
            }
            DataType::Fundamentals => match params.period.as_deref().and_then(statement_query) {
                Some(query) => {
                    let statements = self.fetch_income(symbol, query, params.limit).await?;
                    debug!(symbol = %symbol, statements = statements.len(), "Fetched income");
                    Ok(Payload::Financials(statements))
                }
                None => {
                    let metrics = self.fetch_daily_basic(symbol, params).await?;
                    debug!(symbol = %symbol, date = %metrics.date, "Fetched daily_basic");
                    Ok(Payload::Metrics(metrics))
                }
            },
            other => Err(AdapterError::NotFound(format!(
                "{other} is not provided by Tushare"
            ))),
        }
    }
}

/// Convert a symbol to Tushare's `ts_code` (`600519.SH`, `000001.SZ`, `430047.BJ`).
///
/// Symbols that already carry an exchange suffix are kept; `.SS` is
/// rewritten to `.SH`.
#[must_use]
pub fn to_ts_code(symbol: &Symbol) -> String {
    let s = symbol.as_str();
    if let Some(code) = s.strip_suffix(".SS") {
        return format!("{code}.SH");
    }
    if s.contains('.') {
        return s.to_string();
    }

    let exchange = match s.as_bytes().first() {
        Some(b'6' | b'9') => "SH",
        Some(b'4' | b'8') => "BJ",
        _ => "SZ",
    };
    format!("{s}.{exchange}")
}

fn lookback(days: u64) -> (NaiveDate, NaiveDate) {
    let end = Utc::now().date_naive();
    let start = end.checked_sub_days(Days::new(days)).unwrap_or(end);
    (start, end)
}

fn tushare_date(date: NaiveDate) -> String {
    date.format("%Y%m%d").to_string()
}

fn is_trade_date(s: &str) -> bool {
    s.len() == 8 && NaiveDate::parse_from_str(s, "%Y%m%d").is_ok()
}

/// Which income statements a fundamentals request asks for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum StatementQuery {
    /// The most recent reports.
    Latest,
    /// The report ending on this date.
    Period(NaiveDate),
}

/// Parse a report period: `statements`, `YYYY` (annual) or `YYYYQn`.
fn statement_query(period: &str) -> Option<StatementQuery> {
    let period = period.trim().to_ascii_uppercase();
    if period == "STATEMENTS" {
        return Some(StatementQuery::Latest);
    }
    let (year, quarter) = match period.split_once('Q') {
        Some((year, quarter)) => (year, quarter.parse::<u32>().ok()?),
        None => (period.as_str(), 4),
    };
    if year.len() != 4 {
        return None;
    }
    let (month, day) = match quarter {
        1 => (3, 31),
        2 => (6, 30),
        3 => (9, 30),
        4 => (12, 31),
        _ => return None,
    };
    NaiveDate::from_ymd_opt(year.parse().ok()?, month, day).map(StatementQuery::Period)
}

/// Decode the response envelope and map API error codes.
fn parse_response(text: &str) -> AdapterResult<Table> {
    let response: ApiResponse =
        serde_json::from_str(text).map_err(|e| AdapterError::Unknown(format!("{e}: {text}")))?;

    if response.code != 0 {
        let msg = response.msg.unwrap_or_default();
        if TOKEN_ERROR_CODES.contains(&response.code) {
            return Err(AdapterError::AuthFailure(format!("{}: {msg}", response.code)));
        }
        if msg.contains("每分钟") || msg.contains("最多访问") {
            return Err(AdapterError::RateLimited { retry_after: Some(Duration::from_secs(60)) });
        }
        return Err(AdapterError::Unknown(format!("{}: {msg}", response.code)));
    }

    Ok(response.data.unwrap_or_default())
}

/// Rows of `daily`, oldest first. Volume is converted from lots to shares.
fn parse_daily(table: &Table) -> AdapterResult<Vec<OhlcvBar>> {
    let date = table.required("trade_date")?;
    let open = table.required("open")?;
    let high = table.required("high")?;
    let low = table.required("low")?;
    let close = table.required("close")?;
    let vol = table.column("vol");

    let mut bars: Vec<OhlcvBar> = table
        .items
        .iter()
        .filter_map(|row| {
            let day = parse_trade_date(row.get(date)?)?;
            let timestamp = day.and_hms_opt(0, 0, 0)?.and_utc();
            let volume = vol.and_then(|i| number(row.get(i)?)).unwrap_or(0.0) * 100.0;
            Some(OhlcvBar::new(
                timestamp,
                number(row.get(open)?)?,
                number(row.get(high)?)?,
                number(row.get(low)?)?,
                number(row.get(close)?)?,
                volume,
            ))
        })
        .collect();

    bars.sort_by_key(|b| b.timestamp);
    Ok(bars)
}

/// Most recent row of `daily_basic`.
///
/// Market values arrive in units of 10,000 CNY and share counts in units of
/// 10,000 shares; both are scaled to plain units.
fn parse_daily_basic(symbol: &Symbol, table: &Table) -> AdapterResult<Option<KeyMetrics>> {
    let date = table.required("trade_date")?;
    let field = |row: &[Value], name: &str| table.column(name).and_then(|i| number(row.get(i)?));

    let latest = table
        .items
        .iter()
        .filter_map(|row| Some((parse_trade_date(row.get(date)?)?, row)))
        .max_by_key(|(day, _)| *day);

    Ok(latest.map(|(day, row)| KeyMetrics {
        symbol: symbol.clone(),
        date: day,
        close: field(row, "close"),
        market_cap: field(row, "total_mv").map(|v| v * 10_000.0),
        circulating_market_cap: field(row, "circ_mv").map(|v| v * 10_000.0),
        pe_ratio: field(row, "pe"),
        pe_ttm: field(row, "pe_ttm"),
        pb_ratio: field(row, "pb"),
        ps_ratio: field(row, "ps"),
        dividend_yield: field(row, "dv_ratio"),
        turnover_rate: field(row, "turnover_rate"),
        total_shares: field(row, "total_share").map(|v| v * 10_000.0),
    }))
}

/// Rows of `income`, most recent period first, one row per period.
///
/// Restated reports share a period with the original; the latest
/// announcement wins.
fn parse_income(symbol: &Symbol, table: &Table) -> AdapterResult<Vec<FinancialStatement>> {
    let end_date = table.required("end_date")?;
    let ann_date = table.column("ann_date");
    let field = |row: &[Value], name: &str| table.column(name).and_then(|i| number(row.get(i)?));

    let mut statements: Vec<FinancialStatement> = table
        .items
        .iter()
        .filter_map(|row| {
            let period_end = parse_trade_date(row.get(end_date)?)?;
            let period_type = if period_end.month() == 12 {
                PeriodType::Annual
            } else {
                PeriodType::Quarterly
            };
            Some(FinancialStatement {
                announced_on: ann_date.and_then(|i| parse_trade_date(row.get(i)?)),
                revenue: field(row, "revenue"),
                operating_profit: field(row, "operate_profit"),
                total_profit: field(row, "total_profit"),
                net_income: field(row, "n_income"),
                net_income_attributable: field(row, "n_income_attr_p"),
                eps_basic: field(row, "basic_eps"),
                ..FinancialStatement::new(symbol.clone(), period_end, period_type)
            })
        })
        .collect();

    statements.sort_by(|a, b| {
        b.period_end
            .cmp(&a.period_end)
            .then(b.announced_on.cmp(&a.announced_on))
    });
    statements.dedup_by_key(|s| s.period_end);
    Ok(statements)
}

fn parse_trade_date(value: &Value) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value.as_str()?, "%Y%m%d").ok()
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

// ============================================================================
// Tushare Pro API Types
// ============================================================================

#[derive(Debug, Serialize)]
struct ApiRequest<'a> {
    api_name: &'a str,
    token: &'a str,
    params: Value,
    fields: &'a str,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    code: i64,
    msg: Option<String>,
    data: Option<Table>,
}

/// Column names plus row-major values.
#[derive(Debug, Default, Deserialize)]
struct Table {
    #[serde(default)]
    fields: Vec<String>,
    #[serde(default)]
    items: Vec<Vec<Value>>,
}

impl Table {
    fn column(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f == name)
    }

    fn required(&self, name: &str) -> AdapterResult<usize> {
        self.column(name)
            .ok_or_else(|| AdapterError::Unknown(format!("missing column {name}")))
    }
}
