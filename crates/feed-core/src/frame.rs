//! Conversion of tabular payloads into polars DataFrames.

use chrono::NaiveDate;
use polars::prelude::{Column, DataFrame, DataType as ColumnType, PolarsError, PolarsResult};

use crate::types::{FinancialStatement, KeyMetrics, OhlcvBar, Payload};

fn epoch_days(date: NaiveDate) -> i32 {
    let epoch = NaiveDate::default();
    i32::try_from((date - epoch).num_days()).unwrap_or(i32::MAX)
}

fn date_column(name: &str, dates: impl Iterator<Item = NaiveDate>) -> PolarsResult<Column> {
    let days: Vec<i32> = dates.map(epoch_days).collect();
    Column::new(name.into(), days).cast(&ColumnType::Date)
}

fn bars_frame(bars: &[OhlcvBar]) -> PolarsResult<DataFrame> {
    DataFrame::new(vec![
        date_column("date", bars.iter().map(|b| b.timestamp.date_naive()))?,
        Column::new("open".into(), bars.iter().map(|b| b.open).collect::<Vec<_>>()),
        Column::new("high".into(), bars.iter().map(|b| b.high).collect::<Vec<_>>()),
        Column::new("low".into(), bars.iter().map(|b| b.low).collect::<Vec<_>>()),
        Column::new("close".into(), bars.iter().map(|b| b.close).collect::<Vec<_>>()),
        Column::new("volume".into(), bars.iter().map(|b| b.volume).collect::<Vec<_>>()),
        Column::new(
            "adjusted_close".into(),
            bars.iter().map(|b| b.adjusted_close).collect::<Vec<_>>(),
        ),
    ])
}

fn financials_frame(statements: &[FinancialStatement]) -> PolarsResult<DataFrame> {
    let col = |name: &str, f: fn(&FinancialStatement) -> Option<f64>| {
        Column::new(name.into(), statements.iter().map(f).collect::<Vec<_>>())
    };
    DataFrame::new(vec![
        Column::new(
            "symbol".into(),
            statements.iter().map(|s| s.symbol.as_str()).collect::<Vec<_>>(),
        ),
        date_column("period_end", statements.iter().map(|s| s.period_end))?,
        col("revenue", |s| s.revenue),
        col("operating_profit", |s| s.operating_profit),
        col("total_profit", |s| s.total_profit),
        col("net_income", |s| s.net_income),
        col("net_income_attributable", |s| s.net_income_attributable),
        col("eps_basic", |s| s.eps_basic),
    ])
}

fn metrics_frame(metrics: &KeyMetrics) -> PolarsResult<DataFrame> {
    let col = |name: &str, value: Option<f64>| Column::new(name.into(), vec![value]);
    DataFrame::new(vec![
        Column::new("symbol".into(), vec![metrics.symbol.as_str()]),
        date_column("date", std::iter::once(metrics.date))?,
        col("close", metrics.close),
        col("market_cap", metrics.market_cap),
        col("pe_ratio", metrics.pe_ratio),
        col("pe_ttm", metrics.pe_ttm),
        col("pb_ratio", metrics.pb_ratio),
        col("ps_ratio", metrics.ps_ratio),
        col("dividend_yield", metrics.dividend_yield),
        col("turnover_rate", metrics.turnover_rate),
    ])
}

impl Payload {
    /// Converts a tabular payload into a DataFrame.
    ///
    /// Bars become `date, open, high, low, close, volume, adjusted_close`;
    /// statements and metrics become one row per period. Quotes, news and raw
    /// JSON have no tabular form and return an error.
    pub fn to_frame(&self) -> PolarsResult<DataFrame> {
        match self {
            Self::Bars(bars) => bars_frame(bars),
            Self::Financials(statements) => financials_frame(statements),
            Self::Metrics(metrics) => metrics_frame(metrics),
            other => Err(PolarsError::ComputeError(
                format!("{} payload has no tabular form", other.kind()).into(),
            )),
        }
    }
}
