//! Cache keys and the request dimensions they are derived from.
//!
//! A [`CacheKey`] is a pure function of `(symbol, data_type, scope, source_tag)`.
//! Two logically identical requests always produce byte-identical keys, which is
//! what makes a hit possible across processes and backends.

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::types::Symbol;

/// Kind of data held by a cache entry.
///
/// The TTL of an entry is a property of its data type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    /// Historical OHLCV bars over a date range.
    HistoricalPrices,
    /// Financial statements and valuation metrics.
    Fundamentals,
    /// News and announcements.
    News,
    /// Latest quote.
    QuoteSnapshot,
}

impl DataType {
    /// All data types.
    pub const ALL: [Self; 4] = [
        Self::HistoricalPrices,
        Self::Fundamentals,
        Self::News,
        Self::QuoteSnapshot,
    ];

    /// Stable name used in keys, directory names and table names.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::HistoricalPrices => "historical_prices",
            Self::Fundamentals => "fundamentals",
            Self::News => "news",
            Self::QuoteSnapshot => "quote_snapshot",
        }
    }

    /// Returns true if entries of this type are cached separately per upstream
    /// source because providers disagree numerically.
    #[must_use]
    pub const fn caches_per_source(&self) -> bool {
        matches!(self, Self::Fundamentals)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataType {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|dt| dt.as_str() == s)
            .ok_or_else(|| KeyError::UnknownDataType(s.to_string()))
    }
}

/// Error raised when a key, range or data type cannot be parsed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    /// Not one of the [`DataType`] names.
    #[error("unknown data type '{0}'")]
    UnknownDataType(String),

    /// Range start after its end.
    #[error("start {start} is after end {end}")]
    InvertedRange {
        /// First day.
        start: NaiveDate,
        /// Last day.
        end: NaiveDate,
    },

    /// Range without a `..` separator.
    #[error("invalid date range '{0}'")]
    InvalidRange(String),

    /// A range bound that is not `YYYY-MM-DD`.
    #[error("invalid date '{input}': {source}")]
    InvalidDate {
        /// The rejected text.
        input: String,
        /// Parser error.
        source: chrono::ParseError,
    },

    /// Neither `unified` nor `source:<name>`.
    #[error("invalid source tag '{0}'")]
    InvalidSourceTag(String),

    /// Fewer than four key components.
    #[error("invalid cache key '{0}'")]
    InvalidKey(String),
}

/// Inclusive date range.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateRange {
    /// Creates a range, rejecting `start > end`.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, KeyError> {
        if start > end {
            return Err(KeyError::InvertedRange { start, end });
        }
        Ok(Self { start, end })
    }

    /// First day of the range.
    #[must_use]
    pub const fn start(&self) -> NaiveDate {
        self.start
    }

    /// Last day of the range (inclusive).
    #[must_use]
    pub const fn end(&self) -> NaiveDate {
        self.end
    }

    /// Returns true if the whole range lies strictly before `today`.
    ///
    /// Closed ranges never change upstream, so their bars can be cached for a
    /// very long time.
    #[must_use]
    pub fn is_closed_before(&self, today: NaiveDate) -> bool {
        self.end < today
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

impl FromStr for DateRange {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (start, end) = s
            .split_once("..")
            .ok_or_else(|| KeyError::InvalidRange(s.to_string()))?;
        let parse = |d: &str| {
            NaiveDate::parse_from_str(d.trim(), "%Y-%m-%d")
                .map_err(|source| KeyError::InvalidDate {
                    input: d.to_string(),
                    source,
                })
        };
        Self::new(parse(start)?, parse(end)?)
    }
}

/// Which upstream source an entry belongs to.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SourceTag {
    /// Any source may answer; one shared entry.
    #[default]
    Unified,
    /// Entry belongs to one named source.
    Source(String),
}

impl SourceTag {
    /// Pins to a named source.
    #[must_use]
    pub fn source(name: impl Into<String>) -> Self {
        Self::Source(name.into().trim().to_ascii_lowercase())
    }

    /// The pinned source name, if any.
    #[must_use]
    pub fn pinned(&self) -> Option<&str> {
        match self {
            Self::Unified => None,
            Self::Source(name) => Some(name),
        }
    }
}

impl fmt::Display for SourceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unified => f.write_str("unified"),
            Self::Source(name) => write!(f, "source:{name}"),
        }
    }
}

impl FromStr for SourceTag {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unified" => Ok(Self::Unified),
            _ => s
                .strip_prefix("source:")
                .filter(|name| !name.is_empty())
                .map(Self::source)
                .ok_or_else(|| KeyError::InvalidSourceTag(s.to_string())),
        }
    }
}

const SEPARATOR: char = '|';

/// Deterministic cache key.
///
/// The canonical form is `{data_type}|{source_tag}|{symbol}|{scope}`. It is
/// computed once on construction and used verbatim by every backend.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    data_type: DataType,
    source: SourceTag,
    symbol: Symbol,
    scope: String,
    canonical: String,
}

impl CacheKey {
    /// Builds a key. `scope` is the rendered date range, report period, or `latest`.
    #[must_use]
    pub fn new(symbol: &Symbol, data_type: DataType, scope: &str, source: SourceTag) -> Self {
        let scope = sanitize(scope);
        let symbol = Symbol::new(sanitize(symbol.as_str()));
        let source = match source {
            SourceTag::Source(name) => SourceTag::source(sanitize(&name)),
            SourceTag::Unified => SourceTag::Unified,
        };
        let canonical =
            format!("{data_type}{SEPARATOR}{source}{SEPARATOR}{symbol}{SEPARATOR}{scope}");
        Self {
            data_type,
            source,
            symbol,
            scope,
            canonical,
        }
    }

    /// Same key, re-tagged for another source.
    #[must_use]
    pub fn with_source(&self, source: SourceTag) -> Self {
        Self::new(&self.symbol, self.data_type, &self.scope, source)
    }

    /// Data type of the entry.
    #[must_use]
    pub const fn data_type(&self) -> DataType {
        self.data_type
    }

    /// Source tag of the entry.
    #[must_use]
    pub const fn source(&self) -> &SourceTag {
        &self.source
    }

    /// Symbol of the entry.
    #[must_use]
    pub const fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    /// Scope (date range, report period or `latest`).
    #[must_use]
    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Canonical string form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.canonical
    }

    /// Hex blake3 digest of the canonical form, safe to use as a file name.
    #[must_use]
    pub fn digest(&self) -> String {
        blake3::hash(self.canonical.as_bytes()).to_hex().to_string()
    }
}

fn sanitize(component: &str) -> String {
    component.trim().replace(SEPARATOR, "_")
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical)
    }
}

impl FromStr for CacheKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(4, SEPARATOR);
        let (Some(data_type), Some(source), Some(symbol), Some(scope)) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(KeyError::InvalidKey(s.to_string()));
        };
        Ok(Self::new(
            &Symbol::new(symbol),
            data_type.parse()?,
            scope,
            source.parse()?,
        ))
    }
}

impl Serialize for CacheKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.canonical)
    }
}

impl<'de> Deserialize<'de> for CacheKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range() -> DateRange {
        "2024-01-01..2024-01-31".parse().unwrap()
    }

    fn key(symbol: &str, data_type: DataType, scope: &str, source: SourceTag) -> CacheKey {
        CacheKey::new(&Symbol::new(symbol), data_type, scope, source)
    }

    #[test]
    fn test_identical_inputs_give_identical_keys() {
        let scope = range().to_string();
        let a = key("000001", DataType::HistoricalPrices, &scope, SourceTag::Unified);
        let b = key(
            " 000001",
            DataType::HistoricalPrices,
            "2024-01-01..2024-01-31",
            SourceTag::Unified,
        );
        assert_eq!(a.as_str(), b.as_str());
        assert_eq!(a.digest(), b.digest());
        assert_eq!(
            a.as_str(),
            "historical_prices|unified|000001|2024-01-01..2024-01-31"
        );
    }

    #[test]
    fn test_source_tag_distinguishes_keys() {
        let unified = key("600519", DataType::Fundamentals, "latest", SourceTag::Unified);
        let pinned = unified.with_source(SourceTag::source("Tushare"));
        assert_ne!(unified, pinned);
        assert_eq!(pinned.source().pinned(), Some("tushare"));
        assert_eq!(pinned.as_str(), "fundamentals|source:tushare|600519|latest");
    }

    #[test]
    fn test_key_parses_back_from_canonical_form() {
        let key = key("AAPL", DataType::QuoteSnapshot, "latest", SourceTag::source("yahoo"));
        let parsed: CacheKey = key.as_str().parse().unwrap();
        assert_eq!(parsed, key);
        assert_eq!(
            "garbage".parse::<CacheKey>(),
            Err(KeyError::InvalidKey("garbage".to_string()))
        );
        assert_eq!(
            "ohlc|unified|AAPL|latest".parse::<CacheKey>(),
            Err(KeyError::UnknownDataType("ohlc".to_string()))
        );
        assert_eq!(
            "news|vendor|AAPL|latest".parse::<CacheKey>(),
            Err(KeyError::InvalidSourceTag("vendor".to_string()))
        );
    }

    #[test]
    fn test_separator_in_components_is_escaped() {
        let key = key("A|B", DataType::News, "x|y", SourceTag::Unified);
        assert_eq!(key.as_str(), "news|unified|A_B|x_y");
    }

    #[test]
    fn test_date_range_validation() {
        let start = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        assert_eq!(
            DateRange::new(start, end),
            Err(KeyError::InvertedRange { start, end })
        );

        let r = range();
        assert!(r.is_closed_before(NaiveDate::from_ymd_opt(2024, 2, 1).unwrap()));
        assert!(!r.is_closed_before(NaiveDate::from_ymd_opt(2024, 1, 31).unwrap()));
    }

    #[test]
    fn test_date_range_parse_errors() {
        assert_eq!(
            "2024-01-01".parse::<DateRange>(),
            Err(KeyError::InvalidRange("2024-01-01".to_string()))
        );
        let err = "2024-01-01..2024-13-01".parse::<DateRange>().unwrap_err();
        assert!(matches!(err, KeyError::InvalidDate { ref input, .. } if input == "2024-13-01"));
        assert!(err.to_string().starts_with("invalid date '2024-13-01'"));
    }
}
