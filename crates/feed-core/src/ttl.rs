//! Time-to-live policy per data type.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::key::DataType;
use crate::request::DataRequest;

/// TTL in seconds for each data type.
///
/// Historical prices get two values: ranges that ended before today never
/// change upstream and are kept for `historical_closed_secs`; ranges that
/// include today are refreshed after `historical_open_secs`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TtlPolicy {
    /// Quote snapshots.
    pub quote_snapshot_secs: u64,
    /// News and announcements.
    pub news_secs: u64,
    /// Fundamentals.
    pub fundamentals_secs: u64,
    /// Historical prices over a range fully in the past.
    pub historical_closed_secs: u64,
    /// Historical prices over a range that reaches today, or with no range.
    pub historical_open_secs: u64,
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self {
            quote_snapshot_secs: 300,
            news_secs: 6 * 3600,
            fundamentals_secs: 24 * 3600,
            historical_closed_secs: 365 * 24 * 3600,
            historical_open_secs: 3600,
        }
    }
}

impl TtlPolicy {
    /// TTL for a request evaluated on `today`.
    #[must_use]
    pub fn ttl_for(&self, request: &DataRequest, today: NaiveDate) -> u64 {
        match request.data_type {
            DataType::QuoteSnapshot => self.quote_snapshot_secs,
            DataType::News => self.news_secs,
            DataType::Fundamentals => self.fundamentals_secs,
            DataType::HistoricalPrices => match request.range {
                Some(range) if range.is_closed_before(today) => self.historical_closed_secs,
                _ => self.historical_open_secs,
            },
        }
    }

    /// Returns the name of the first zero TTL, if any.
    #[must_use]
    pub fn first_zero(&self) -> Option<&'static str> {
        [
            ("quote_snapshot_secs", self.quote_snapshot_secs),
            ("news_secs", self.news_secs),
            ("fundamentals_secs", self.fundamentals_secs),
            ("historical_closed_secs", self.historical_closed_secs),
            ("historical_open_secs", self.historical_open_secs),
        ]
        .into_iter()
        .find(|(_, secs)| *secs == 0)
        .map(|(name, _)| name)
    }
}
