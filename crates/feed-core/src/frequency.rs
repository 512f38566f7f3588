//! Bar frequency and reporting period definitions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Granularity of historical price bars.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataFrequency {
    /// One-minute bars.
    Minute,
    /// Five-minute bars.
    FiveMinute,
    /// Fifteen-minute bars.
    FifteenMinute,
    /// Thirty-minute bars.
    ThirtyMinute,
    /// Hourly bars.
    Hourly,
    /// Daily bars.
    #[default]
    Daily,
    /// Weekly bars.
    Weekly,
    /// Monthly bars.
    Monthly,
}

impl DataFrequency {
    /// Stable short name, used inside cache keys.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Minute => "1m",
            Self::FiveMinute => "5m",
            Self::FifteenMinute => "15m",
            Self::ThirtyMinute => "30m",
            Self::Hourly => "1h",
            Self::Daily => "1d",
            Self::Weekly => "1w",
            Self::Monthly => "1mo",
        }
    }
}

impl fmt::Display for DataFrequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Period type for financial statements.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeriodType {
    /// Annual reporting period.
    #[default]
    Annual,
    /// Quarterly reporting period.
    Quarterly,
}
