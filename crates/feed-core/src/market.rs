//! Market categories used to decide which data sources apply to a symbol.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::types::Symbol;

/// Market a security trades in.
///
/// Data source descriptors list the markets they apply to; the resolver filters
/// on the market of the requested symbol.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MarketCategory {
    /// Mainland China A shares (Shanghai, Shenzhen, Beijing).
    AShares,
    /// US listed stocks.
    UsStocks,
    /// Hong Kong listed stocks.
    HkStocks,
}

impl MarketCategory {
    /// All known markets.
    pub const ALL: [Self; 3] = [Self::AShares, Self::UsStocks, Self::HkStocks];

    /// Canonical configuration name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::AShares => "a_shares",
            Self::UsStocks => "us_stocks",
            Self::HkStocks => "hk_stocks",
        }
    }

    /// Classifies a symbol by its shape.
    ///
    /// - six digits, optionally with `.SH`, `.SZ` or `.BJ` -> A shares
    /// - `.HK` suffix, or four to five digits -> Hong Kong
    /// - anything else -> US
    #[must_use]
    pub fn detect(symbol: &Symbol) -> Self {
        let s = symbol.as_str();
        if let Some(code) = s.strip_suffix(".HK") {
            if !code.is_empty() {
                return Self::HkStocks;
            }
        }

        let code = [".SH", ".SZ", ".BJ", ".SS"]
            .iter()
            .find_map(|suffix| s.strip_suffix(suffix))
            .unwrap_or(s);

        let all_digits = !code.is_empty() && code.bytes().all(|b| b.is_ascii_digit());
        match (all_digits, code.len()) {
            (true, 6) => Self::AShares,
            (true, 4 | 5) => Self::HkStocks,
            _ => Self::UsStocks,
        }
    }
}

impl fmt::Display for MarketCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a market name is not recognized.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown market category '{0}'")]
pub struct UnknownMarket(pub String);

impl FromStr for MarketCategory {
    type Err = UnknownMarket;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "a_shares" | "cn" | "china_a" => Ok(Self::AShares),
            "us_stocks" | "us" => Ok(Self::UsStocks),
            "hk_stocks" | "hk" => Ok(Self::HkStocks),
            _ => Err(UnknownMarket(s.to_string())),
        }
    }
}

impl Serialize for MarketCategory {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for MarketCategory {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_a_shares() {
        assert_eq!(MarketCategory::detect(&Symbol::new("000001")), MarketCategory::AShares);
        assert_eq!(MarketCategory::detect(&Symbol::new("600519.sh")), MarketCategory::AShares);
        assert_eq!(MarketCategory::detect(&Symbol::new("300750.SZ")), MarketCategory::AShares);
    }

    #[test]
    fn test_detect_hk_and_us() {
        assert_eq!(MarketCategory::detect(&Symbol::new("0700.HK")), MarketCategory::HkStocks);
        assert_eq!(MarketCategory::detect(&Symbol::new("00700")), MarketCategory::HkStocks);
        assert_eq!(MarketCategory::detect(&Symbol::new("AAPL")), MarketCategory::UsStocks);
        assert_eq!(MarketCategory::detect(&Symbol::new("BRK.B")), MarketCategory::UsStocks);
    }

    #[test]
    fn test_parse_aliases() {
        assert_eq!("CN".parse::<MarketCategory>().unwrap(), MarketCategory::AShares);
        assert_eq!("us_stocks".parse::<MarketCategory>().unwrap(), MarketCategory::UsStocks);
        assert_eq!(" Hk ".parse::<MarketCategory>().unwrap(), MarketCategory::HkStocks);
        let err = "crypto".parse::<MarketCategory>().unwrap_err();
        assert_eq!(err, UnknownMarket("crypto".to_string()));
        assert_eq!(err.to_string(), "unknown market category 'crypto'");
    }
}
