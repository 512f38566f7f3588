//! Error types for cache and data source operations.
//!
//! Errors are layered so that each boundary only exposes what its callers can act on:
//!
//! - [`StoreError`] - a single storage backend failed; recovered by trying the next backend
//! - [`AdapterError`] - a single upstream source failed; recovered by trying the next source
//! - [`OrchestratorError`] - no storage backend could answer at all
//! - [`FallbackError`] - terminal failure surfaced to callers of the facade

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::market::MarketCategory;

/// Errors raised by a single storage backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The backend could not be reached or refused the operation.
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    /// The backend did not answer within the configured timeout.
    #[error("Backend timed out after {0:?}")]
    Timeout(Duration),

    /// The stored entry could not be decoded. Treated as a miss.
    #[error("Corrupt cache entry: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Returns true if the backend itself is healthy and only the entry is bad.
    #[must_use]
    pub const fn is_corrupt(&self) -> bool {
        matches!(self, Self::Corrupt(_))
    }
}

/// Result type alias using [`StoreError`].
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Errors raised by a single upstream data source adapter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdapterError {
    /// The source has no data for the requested symbol or data type.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The source rejected the call because of rate limiting.
    #[error("Rate limited: retry after {retry_after:?}")]
    RateLimited {
        /// Suggested time to wait before retrying.
        retry_after: Option<Duration>,
    },

    /// The source did not answer within the configured timeout.
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// Credentials were missing or rejected.
    #[error("Authentication failed: {0}")]
    AuthFailure(String),

    /// Any other failure (network, parse, provider-side error).
    #[error("{0}")]
    Unknown(String),
}

/// Result type alias using [`AdapterError`].
pub type AdapterResult<T> = std::result::Result<T, AdapterError>;

/// Errors raised by the cache orchestrator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OrchestratorError {
    /// Every backend that was attempted failed with a backend error.
    #[error("All cache backends are unavailable")]
    AllBackendsUnavailable,
}

/// One failed source attempt, recorded for [`FallbackError::AllSourcesFailed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFailure {
    /// Name of the source that was tried.
    pub source: String,
    /// Why it failed.
    pub error: AdapterError,
}

impl fmt::Display for SourceFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.source, self.error)
    }
}

/// Terminal errors returned by the fallback facade.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FallbackError {
    /// No enabled data source applies to the requested market.
    #[error("No data source configured for market {market}")]
    NoSourceConfigured {
        /// The market that was resolved for the request.
        market: MarketCategory,
    },

    /// Every resolved source was tried and none returned data.
    #[error("All data sources failed: [{}]", format_failures(.attempts, .skipped))]
    AllSourcesFailed {
        /// Sources whose `fetch` was called, in the order they were tried.
        attempts: Vec<SourceFailure>,
        /// Sources skipped because `is_available()` returned false.
        skipped: Vec<String>,
    },

    /// The caller cancelled the request or its deadline passed.
    #[error("Request cancelled")]
    Cancelled,
}

impl FallbackError {
    /// Names of every source that was attempted, in order.
    #[must_use]
    pub fn attempted_sources(&self) -> Vec<&str> {
        match self {
            Self::AllSourcesFailed { attempts, .. } => {
                attempts.iter().map(|a| a.source.as_str()).collect()
            }
            _ => Vec::new(),
        }
    }
}

fn format_failures(attempts: &[SourceFailure], skipped: &[String]) -> String {
    let mut parts: Vec<String> = attempts.iter().map(ToString::to_string).collect();
    parts.extend(skipped.iter().map(|s| format!("{s}: skipped (unavailable)")));
    parts.join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_sources_failed_message_names_every_source() {
        let err = FallbackError::AllSourcesFailed {
            attempts: vec![
                SourceFailure {
                    source: "tushare".to_string(),
                    error: AdapterError::AuthFailure("bad token".to_string()),
                },
                SourceFailure {
                    source: "akshare".to_string(),
                    error: AdapterError::RateLimited { retry_after: None },
                },
            ],
            skipped: vec!["baostock".to_string()],
        };

        let msg = err.to_string();
        assert!(msg.contains("tushare: Authentication failed: bad token"));
        assert!(msg.contains("akshare: Rate limited"));
        assert!(msg.contains("baostock: skipped"));
        assert_eq!(err.attempted_sources(), vec!["tushare", "akshare"]);
    }

    #[test]
    fn test_corrupt_is_recognized() {
        assert!(StoreError::Corrupt("bad json".to_string()).is_corrupt());
        assert!(!StoreError::Timeout(Duration::from_secs(1)).is_corrupt());
    }
}
