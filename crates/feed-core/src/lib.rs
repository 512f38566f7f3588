#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factordynamics/feed/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

//! Core traits and types for the tiered market-data cache.
//!
//! This crate provides the foundational abstractions shared by every layer:
//!
//! - [`CacheKey`](key::CacheKey) and [`CacheEntry`](entry::CacheEntry) - The unit moved between
//!   layers
//! - [`DataRequest`](request::DataRequest) - A logical "give me X for Y" request
//! - [`TtlPolicy`](ttl::TtlPolicy) - Time-to-live per data type
//! - [`BackendStore`](store::BackendStore) - Storage backend abstraction
//! - [`SourceAdapter`](adapter::SourceAdapter) - Upstream provider abstraction
//! - [`MarketCategory`](market::MarketCategory) - Market classification of symbols

/// Upstream data source trait.
pub mod adapter;
/// Cache entries.
pub mod entry;
/// Error types for cache and source operations.
pub mod error;
/// DataFrame conversion for tabular payloads.
pub mod frame;
/// Data frequency and period type definitions.
pub mod frequency;
/// Cache keys, data types and date ranges.
pub mod key;
/// Market categories.
pub mod market;
/// Logical data requests.
pub mod request;
/// Storage backend trait.
pub mod store;
/// Time-to-live policy.
pub mod ttl;
/// Core data types (Symbol, OHLCV, quotes, fundamentals, news).
pub mod types;

// Re-export commonly used items at crate root
pub use adapter::SourceAdapter;
pub use entry::CacheEntry;
pub use error::{
    AdapterError, AdapterResult, FallbackError, OrchestratorError, SourceFailure, StoreError,
    StoreResult,
};
pub use frequency::{DataFrequency, PeriodType};
pub use key::{CacheKey, DataType, DateRange, KeyError, SourceTag};
pub use market::{MarketCategory, UnknownMarket};
pub use request::{DataRequest, FetchParams};
pub use store::{BackendKind, BackendStore};
pub use ttl::TtlPolicy;
pub use types::{FinancialStatement, KeyMetrics, NewsItem, OhlcvBar, Payload, QuoteSnapshot, Symbol};
