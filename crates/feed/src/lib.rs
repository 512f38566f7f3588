#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factordynamics/feed/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

//! Tiered market-data cache with prioritized source fallback.
//!
//! This crate ties the workspace together. It re-exports the core types, the
//! cache backends and the bundled adapters, and provides:
//!
//! - [`FeedConfig`] - TOML configuration, validated on load
//! - [`AdapterRegistry`] and [`SourceConfig`] - adapters and the live source set
//! - [`DataSourcePriorityResolver`] - which sources to try, in which order
//! - [`FallbackOrchestrator`] - cache-first fetching with source fallback
//! - [`CacheSystem`] - builds and shuts down the whole stack
//!
//! # Features
//!
//! - `yahoo` - Yahoo Finance adapter
//! - `tushare` - Tushare Pro adapter
//! - `cache-sqlite` - SQLite document tier
//! - `cache-redis` - Redis fast tier

// Core types and traits
pub use feed_core::*;

// Cache implementations
#[cfg(feature = "cache-sqlite")]
pub use feed_cache::DocumentStore;
#[cfg(feature = "cache-redis")]
pub use feed_cache::RedisStore;
pub use feed_cache::{
    BackendDescriptor, BackendHealthMonitor, BackendStats, BackendTimeouts, CacheOrchestrator,
    CacheStrategy, FileStore, Health, HealthConfig, MemoryStore, UnknownStrategy,
};

// Adapters
#[cfg(feature = "tushare")]
pub use feed_tushare::TushareAdapter;
#[cfg(feature = "yahoo")]
pub use feed_yahoo::YahooAdapter;

pub mod config;
mod fallback;
mod registry;
mod resolver;
mod system;

pub use config::{ConfigError, FeedConfig};
pub use fallback::{FallbackOrchestrator, Fetched, SourceTimeouts};
pub use registry::{
    AdapterRegistry, Credentials, DataSourceDescriptor, SourceConfig, SourceSnapshot,
};
pub use resolver::{DataSourcePriorityResolver, ResolvedSource};
pub use system::CacheSystem;
