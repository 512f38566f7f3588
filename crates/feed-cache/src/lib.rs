#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factordynamics/feed/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

//! Tiered cache backends and orchestration.
//!
//! This crate provides implementations of the [`BackendStore`] trait from `feed-core`:
//!
//! - [`MemoryStore`] - In-process FAST backend with native expiry
//! - [`RedisStore`] - Redis FAST backend (requires `redis` feature)
//! - [`DocumentStore`] - SQLite DOCUMENT backend (default, requires `sqlite` feature)
//! - [`FileStore`] - Local FILE backend, always available
//!
//! plus the [`BackendHealthMonitor`] and the [`CacheOrchestrator`] that routes
//! reads and writes across tiers.

/// SQLite document store.
#[cfg(feature = "sqlite")]
pub mod document;
/// Local file store.
pub mod file;
/// Backend health tracking.
pub mod health;
/// In-memory store.
pub mod memory;
/// Cache orchestration across tiers.
pub mod orchestrator;
/// Per-backend operation counters.
pub mod stats;

/// Redis store.
#[cfg(feature = "redis")]
pub mod redis;

// Re-export the trait for convenience
pub use feed_core::BackendStore;

// Re-export implementations
pub use file::FileStore;
pub use health::{BackendDescriptor, BackendHealthMonitor, Health, HealthConfig};
pub use memory::MemoryStore;
pub use orchestrator::{BackendTimeouts, CacheOrchestrator, CacheStrategy, UnknownStrategy};
pub use stats::BackendStats;

#[cfg(feature = "sqlite")]
pub use document::DocumentStore;
#[cfg(feature = "redis")]
pub use self::redis::RedisStore;
