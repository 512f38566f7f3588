//! Storage backend abstraction.
//!
//! A [`BackendStore`] holds [`CacheEntry`] values keyed by [`CacheKey`]. Three
//! kinds exist, tried in [`BackendKind::PREFERENCE`] order by the orchestrator.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug};
use std::time::Duration;

use crate::{
    entry::CacheEntry,
    error::StoreResult,
    key::{CacheKey, DataType},
};

/// Storage technology of a backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Fast key-value store with native expiry.
    Fast,
    /// Document store with lazy expiry.
    Document,
    /// Local files. Always available.
    File,
}

impl BackendKind {
    /// Default lookup order.
    pub const PREFERENCE: [Self; 3] = [Self::Fast, Self::Document, Self::File];

    /// Stable lowercase name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Fast => "fast",
            Self::Document => "document",
            Self::File => "file",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Key-value storage for cache entries.
///
/// Implementations are shared between concurrent callers and must not assume a
/// single writer. `put` is idempotent: writing the same entry twice is
/// observably a single write.
#[async_trait]
pub trait BackendStore: Send + Sync + Debug {
    /// Unique name of this backend instance (e.g. `"memory"`, `"sqlite"`).
    fn name(&self) -> &str;

    /// Storage technology of this backend.
    fn kind(&self) -> BackendKind;

    /// Stores an entry under `entry.key`, replacing any previous value.
    async fn put(&self, entry: &CacheEntry) -> StoreResult<()>;

    /// Retrieves an entry.
    ///
    /// Returns `Ok(None)` on a miss. Backends may return entries past their TTL;
    /// callers check [`CacheEntry::is_expired`] before using them.
    async fn get(&self, key: &CacheKey) -> StoreResult<Option<CacheEntry>>;

    /// Removes an entry. Removing a missing key is not an error.
    async fn delete(&self, key: &CacheKey) -> StoreResult<()>;

    /// Removes entries of `data_type` created more than `age` ago.
    ///
    /// Returns the number of entries removed.
    async fn delete_older_than(&self, data_type: DataType, age: Duration) -> StoreResult<usize>;

    /// Cheap connectivity probe.
    async fn ping(&self) -> StoreResult<()>;
}
