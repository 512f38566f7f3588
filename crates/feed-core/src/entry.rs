//! Cache entry: the unit moved between backends.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::key::{CacheKey, DataType};
use crate::types::Payload;

/// A cached payload plus the metadata needed to decide whether it is still fresh.
///
/// Entries are never mutated in place; a refresh writes a new entry under the
/// same key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Key the entry is stored under.
    pub key: CacheKey,
    /// Cached value.
    pub payload: Payload,
    /// Data type (always equal to `key.data_type()`).
    pub data_type: DataType,
    /// Name of the upstream source that produced the payload.
    pub source: String,
    /// When the payload was fetched upstream.
    pub created_at: DateTime<Utc>,
    /// Lifetime in seconds, fixed by the TTL policy for the data type.
    pub ttl_seconds: u64,
}

impl CacheEntry {
    /// Creates an entry stamped with the current time.
    #[must_use]
    pub fn new(
        key: CacheKey,
        payload: Payload,
        source: impl Into<String>,
        ttl_seconds: u64,
    ) -> Self {
        Self {
            data_type: key.data_type(),
            key,
            payload,
            source: source.into(),
            created_at: Utc::now(),
            ttl_seconds,
        }
    }

    /// Overrides the creation time.
    #[must_use]
    pub const fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// Instant after which the entry is stale.
    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        let ttl = i64::try_from(self.ttl_seconds)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .unwrap_or(TimeDelta::MAX);
        self.created_at
            .checked_add_signed(ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Returns true if the entry is stale at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at()
    }

    /// Returns true if the entry is stale now.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Seconds left before expiry at `now`, zero if already stale.
    #[must_use]
    pub fn remaining_ttl_at(&self, now: DateTime<Utc>) -> u64 {
        u64::try_from((self.expires_at() - now).num_seconds()).unwrap_or(0)
    }

    /// Returns true if the entry was created before `cutoff`.
    #[must_use]
    pub fn is_older_than(&self, cutoff: DateTime<Utc>) -> bool {
        self.created_at < cutoff
    }
}
