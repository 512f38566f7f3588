//! In-memory FAST backend.

use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use feed_core::{BackendKind, BackendStore, CacheEntry, CacheKey, DataType, StoreError, StoreResult};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, instrument};

/// In-process key-value store with native expiry.
///
/// Entries past their TTL are invisible to `get` and are pruned on the next
/// write, so no sweep is needed. Data is lost when the store is dropped.
#[derive(Debug)]
pub struct MemoryStore {
    name: String,
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create a new empty store named `"memory"`.
    #[must_use]
    pub fn new() -> Self {
        Self::with_name("memory")
    }

    /// Create a new empty store with a custom backend name.
    #[must_use]
    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Number of live (non-expired) entries.
    pub async fn len(&self) -> usize {
        let now = Utc::now();
        self.entries
            .read()
            .await
            .values()
            .filter(|e| !e.is_expired_at(now))
            .count()
    }

    /// Returns true if the store holds no live entries.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl BackendStore for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Fast
    }

    #[instrument(skip(self, entry), fields(backend = %self.name, key = %entry.key))]
    async fn put(&self, entry: &CacheEntry) -> StoreResult<()> {
        let now = Utc::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired_at(now));
        let pruned = before - entries.len();
        if pruned > 0 {
            debug!(pruned, "Pruned expired entries");
        }
        entries.insert(entry.key.as_str().to_string(), entry.clone());
        debug!(ttl = entry.ttl_seconds, "Cached entry");
        Ok(())
    }

    #[instrument(skip(self), fields(backend = %self.name, key = %key))]
    async fn get(&self, key: &CacheKey) -> StoreResult<Option<CacheEntry>> {
        let entries = self.entries.read().await;
        match entries.get(key.as_str()) {
            Some(entry) if !entry.is_expired() => {
                debug!("Cache hit");
                Ok(Some(entry.clone()))
            }
            _ => {
                debug!("Cache miss");
                Ok(None)
            }
        }
    }

    async fn delete(&self, key: &CacheKey) -> StoreResult<()> {
        self.entries.write().await.remove(key.as_str());
        Ok(())
    }

    #[instrument(skip(self), fields(backend = %self.name))]
    async fn delete_older_than(&self, data_type: DataType, age: Duration) -> StoreResult<usize> {
        let age = TimeDelta::from_std(age)
            .map_err(|e| StoreError::Unavailable(format!("Invalid age: {e}")))?;
        let cutoff = Utc::now() - age;

        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| e.data_type != data_type || !e.is_older_than(cutoff));
        let removed = before - entries.len();
        if removed > 0 {
            debug!(removed, %data_type, "Removed old entries");
        }
        Ok(removed)
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use feed_core::{Payload, SourceTag, Symbol};

    fn entry(symbol: &str, data_type: DataType, ttl: u64) -> CacheEntry {
        let key = CacheKey::new(&Symbol::new(symbol), data_type, "latest", SourceTag::Unified);
        CacheEntry::new(key, Payload::Json(serde_json::json!({"v": symbol})), "test", ttl)
    }

    #[tokio::test]
    async fn test_put_get_round_trip() {
        let store = MemoryStore::new();
        let e = entry("AAPL", DataType::QuoteSnapshot, 300);

        assert!(store.get(&e.key).await.unwrap().is_none());
        store.put(&e).await.unwrap();
        assert_eq!(store.get(&e.key).await.unwrap(), Some(e.clone()));

        // Idempotent
        store.put(&e).await.unwrap();
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_expired_entries_are_invisible_and_pruned() {
        let store = MemoryStore::new();
        let stale = entry("AAPL", DataType::QuoteSnapshot, 60)
            .with_created_at(Utc::now() - TimeDelta::seconds(120));
        store.put(&stale).await.unwrap();
        assert!(store.get(&stale.key).await.unwrap().is_none());
        assert!(store.is_empty().await);

        store.put(&entry("MSFT", DataType::QuoteSnapshot, 60)).await.unwrap();
        assert_eq!(store.entries.read().await.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_older_than_respects_data_type() {
        let store = MemoryStore::new();
        let old = Utc::now() - TimeDelta::hours(2);
        store.put(&entry("A", DataType::News, 86_400).with_created_at(old)).await.unwrap();
        store.put(&entry("B", DataType::Fundamentals, 86_400).with_created_at(old)).await.unwrap();
        store.put(&entry("C", DataType::News, 86_400)).await.unwrap();

        let removed = store
            .delete_older_than(DataType::News, Duration::from_secs(3600))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn test_delete() {
        let store = MemoryStore::new();
        let e = entry("AAPL", DataType::News, 300);
        store.put(&e).await.unwrap();
        store.delete(&e.key).await.unwrap();
        store.delete(&e.key).await.unwrap();
        assert!(store.get(&e.key).await.unwrap().is_none());
    }
}
