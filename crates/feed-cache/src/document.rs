//! SQLite-backed DOCUMENT backend.

use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use feed_core::{BackendKind, BackendStore, CacheEntry, CacheKey, DataType, StoreError, StoreResult};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

fn unavailable(e: impl std::fmt::Display) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

fn table_name(data_type: DataType) -> String {
    format!("cache_{}", data_type.as_str())
}

/// Document store with one table per data type.
///
/// Each row holds the serialized [`CacheEntry`] keyed by the canonical cache key,
/// plus `created_at` and `expires_at` columns (unix milliseconds). Expiry is
/// lazy: `get` compares `expires_at` with the current time and drops stale rows.
/// Blocking SQLite calls run on the tokio blocking pool.
#[derive(Debug, Clone)]
pub struct DocumentStore {
    name: String,
    conn: Arc<Mutex<Connection>>,
}

impl DocumentStore {
    /// Open (or create) a document store at the given path.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or schema creation fails.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(unavailable)?;
        }
        let conn = Connection::open(path).map_err(unavailable)?;
        Self::from_connection(conn)
    }

    /// Create an in-memory document store.
    ///
    /// Useful for testing; data is lost when the store is dropped.
    ///
    /// # Errors
    /// Returns an error if schema creation fails.
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory().map_err(unavailable)?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> StoreResult<Self> {
        Self::initialize_schema(&conn)?;
        Ok(Self {
            name: "sqlite".to_string(),
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Set a custom backend name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Initialize one table per data type.
    fn initialize_schema(conn: &Connection) -> StoreResult<()> {
        for data_type in DataType::ALL {
            let table = table_name(data_type);
            conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {table} (
                    cache_key TEXT PRIMARY KEY,
                    document TEXT NOT NULL,
                    source TEXT NOT NULL,
                    created_at INTEGER NOT NULL,
                    expires_at INTEGER NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_{table}_created_at ON {table}(created_at);"
            ))
            .map_err(unavailable)?;
        }
        debug!("Document store schema initialized");
        Ok(())
    }

    /// Run a closure against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> StoreResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || f(&conn.lock()))
            .await
            .map_err(unavailable)?
    }
}

#[async_trait]
impl BackendStore for DocumentStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Document
    }

    #[instrument(skip(self, entry), fields(backend = %self.name, key = %entry.key))]
    async fn put(&self, entry: &CacheEntry) -> StoreResult<()> {
        let table = table_name(entry.data_type);
        let key = entry.key.as_str().to_string();
        let document =
            serde_json::to_string(entry).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        let source = entry.source.clone();
        let created_at = entry.created_at.timestamp_millis();
        let expires_at = entry.expires_at().timestamp_millis();

        self.with_conn(move |conn| {
            conn.execute(
                &format!(
                    "INSERT INTO {table} (cache_key, document, source, created_at, expires_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)
                     ON CONFLICT(cache_key) DO UPDATE SET
                        document = excluded.document,
                        source = excluded.source,
                        created_at = excluded.created_at,
                        expires_at = excluded.expires_at"
                ),
                params![key, document, source, created_at, expires_at],
            )
            .map_err(unavailable)?;
            Ok(())
        })
        .await?;

        debug!("Upserted document");
        Ok(())
    }

    #[instrument(skip(self), fields(backend = %self.name, key = %key))]
    async fn get(&self, key: &CacheKey) -> StoreResult<Option<CacheEntry>> {
        let table = table_name(key.data_type());
        let key_str = key.as_str().to_string();
        let now = Utc::now().timestamp_millis();

        let row = self
            .with_conn(move |conn| {
                let row = conn
                    .query_row(
                        &format!("SELECT document, expires_at FROM {table} WHERE cache_key = ?1"),
                        params![key_str],
                        |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
                    )
                    .optional()
                    .map_err(unavailable)?;

                match row {
                    Some((_, expires_at)) if expires_at <= now => {
                        let delete = format!("DELETE FROM {table} WHERE cache_key = ?1");
                        conn.execute(&delete, params![key_str]).map_err(unavailable)?;
                        Ok(None)
                    }
                    Some((document, _)) => Ok(Some(document)),
                    None => Ok(None),
                }
            })
            .await?;

        let Some(document) = row else {
            debug!("Cache miss");
            return Ok(None);
        };

        let entry: CacheEntry =
            serde_json::from_str(&document).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        if entry.key != *key {
            warn!(stored = %entry.key, "Stored document key does not match");
            return Err(StoreError::Corrupt(format!("key mismatch for {key}")));
        }

        debug!("Cache hit");
        Ok(Some(entry))
    }

    async fn delete(&self, key: &CacheKey) -> StoreResult<()> {
        let table = table_name(key.data_type());
        let key_str = key.as_str().to_string();
        self.with_conn(move |conn| {
            conn.execute(&format!("DELETE FROM {table} WHERE cache_key = ?1"), params![key_str])
                .map_err(unavailable)?;
            Ok(())
        })
        .await
    }

    #[instrument(skip(self), fields(backend = %self.name))]
    async fn delete_older_than(&self, data_type: DataType, age: Duration) -> StoreResult<usize> {
        let age = TimeDelta::from_std(age).map_err(|e| unavailable(format!("Invalid age: {e}")))?;
        let cutoff = (Utc::now() - age).timestamp_millis();
        let table = table_name(data_type);

        let removed = self
            .with_conn(move |conn| {
                conn.execute(&format!("DELETE FROM {table} WHERE created_at < ?1"), params![cutoff])
                    .map_err(unavailable)
            })
            .await?;

        if removed > 0 {
            debug!(removed, %data_type, "Removed old documents");
        }
        Ok(removed)
    }

    async fn ping(&self) -> StoreResult<()> {
        self.with_conn(|conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
                .map_err(unavailable)?;
            Ok(())
        })
        .await
    }
}
