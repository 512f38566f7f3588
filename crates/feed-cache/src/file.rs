//! Local file FILE backend, the store of last resort.

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use feed_core::{
    BackendKind, BackendStore, CacheEntry, CacheKey, DataType, Payload, StoreError, StoreResult,
};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::fs;
use tracing::{debug, instrument, warn};

const PAYLOAD_EXT: &str = "json";
const META_SUFFIX: &str = ".meta.json";

/// Sidecar metadata written next to each payload file.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct FileMetadata {
    key: CacheKey,
    source: String,
    created_at: DateTime<Utc>,
    ttl_seconds: u64,
}

impl FileMetadata {
    fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        let ttl = i64::try_from(self.ttl_seconds)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .unwrap_or(TimeDelta::MAX);
        self.created_at
            .checked_add_signed(ttl)
            .is_some_and(|expires_at| now >= expires_at)
    }
}

fn unavailable(e: impl std::fmt::Display) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

/// File store: one payload file plus one metadata file per key.
///
/// Layout is `{root}/{data_type}/{digest}.json` and
/// `{root}/{data_type}/{digest}.meta.json`, where `digest` is the blake3 hash of
/// the canonical key. `get` reads the metadata first and only opens the payload
/// for live entries. Writes go to a temporary file renamed into place, so a
/// reader never sees a half-written file.
#[derive(Debug)]
pub struct FileStore {
    name: String,
    root: PathBuf,
    tmp_counter: AtomicU64,
}

impl FileStore {
    /// Create a file store rooted at `root`. The directory is created lazily.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            name: "file".to_string(),
            root: root.into(),
            tmp_counter: AtomicU64::new(0),
        }
    }

    /// Set a custom backend name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Root directory of the store.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn type_dir(&self, data_type: DataType) -> PathBuf {
        self.root.join(data_type.as_str())
    }

    fn paths(&self, key: &CacheKey) -> (PathBuf, PathBuf) {
        let dir = self.type_dir(key.data_type());
        let digest = key.digest();
        (
            dir.join(format!("{digest}.{PAYLOAD_EXT}")),
            dir.join(format!("{digest}{META_SUFFIX}")),
        )
    }

    async fn write_atomic(&self, path: &Path, bytes: Vec<u8>) -> StoreResult<()> {
        let n = self.tmp_counter.fetch_add(1, Ordering::Relaxed);
        let tmp = path.with_extension(format!("tmp{}.{n}", std::process::id()));
        fs::write(&tmp, bytes).await.map_err(unavailable)?;
        if let Err(e) = fs::rename(&tmp, path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(unavailable(e));
        }
        Ok(())
    }

    async fn remove_pair(payload: &Path, meta: &Path) -> StoreResult<()> {
        for path in [meta, payload] {
            match fs::remove_file(path).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(unavailable(e)),
            }
        }
        Ok(())
    }

    async fn read_metadata(path: &Path) -> StoreResult<Option<FileMetadata>> {
        let bytes = match fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(unavailable(e)),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| StoreError::Corrupt(format!("{}: {e}", path.display())))
    }
}

#[async_trait]
impl BackendStore for FileStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> BackendKind {
        BackendKind::File
    }

    #[instrument(skip(self, entry), fields(backend = %self.name, key = %entry.key))]
    async fn put(&self, entry: &CacheEntry) -> StoreResult<()> {
        let (payload_path, meta_path) = self.paths(&entry.key);
        if let Some(dir) = payload_path.parent() {
            fs::create_dir_all(dir).await.map_err(unavailable)?;
        }

        let payload =
            serde_json::to_vec(&entry.payload).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        let meta = FileMetadata {
            key: entry.key.clone(),
            source: entry.source.clone(),
            created_at: entry.created_at,
            ttl_seconds: entry.ttl_seconds,
        };
        let meta =
            serde_json::to_vec_pretty(&meta).map_err(|e| StoreError::Corrupt(e.to_string()))?;

        // Payload first: a metadata file always points at a complete payload.
        self.write_atomic(&payload_path, payload).await?;
        self.write_atomic(&meta_path, meta).await?;

        debug!(path = %payload_path.display(), "Wrote cache file");
        Ok(())
    }

    #[instrument(skip(self), fields(backend = %self.name, key = %key))]
    async fn get(&self, key: &CacheKey) -> StoreResult<Option<CacheEntry>> {
        let (payload_path, meta_path) = self.paths(key);

        let Some(meta) = Self::read_metadata(&meta_path).await? else {
            debug!("Cache miss");
            return Ok(None);
        };
        if meta.key != *key {
            return Err(StoreError::Corrupt(format!(
                "metadata key {} does not match {key}",
                meta.key
            )));
        }

        if meta.is_expired_at(Utc::now()) {
            debug!("Expired entry, removing files");
            Self::remove_pair(&payload_path, &meta_path).await?;
            return Ok(None);
        }

        let bytes = match fs::read(&payload_path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StoreError::Corrupt(format!(
                    "payload missing for {}",
                    payload_path.display()
                )));
            }
            Err(e) => return Err(unavailable(e)),
        };
        let payload: Payload = serde_json::from_slice(&bytes)
            .map_err(|e| StoreError::Corrupt(format!("{}: {e}", payload_path.display())))?;

        debug!("Cache hit");
        Ok(Some(
            CacheEntry::new(key.clone(), payload, meta.source, meta.ttl_seconds)
                .with_created_at(meta.created_at),
        ))
    }

    async fn delete(&self, key: &CacheKey) -> StoreResult<()> {
        let (payload_path, meta_path) = self.paths(key);
        Self::remove_pair(&payload_path, &meta_path).await
    }

    #[instrument(skip(self), fields(backend = %self.name))]
    async fn delete_older_than(&self, data_type: DataType, age: Duration) -> StoreResult<usize> {
        let age = TimeDelta::from_std(age).map_err(|e| unavailable(format!("Invalid age: {e}")))?;
        let cutoff = Utc::now() - age;
        let dir = self.type_dir(data_type);

        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(unavailable(e)),
        };

        let mut removed = 0;
        while let Some(item) = entries.next_entry().await.map_err(unavailable)? {
            let meta_path = item.path();
            let Some(digest) = meta_path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| n.strip_suffix(META_SUFFIX))
                .map(str::to_string)
            else {
                continue;
            };
            let payload_path = dir.join(format!("{digest}.{PAYLOAD_EXT}"));

            match Self::read_metadata(&meta_path).await {
                Ok(Some(meta)) if meta.created_at < cutoff => {
                    Self::remove_pair(&payload_path, &meta_path).await?;
                    removed += 1;
                }
                Ok(_) => {}
                Err(StoreError::Corrupt(reason)) => {
                    warn!(%reason, "Removing unreadable cache metadata");
                    Self::remove_pair(&payload_path, &meta_path).await?;
                }
                Err(e) => return Err(e),
            }
        }

        if removed > 0 {
            debug!(removed, %data_type, "Removed old cache files");
        }
        Ok(removed)
    }

    async fn ping(&self) -> StoreResult<()> {
        fs::create_dir_all(&self.root).await.map_err(unavailable)
    }
}
