//! Persistent tier backed by a pluggable row store

use super::{CacheError, CacheStats, CacheTier, CachedResponse};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, warn};

/// One stored cache row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRow {
    /// SHA-256 hex of the cache key
    pub key_hash: String,
    pub value: CachedResponse,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    /// Approximate; concurrent increments may be lost
    pub hit_count: u64,
}

impl StoredRow {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Row storage consumed by [`PersistentTier`]
#[async_trait]
pub trait PersistentStore: Send + Sync {
    async fn get(&self, key_hash: &str) -> Result<Option<StoredRow>, CacheError>;

    async fn put(&self, row: StoredRow) -> Result<(), CacheError>;

    /// Delete expired rows, returning how many were removed
    async fn sweep_expired(&self) -> Result<usize, CacheError>;

    async fn clear(&self) -> Result<(), CacheError>;

    async fn len(&self) -> Result<usize, CacheError>;
}

/// Store that lives only as long as the process
#[derive(Debug, Default)]
pub struct InMemoryStore {
    rows: Mutex<HashMap<String, StoredRow>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn rows(&self) -> std::sync::MutexGuard<'_, HashMap<String, StoredRow>> {
        self.rows.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl PersistentStore for InMemoryStore {
    async fn get(&self, key_hash: &str) -> Result<Option<StoredRow>, CacheError> {
        Ok(self.rows().get(key_hash).cloned())
    }

    async fn put(&self, row: StoredRow) -> Result<(), CacheError> {
        self.rows().insert(row.key_hash.clone(), row);
        Ok(())
    }

    async fn sweep_expired(&self) -> Result<usize, CacheError> {
        let now = Utc::now();
        let mut rows = self.rows();
        let before = rows.len();
        rows.retain(|_, row| !row.is_expired(now));
        Ok(before - rows.len())
    }

    async fn clear(&self) -> Result<(), CacheError> {
        self.rows().clear();
        Ok(())
    }

    async fn len(&self) -> Result<usize, CacheError> {
        Ok(self.rows().len())
    }
}

/// One JSON file per row in a directory
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `<cache dir>/narrative-optimizer`
    pub fn default_dir() -> Option<PathBuf> {
        dirs::cache_dir().map(|d| d.join("narrative-optimizer"))
    }

    fn row_path(&self, key_hash: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key_hash))
    }

    async fn row_files(&self) -> Result<Vec<PathBuf>, CacheError> {
        let mut files = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(files),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                files.push(path);
            }
        }
        Ok(files)
    }
}

#[async_trait]
impl PersistentStore for FileStore {
    async fn get(&self, key_hash: &str) -> Result<Option<StoredRow>, CacheError> {
        match tokio::fs::read(self.row_path(key_hash)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, row: StoredRow) -> Result<(), CacheError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let json = serde_json::to_vec(&row)?;
        tokio::fs::write(self.row_path(&row.key_hash), json).await?;
        Ok(())
    }

    async fn sweep_expired(&self) -> Result<usize, CacheError> {
        let now = Utc::now();
        let mut removed = 0;
        for path in self.row_files().await? {
            let expired = match tokio::fs::read(&path).await {
                Ok(bytes) => serde_json::from_slice::<StoredRow>(&bytes)
                    .map(|row| row.is_expired(now))
                    // Unreadable rows are garbage
                    .unwrap_or(true),
                Err(_) => continue,
            };
            if expired && tokio::fs::remove_file(&path).await.is_ok() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn clear(&self) -> Result<(), CacheError> {
        for path in self.row_files().await? {
            tokio::fs::remove_file(path).await?;
        }
        Ok(())
    }

    async fn len(&self) -> Result<usize, CacheError> {
        Ok(self.row_files().await?.len())
    }
}

/// Tier that stores rows keyed by the SHA-256 of the cache key, with a TTL in hours
pub struct PersistentTier {
    store: Arc<dyn PersistentStore>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl PersistentTier {
    pub fn new(store: Arc<dyn PersistentStore>, ttl_hours: u64) -> Self {
        Self {
            store,
            ttl: Duration::from_secs(ttl_hours * 3600),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn hash_key(key: &str) -> String {
        format!("{:x}", Sha256::digest(key.as_bytes()))
    }
}

#[async_trait]
impl CacheTier for PersistentTier {
    fn name(&self) -> &str {
        "persistent"
    }

    async fn get(&self, key: &str) -> Result<Option<CachedResponse>, CacheError> {
        let key_hash = Self::hash_key(key);
        let row = self.store.get(&key_hash).await?;

        match row {
            Some(row) if !row.is_expired(Utc::now()) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                let value = row.value.clone();

                let bumped = StoredRow {
                    hit_count: row.hit_count + 1,
                    ..row
                };
                if let Err(e) = self.store.put(bumped).await {
                    debug!("Failed to record persistent cache hit: {}", e);
                }
                Ok(Some(value))
            }
            // Expired rows stay until the next write sweeps them
            _ => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, value: CachedResponse, ttl: Option<Duration>) -> Result<(), CacheError> {
        match self.store.sweep_expired().await {
            Ok(0) => {}
            Ok(n) => debug!("Swept {} expired persistent cache rows", n),
            Err(e) => warn!("Persistent cache sweep failed: {}", e),
        }

        let now = Utc::now();
        let ttl = chrono::Duration::from_std(ttl.unwrap_or(self.ttl))
            .map_err(|e| CacheError::Backend(format!("TTL out of range: {}", e)))?;
        let key_hash = Self::hash_key(key);

        // A rewrite never moves a row's expiry backwards
        let mut expires_at = now + ttl;
        if let Some(previous) = self.store.get(&key_hash).await? {
            if expires_at <= previous.expires_at {
                expires_at = previous.expires_at + chrono::Duration::nanoseconds(1);
            }
        }

        self.store
            .put(StoredRow {
                key_hash,
                value,
                expires_at,
                created_at: now,
                hit_count: 0,
            })
            .await
    }

    async fn clear(&self) -> Result<(), CacheError> {
        self.store.clear().await
    }

    async fn stats(&self) -> CacheStats {
        let size = self.store.len().await.unwrap_or(0);
        CacheStats::new(
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
            size,
        )
    }
}
