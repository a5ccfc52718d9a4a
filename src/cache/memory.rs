//! In-process LRU tier

use super::{CacheError, CacheStats, CacheTier, CachedResponse};
use async_trait::async_trait;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: CachedResponse,
    expires_at: Instant,
}

#[derive(Debug)]
struct MemoryState {
    entries: LruCache<String, MemoryEntry>,
    hits: u64,
    misses: u64,
}

/// Bounded in-memory tier with strict LRU eviction and per-entry TTL
pub struct MemoryTier {
    state: Mutex<MemoryState>,
    default_ttl: Duration,
}

impl MemoryTier {
    pub fn new(max_size: usize, default_ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(max_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            state: Mutex::new(MemoryState {
                entries: LruCache::new(capacity),
                hits: 0,
                misses: 0,
            }),
            default_ttl,
        }
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether an entry (expired or not) is physically present; does not touch recency
    pub fn contains(&self, key: &str) -> bool {
        self.lock().entries.contains(key)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl CacheTier for MemoryTier {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<CachedResponse>, CacheError> {
        let now = Instant::now();
        let mut state = self.lock();

        let expired = state.entries.peek(key).is_some_and(|e| now >= e.expires_at);
        if expired {
            state.entries.pop(key);
        }

        let live = state.entries.get(key).map(|entry| entry.value.clone());
        if live.is_some() {
            state.hits += 1;
        } else {
            state.misses += 1;
        }
        Ok(live)
    }

    async fn set(&self, key: &str, value: CachedResponse, ttl: Option<Duration>) -> Result<(), CacheError> {
        let now = Instant::now();
        let mut state = self.lock();

        // A rewrite never moves an entry's expiry backwards
        let mut expires_at = now + ttl.unwrap_or(self.default_ttl);
        if let Some(previous) = state.entries.peek(key) {
            if expires_at <= previous.expires_at {
                expires_at = previous.expires_at + Duration::from_nanos(1);
            }
        }

        if let Some((evicted, _)) = state.entries.push(key.to_string(), MemoryEntry { value, expires_at }) {
            if evicted != key {
                debug!("Evicted least recently used entry {}", evicted);
            }
        }
        Ok(())
    }

    async fn clear(&self) -> Result<(), CacheError> {
        self.lock().entries.clear();
        Ok(())
    }

    async fn stats(&self) -> CacheStats {
        let state = self.lock();
        CacheStats::new(state.hits, state.misses, state.entries.len())
    }
}
