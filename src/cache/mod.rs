//! Multi-tier response cache
//!
//! Every tier implements [`CacheTier`]. The [`CompositeCache`] reads tiers fastest first
//! and warms faster tiers on a hit; writes fan out to all tiers concurrently. Tiers are dumb
//! stores: deciding *whether* a response is worth caching is the orchestrator's job.
//!
//! Tier failures are reported as [`CacheError`] but never cross the composite boundary;
//! the composite logs them and treats the tier as absent.

mod composite;
mod fingerprint;
mod memory;
mod persistent;

pub use composite::CompositeCache;
pub use fingerprint::{fingerprint, normalize_volatile, Fingerprint};
pub use memory::MemoryTier;
pub use persistent::{FileStore, InMemoryStore, PersistentStore, PersistentTier, StoredRow};

use crate::choices::Choice;
use crate::provider::TokenUsage;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{tier} tier timed out")]
    Timeout { tier: String },

    #[error("Cache backend error: {0}")]
    Backend(String),
}

/// A provider response as stored in the cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedResponse {
    pub content: String,
    pub choices: Vec<Choice>,
    pub token_usage: TokenUsage,
    pub created_at: DateTime<Utc>,
    pub provider: String,
    /// Response quality in `[0, 1]` at the time it was cached
    pub quality: f64,
}

impl CachedResponse {
    pub fn new(content: impl Into<String>, provider: impl Into<String>, quality: f64) -> Self {
        Self {
            content: content.into(),
            choices: Vec::new(),
            token_usage: TokenUsage::default(),
            created_at: Utc::now(),
            provider: provider.into(),
            quality,
        }
    }
}

/// Hit/miss counters for one tier or the whole cache
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub size: usize,
}

impl CacheStats {
    pub fn new(hits: u64, misses: u64, size: usize) -> Self {
        let total = hits + misses;
        Self {
            hits,
            misses,
            hit_rate: if total > 0 { hits as f64 / total as f64 } else { 0.0 },
            size,
        }
    }

    /// Sum of several tiers' counters with the hit rate recomputed
    pub fn merge<'a>(stats: impl IntoIterator<Item = &'a CacheStats>) -> Self {
        let (hits, misses, size) = stats
            .into_iter()
            .fold((0, 0, 0), |(h, m, s), st| (h + st.hits, m + st.misses, s + st.size));
        Self::new(hits, misses, size)
    }
}

impl std::fmt::Display for CacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Cache hits: {}", self.hits)?;
        writeln!(f, "Cache misses: {}", self.misses)?;
        writeln!(f, "Hit rate: {:.1}%", self.hit_rate * 100.0)?;
        writeln!(f, "Entries: {}", self.size)?;
        Ok(())
    }
}

/// One backing store in the composite cache
#[async_trait]
pub trait CacheTier: Send + Sync {
    fn name(&self) -> &str;

    async fn get(&self, key: &str) -> Result<Option<CachedResponse>, CacheError>;

    /// Store a value; `ttl` of `None` uses the tier's default
    async fn set(&self, key: &str, value: CachedResponse, ttl: Option<Duration>) -> Result<(), CacheError>;

    async fn clear(&self) -> Result<(), CacheError>;

    async fn stats(&self) -> CacheStats;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_hit_rate() {
        let stats = CacheStats::new(2, 1, 5);
        assert!((stats.hit_rate - 0.666).abs() < 0.01);
        assert_eq!(CacheStats::new(0, 0, 0).hit_rate, 0.0);
    }

    #[test]
    fn test_merge_recomputes_rate() {
        let merged = CacheStats::merge(&[CacheStats::new(3, 1, 2), CacheStats::new(1, 3, 4)]);
        assert_eq!(merged.hits, 4);
        assert_eq!(merged.misses, 4);
        assert_eq!(merged.size, 6);
        assert_eq!(merged.hit_rate, 0.5);
    }
}
