//! Composite cache over ordered tiers

use super::{CacheStats, CacheTier, CachedResponse};
use futures_util::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Tiers ordered fastest first
///
/// Reads go tier by tier and stop at the first hit. Writes go to every tier at once. Every
/// tier operation is bounded by the tier timeout; failures and timeouts are logged and
/// never returned.
pub struct CompositeCache {
    tiers: Vec<Arc<dyn CacheTier>>,
    tier_timeout: Duration,
}

impl CompositeCache {
    pub fn new(tiers: Vec<Arc<dyn CacheTier>>, tier_timeout: Duration) -> Self {
        Self { tiers, tier_timeout }
    }

    pub fn tiers(&self) -> &[Arc<dyn CacheTier>] {
        &self.tiers
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }

    pub async fn get(&self, key: &str) -> Option<CachedResponse> {
        for (index, tier) in self.tiers.iter().enumerate() {
            match tokio::time::timeout(self.tier_timeout, tier.get(key)).await {
                Ok(Ok(Some(value))) => {
                    debug!("Cache hit in {} tier", tier.name());
                    self.propagate_to_faster_tiers(index, key, &value).await;
                    return Some(value);
                }
                Ok(Ok(None)) => {}
                Ok(Err(e)) => warn!("Cache read from {} tier failed: {}", tier.name(), e),
                Err(_) => warn!(
                    "Cache read from {} tier timed out after {:?}",
                    tier.name(),
                    self.tier_timeout
                ),
            }
        }
        None
    }

    /// Copy a value found in tier `hit_index` into every tier before it
    pub async fn propagate_to_faster_tiers(&self, hit_index: usize, key: &str, value: &CachedResponse) {
        for tier in &self.tiers[..hit_index] {
            match tokio::time::timeout(self.tier_timeout, tier.set(key, value.clone(), None)).await {
                Ok(Ok(())) => debug!("Warmed {} tier", tier.name()),
                Ok(Err(e)) => warn!("Cache warming of {} tier failed: {}", tier.name(), e),
                Err(_) => warn!("Cache warming of {} tier timed out", tier.name()),
            }
        }
    }

    /// Write to all tiers concurrently; returns how many tiers accepted the write
    pub async fn set(&self, key: &str, value: CachedResponse, ttl: Option<Duration>) -> usize {
        let writes = self.tiers.iter().map(|tier| {
            let value = value.clone();
            async move {
                match tokio::time::timeout(self.tier_timeout, tier.set(key, value, ttl)).await {
                    Ok(Ok(())) => true,
                    Ok(Err(e)) => {
                        warn!("Cache write to {} tier failed: {}", tier.name(), e);
                        false
                    }
                    Err(_) => {
                        warn!(
                            "Cache write to {} tier timed out after {:?}",
                            tier.name(),
                            self.tier_timeout
                        );
                        false
                    }
                }
            }
        });

        join_all(writes).await.into_iter().filter(|ok| *ok).count()
    }

    pub async fn clear(&self) {
        for tier in &self.tiers {
            if let Err(e) = tier.clear().await {
                warn!("Clearing {} tier failed: {}", tier.name(), e);
            }
        }
    }

    pub async fn tier_stats(&self) -> Vec<(String, CacheStats)> {
        let mut stats = Vec::with_capacity(self.tiers.len());
        for tier in &self.tiers {
            stats.push((tier.name().to_string(), tier.stats().await));
        }
        stats
    }

    /// Aggregate over all tiers
    pub async fn get_stats(&self) -> CacheStats {
        let per_tier = self.tier_stats().await;
        CacheStats::merge(per_tier.iter().map(|(_, s)| s))
    }
}
