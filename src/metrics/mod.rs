//! Aggregate optimization metrics across requests

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};

/// Counters accumulated over every request an orchestrator served
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OptimizationMetrics {
    /// Total generate calls
    pub request_count: u64,
    /// Calls answered from the cache
    pub cache_hits: u64,
    /// Calls that reached a provider
    pub provider_calls: u64,
    /// Tokens saved by compression and cache hits
    pub tokens_saved: i64,
    /// Estimated USD saved
    pub cost_saved: f64,
    /// Provider spend (USD)
    pub cost_spent: f64,
    /// Responses whose choice count was truncated
    pub choices_limited: u64,
    /// Compressions that fell back to the conservative path
    pub compression_fallbacks: u64,
    /// Responses that got the default choice set
    pub choices_defaulted: u64,
    /// Responses that failed the quality gate and were not cached
    pub cache_writes_skipped: u64,
}

/// What one request contributed to the aggregate
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestRecord {
    pub cache_hit: bool,
    pub tokens_saved: i64,
    pub cost_saved: f64,
    pub cost_spent: f64,
    pub choices_limited: bool,
    pub compression_fallback: bool,
    pub choices_defaulted: bool,
    pub cache_write_skipped: bool,
}

impl OptimizationMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, record: &RequestRecord) {
        self.request_count += 1;
        if record.cache_hit {
            self.cache_hits += 1;
        } else {
            self.provider_calls += 1;
        }

        self.tokens_saved += record.tokens_saved;
        self.cost_saved += record.cost_saved;
        self.cost_spent += record.cost_spent;

        self.choices_limited += record.choices_limited as u64;
        self.compression_fallbacks += record.compression_fallback as u64;
        self.choices_defaulted += record.choices_defaulted as u64;
        self.cache_writes_skipped += record.cache_write_skipped as u64;
    }

    pub fn hit_rate(&self) -> f64 {
        if self.request_count == 0 {
            return 0.0;
        }
        self.cache_hits as f64 / self.request_count as f64
    }
}

/// Thread-safe metrics tracker
#[derive(Clone, Default)]
pub struct MetricsTracker {
    inner: Arc<Mutex<OptimizationMetrics>>,
}

impl MetricsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, record: &RequestRecord) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record(record);
    }

    pub fn get_metrics(&self) -> OptimizationMetrics {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn reset(&self) {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner) = OptimizationMetrics::new();
    }

    pub fn summary(&self) -> MetricsSummary {
        let metrics = self.get_metrics();
        MetricsSummary {
            request_count: metrics.request_count,
            cache_hits: metrics.cache_hits,
            hit_rate: metrics.hit_rate(),
            provider_calls: metrics.provider_calls,
            tokens_saved: metrics.tokens_saved,
            cost_saved: metrics.cost_saved,
            cost_spent: metrics.cost_spent,
            choices_limited: metrics.choices_limited,
            compression_fallbacks: metrics.compression_fallbacks,
            choices_defaulted: metrics.choices_defaulted,
            cache_writes_skipped: metrics.cache_writes_skipped,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSummary {
    pub request_count: u64,
    pub cache_hits: u64,
    pub hit_rate: f64,
    pub provider_calls: u64,
    pub tokens_saved: i64,
    pub cost_saved: f64,
    pub cost_spent: f64,
    pub choices_limited: u64,
    pub compression_fallbacks: u64,
    pub choices_defaulted: u64,
    pub cache_writes_skipped: u64,
}

impl std::fmt::Display for MetricsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Optimization Summary ===")?;
        writeln!(f, "Requests: {}", self.request_count)?;
        writeln!(f, "Cache hits: {} ({:.1}%)", self.cache_hits, self.hit_rate * 100.0)?;
        writeln!(f, "Provider calls: {}", self.provider_calls)?;
        writeln!(f, "Tokens saved: {}", self.tokens_saved)?;
        writeln!(f, "Cost saved: ${:.4}", self.cost_saved)?;
        writeln!(f, "Cost spent: ${:.4}", self.cost_spent)?;
        writeln!(f, "Choice sets limited: {}", self.choices_limited)?;
        writeln!(f, "Compression fallbacks: {}", self.compression_fallbacks)?;
        writeln!(f, "Default choice sets: {}", self.choices_defaulted)?;
        writeln!(f, "Cache writes skipped: {}", self.cache_writes_skipped)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_hits_and_misses() {
        let tracker = MetricsTracker::new();
        tracker.record(&RequestRecord {
            cache_hit: false,
            tokens_saved: 40,
            cost_spent: 0.01,
            compression_fallback: true,
            ..Default::default()
        });
        tracker.record(&RequestRecord {
            cache_hit: true,
            tokens_saved: 300,
            cost_saved: 0.02,
            ..Default::default()
        });

        let metrics = tracker.get_metrics();
        assert_eq!(metrics.request_count, 2);
        assert_eq!(metrics.cache_hits, 1);
        assert_eq!(metrics.provider_calls, 1);
        assert_eq!(metrics.tokens_saved, 340);
        assert_eq!(metrics.compression_fallbacks, 1);
        assert_eq!(metrics.hit_rate(), 0.5);
    }

    #[test]
    fn test_reset() {
        let tracker = MetricsTracker::new();
        tracker.record(&RequestRecord::default());
        tracker.reset();
        assert_eq!(tracker.get_metrics().request_count, 0);
    }

    #[test]
    fn test_summary_display() {
        let tracker = MetricsTracker::new();
        tracker.record(&RequestRecord {
            cache_hit: true,
            cost_saved: 0.5,
            ..Default::default()
        });
        let text = tracker.summary().to_string();
        assert!(text.contains("Cache hits: 1 (100.0%)"));
        assert!(text.contains("Cost saved: $0.5000"));
    }
}
