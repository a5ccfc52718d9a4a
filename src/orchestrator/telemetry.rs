//! Request and response types of the optimization pipeline

use crate::choices::Choice;
use crate::metrics::RequestRecord;
use crate::provider::{GenerationContext, TokenUsage};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One narrative generation request
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub prompt: String,
    pub context: GenerationContext,
    /// Allow prompt compression for this call; off for fidelity-critical bodies
    pub compress: bool,
    /// Caller timeout for the provider call only
    pub timeout: Option<Duration>,
    /// Overrides each tier's default TTL for the cache write
    pub cache_ttl: Option<Duration>,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>, context: GenerationContext) -> Self {
        Self {
            prompt: prompt.into(),
            context,
            compress: true,
            timeout: None,
            cache_ttl: None,
        }
    }

    pub fn without_compression(mut self) -> Self {
        self.compress = false;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }
}

/// Narrative payload handed back to the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseData {
    pub content: String,
    pub choices: Vec<Choice>,
}

/// What the optimizer did for one request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizationTelemetry {
    pub cache_hit: bool,
    pub tokens_saved: i64,
    pub cost_saved: f64,
    pub compression_ratio: f64,
    pub choices_limited: bool,
    pub original_tokens: usize,
    pub final_tokens: usize,
    pub provider: String,
    pub compression_fallback: bool,
    pub choices_defaulted: bool,
    /// Response failed the quality gate and was not cached
    pub cache_write_skipped: bool,
}

impl OptimizationTelemetry {
    pub(crate) fn to_record(&self, cost_spent: f64) -> RequestRecord {
        RequestRecord {
            cache_hit: self.cache_hit,
            tokens_saved: self.tokens_saved,
            cost_saved: self.cost_saved,
            cost_spent,
            choices_limited: self.choices_limited,
            compression_fallback: self.compression_fallback,
            choices_defaulted: self.choices_defaulted,
            cache_write_skipped: self.cache_write_skipped,
        }
    }
}

/// Pipeline output: the payload plus telemetry, always together
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizedResponse {
    pub success: bool,
    pub data: ResponseData,
    pub token_usage: TokenUsage,
    /// Response quality in `[0, 1]`
    pub quality: f64,
    pub optimization: OptimizationTelemetry,
}
