//! Optimization pipeline
//!
//! Every request runs the same sequence, entered fresh each time:
//!
//! 1. Build the canonical fingerprint and look it up in the composite cache. A hit returns
//!    immediately with zero provider calls.
//! 2. On a miss, compress the prompt (unless disabled globally or for this request).
//! 3. Select a provider under the daily budget and call it.
//! 4. Extract, normalise and limit the choices.
//! 5. Score the response and run the quality gate. Responses that fail the gate are still
//!    returned, just never cached.
//! 6. Record telemetry.
//!
//! Only [`ProviderError`] and [`ConfigError`] reach the caller. Cache failures, compression
//! fallbacks and unparseable choices degrade quietly and show up in telemetry.

pub mod shared;
mod telemetry;
#[cfg(test)]
mod tests;

pub use telemetry::{GenerationRequest, OptimizationTelemetry, OptimizedResponse, ResponseData};

use crate::cache::{
    fingerprint, CacheStats, CacheTier, CachedResponse, CompositeCache, MemoryTier, PersistentStore, PersistentTier,
};
use crate::choices::{is_diverse, Choice, ChoiceProcessor};
use crate::compression::{CompressedPrompt, PromptCompressor};
use crate::config::{ConfigError, OptimizationConfig};
use crate::cost::{CostTracker, PreferredProvider};
use crate::metrics::{MetricsSummary, MetricsTracker};
use crate::provider::{ProviderError, ProviderPricing, ProviderResponse, TextProvider};
use crate::quality::{ResponseQuality, ResponseQualityScorer};
use crate::tokens::TokenEstimator;
use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors that reach the caller of [`OptimizationOrchestrator::generate`]
#[derive(Error, Debug)]
pub enum OptimizerError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Why a response was kept out of the cache
#[derive(Debug, Clone, PartialEq)]
pub enum GateRejection {
    TooShort { chars: usize, min: usize },
    MissingMarker(String),
    WeakChoice(String),
    RepetitiveChoice(String),
    LowQuality { score: f64, min: f64 },
}

impl std::fmt::Display for GateRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GateRejection::TooShort { chars, min } => {
                write!(f, "content has {} characters, minimum is {}", chars, min)
            }
            GateRejection::MissingMarker(marker) => write!(f, "missing required marker {:?}", marker),
            GateRejection::WeakChoice(id) => write!(f, "{} has fewer than two usable options", id),
            GateRejection::RepetitiveChoice(id) => write!(f, "{} has near-duplicate options", id),
            GateRejection::LowQuality { score, min } => {
                write!(f, "quality {:.2} below minimum {:.2}", score, min)
            }
        }
    }
}

/// Choices after processing, with what happened to them
struct ShapedChoices {
    choices: Vec<Choice>,
    limited: bool,
    defaulted: bool,
}

/// The request pipeline and every component it owns
pub struct OptimizationOrchestrator {
    config: Arc<OptimizationConfig>,
    primary: Arc<dyn TextProvider>,
    secondary: Option<Arc<dyn TextProvider>>,
    cache: CompositeCache,
    compressor: PromptCompressor,
    choices: ChoiceProcessor,
    response_scorer: ResponseQualityScorer,
    cost: CostTracker,
    metrics: MetricsTracker,
}

impl OptimizationOrchestrator {
    pub fn builder(config: OptimizationConfig) -> OrchestratorBuilder {
        OrchestratorBuilder::new(config)
    }

    pub fn config(&self) -> &OptimizationConfig {
        &self.config
    }

    pub fn cache(&self) -> &CompositeCache {
        &self.cache
    }

    pub fn cost_tracker(&self) -> &CostTracker {
        &self.cost
    }

    pub fn metrics_summary(&self) -> MetricsSummary {
        self.metrics.summary()
    }

    pub async fn cache_stats(&self) -> CacheStats {
        self.cache.get_stats().await
    }

    pub async fn clear_cache(&self) {
        self.cache.clear().await;
    }

    /// Run one request through the pipeline
    pub async fn generate(&self, request: GenerationRequest) -> Result<OptimizedResponse, OptimizerError> {
        let config = &self.config;
        let mut context = request.context;
        context.max_choices = config.choices.max_choices;

        let original_tokens = self.compressor.estimator().estimate(&request.prompt);
        let compress = config.compression.enabled && request.compress;
        let key = fingerprint(
            &request.prompt,
            &context.prior_choices,
            &context.preferences,
            &context.location,
            context.max_choices,
            compress,
        )
        .key;

        if config.cache.enabled {
            if let Some(cached) = self.cache.get(&key).await {
                info!("Cache hit for {}", short_key(&key));
                return Ok(self.serve_cached(cached, original_tokens));
            }
            debug!("Cache miss for {}", short_key(&key));
        }

        let compression = compress.then(|| {
            self.compressor
                .compress(&request.prompt, config.compression.target_reduction_percent)
        });
        let sent_prompt = compression
            .as_ref()
            .map_or(request.prompt.as_str(), |c| c.compressed.as_str());

        let provider = self
            .cost
            .select(config.cost.preferred_provider, &self.primary, self.secondary.as_ref())?;
        debug!("Sending request to {}", provider.name());

        let call = provider.generate(sent_prompt, &context);
        let result = match request.timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .unwrap_or_else(|_| Err(ProviderError::Timeout(limit.as_millis() as u64))),
            None => call.await,
        };
        let response = result.map_err(|e| {
            warn!("Provider {} failed: {}", provider.name(), e);
            e
        })?;

        let pricing = provider.pricing();
        let cost_spent = pricing.cost(&response.token_usage);
        if config.cost.enabled {
            self.cost.record(provider.name(), cost_spent);
        }

        let shaped = self.shape_choices(&response, &context.location);
        let quality = self.response_scorer.score(&response.content, &shaped.choices);

        let cache_write_skipped = match self.quality_gate(&response.content, &shaped.choices, &quality) {
            Ok(()) => {
                if config.cache.enabled {
                    let cached = CachedResponse {
                        content: response.content.clone(),
                        choices: shaped.choices.clone(),
                        token_usage: response.token_usage,
                        created_at: Utc::now(),
                        provider: provider.name().to_string(),
                        quality: quality.score,
                    };
                    let written = self.cache.set(&key, cached, request.cache_ttl).await;
                    if written == 0 {
                        warn!("No cache tier accepted the response for {}", short_key(&key));
                    }
                }
                false
            }
            Err(rejection) => {
                info!("Response not cached: {}", rejection);
                true
            }
        };

        let telemetry = self.miss_telemetry(
            compression.as_ref(),
            original_tokens,
            sent_prompt,
            &pricing,
            provider.name(),
            &shaped,
            cache_write_skipped,
        );
        self.metrics.record(&telemetry.to_record(cost_spent));

        Ok(OptimizedResponse {
            success: true,
            data: ResponseData {
                content: response.content,
                choices: shaped.choices,
            },
            token_usage: response.token_usage,
            quality: quality.score,
            optimization: telemetry,
        })
    }

    fn serve_cached(&self, cached: CachedResponse, original_tokens: usize) -> OptimizedResponse {
        let pricing = self.pricing_for(&cached.provider);
        let telemetry = OptimizationTelemetry {
            cache_hit: true,
            tokens_saved: cached.token_usage.total as i64,
            cost_saved: pricing.cost(&cached.token_usage),
            original_tokens,
            provider: cached.provider.clone(),
            ..Default::default()
        };
        self.metrics.record(&telemetry.to_record(0.0));

        OptimizedResponse {
            success: true,
            data: ResponseData {
                content: cached.content,
                choices: cached.choices,
            },
            token_usage: cached.token_usage,
            quality: cached.quality,
            optimization: telemetry,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn miss_telemetry(
        &self,
        compression: Option<&CompressedPrompt>,
        original_tokens: usize,
        sent_prompt: &str,
        pricing: &ProviderPricing,
        provider: &str,
        shaped: &ShapedChoices,
        cache_write_skipped: bool,
    ) -> OptimizationTelemetry {
        let (tokens_saved, compression_ratio, compression_fallback) =
            compression.map_or((0, 0.0, false), |c| (c.tokens_saved, c.compression_ratio, c.is_fallback()));

        OptimizationTelemetry {
            cache_hit: false,
            tokens_saved,
            cost_saved: pricing.input_cost(tokens_saved.max(0) as u64),
            compression_ratio,
            choices_limited: shaped.limited,
            original_tokens,
            final_tokens: self.compressor.estimator().estimate(sent_prompt),
            provider: provider.to_string(),
            compression_fallback,
            choices_defaulted: shaped.defaulted,
            cache_write_skipped,
        }
    }

    fn shape_choices(&self, response: &ProviderResponse, location: &str) -> ShapedChoices {
        let settings = &self.config.choices;
        if !settings.enabled {
            return ShapedChoices {
                choices: self.choices.extract_choices(&response.content, &response.raw_choices),
                limited: false,
                defaulted: false,
            };
        }

        let processed = self.choices.process(&response.content, &response.raw_choices, location);
        if !settings.enforce_limit {
            return ShapedChoices {
                choices: processed.choices,
                limited: false,
                defaulted: processed.defaulted,
            };
        }

        let limited = self.choices.limit_choices(processed.choices, settings.max_choices);
        ShapedChoices {
            limited: !limited.removed.is_empty(),
            choices: limited.choices,
            defaulted: processed.defaulted,
        }
    }

    /// Checks a response must pass before it may be cached
    fn quality_gate(&self, content: &str, choices: &[Choice], quality: &ResponseQuality) -> Result<(), GateRejection> {
        let settings = &self.config.quality;

        let chars = content.chars().count();
        if chars < settings.min_content_length {
            return Err(GateRejection::TooShort {
                chars,
                min: settings.min_content_length,
            });
        }

        if let Some(marker) = settings
            .required_markers
            .iter()
            .find(|m| !content.contains(m.as_str()))
        {
            return Err(GateRejection::MissingMarker(marker.clone()));
        }

        let weak = choices.iter().find(|c| {
            c.options
                .iter()
                .filter(|o| o.text.trim().chars().count() >= settings.min_option_chars)
                .count()
                < 2
        });
        if let Some(choice) = weak {
            return Err(GateRejection::WeakChoice(choice.id.clone()));
        }

        if let Some(choice) = choices.iter().find(|c| !is_diverse(&c.options)) {
            return Err(GateRejection::RepetitiveChoice(choice.id.clone()));
        }

        if quality.score < settings.min_response_quality {
            return Err(GateRejection::LowQuality {
                score: quality.score,
                min: settings.min_response_quality,
            });
        }

        Ok(())
    }

    /// Pricing of the named provider, for valuing cache hits
    fn pricing_for(&self, name: &str) -> ProviderPricing {
        std::iter::once(&self.primary)
            .chain(self.secondary.as_ref())
            .find(|p| p.name() == name)
            .map(|p| p.pricing())
            .unwrap_or_default()
    }
}

fn short_key(key: &str) -> &str {
    key.get(..12).unwrap_or(key)
}

/// Assembles an orchestrator from config and injected collaborators
pub struct OrchestratorBuilder {
    config: OptimizationConfig,
    provider: Option<Arc<dyn TextProvider>>,
    secondary: Option<Arc<dyn TextProvider>>,
    persistent_store: Option<Arc<dyn PersistentStore>>,
    cache: Option<CompositeCache>,
    estimator: TokenEstimator,
}

impl OrchestratorBuilder {
    pub fn new(config: OptimizationConfig) -> Self {
        Self {
            config,
            provider: None,
            secondary: None,
            persistent_store: None,
            cache: None,
            estimator: TokenEstimator::default(),
        }
    }

    pub fn provider(mut self, provider: Arc<dyn TextProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn secondary_provider(mut self, provider: Arc<dyn TextProvider>) -> Self {
        self.secondary = Some(provider);
        self
    }

    /// Back the persistent tier with this store
    pub fn persistent_store(mut self, store: Arc<dyn PersistentStore>) -> Self {
        self.persistent_store = Some(store);
        self
    }

    /// Use a ready-made cache instead of tiers derived from the config
    pub fn cache(mut self, cache: CompositeCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn estimator(mut self, estimator: TokenEstimator) -> Self {
        self.estimator = estimator;
        self
    }

    pub fn build(self) -> Result<OptimizationOrchestrator, ConfigError> {
        let config = self.config;
        config.validate()?;

        let primary = self
            .provider
            .ok_or_else(|| ConfigError::MissingProvider("providerA".to_string()))?;
        if config.cost.preferred_provider == PreferredProvider::ProviderB && self.secondary.is_none() {
            return Err(ConfigError::MissingProvider("providerB".to_string()));
        }

        let cache = match self.cache {
            Some(cache) => cache,
            None => {
                let mut tiers: Vec<Arc<dyn CacheTier>> = Vec::new();
                if config.cache.max_memory_size > 0 {
                    tiers.push(Arc::new(MemoryTier::new(config.cache.max_memory_size, config.memory_ttl())));
                }
                if let Some(store) = self.persistent_store {
                    tiers.push(Arc::new(PersistentTier::new(store, config.cache.db_ttl_hours)));
                }
                CompositeCache::new(tiers, config.tier_timeout())
            }
        };
        if config.cache.enabled && cache.is_empty() {
            return Err(ConfigError::NoCacheBackend);
        }

        let compressor = PromptCompressor::new(
            self.estimator,
            config.compression.preserve_quality,
            config.compression.min_quality_score,
        );
        let choices = ChoiceProcessor::new(config.choice_rules());
        let response_scorer = ResponseQualityScorer::new(
            config.quality.min_content_length,
            config.quality.required_markers.clone(),
            config.quality.min_option_chars,
        );
        let cost = CostTracker::new(config.cost.max_daily_cost, config.cost.enabled);

        info!(
            "Optimizer ready: {} cache tier(s), provider {}, preferred {}",
            cache.tiers().len(),
            primary.name(),
            config.cost.preferred_provider
        );

        Ok(OptimizationOrchestrator {
            config: Arc::new(config),
            primary,
            secondary: self.secondary,
            cache,
            compressor,
            choices,
            response_scorer,
            cost,
            metrics: MetricsTracker::new(),
        })
    }
}
