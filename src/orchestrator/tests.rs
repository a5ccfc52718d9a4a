use super::*;
use crate::cache::{CacheError, InMemoryStore};
use crate::config::ConfigBuilder;
use crate::provider::{GenerationContext, Preferences, PriorChoice, TokenUsage};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

const SCENE: &str = "Lanterns sway above the night market in Busan. A fishmonger calls out prices \
                     while steam rises from the stalls. Somewhere behind you, a street musician starts \
                     a slow song.";

fn three_options() -> Value {
    json!([
        {"question": "Where do you go?", "options": [
            {"text": "Follow the music toward the harbour", "description": "The song grows louder near the water."},
            {"text": "Haggle with the fishmonger", "description": "He seems ready to drop his price."},
            {"text": "Climb the stairs to Gamcheon village", "description": "The painted houses glow at night."}
        ]}
    ])
}

struct ScriptedProvider {
    name: &'static str,
    price: f64,
    content: String,
    raw_choices: Value,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    fn new(content: &str, raw_choices: Value) -> Self {
        Self {
            name: "providerA",
            price: 0.001,
            content: content.to_string(),
            raw_choices,
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    fn named(mut self, name: &'static str, price: f64) -> Self {
        self.name = name;
        self.price = price;
        self
    }

    fn slow(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextProvider for ScriptedProvider {
    fn name(&self) -> &str {
        self.name
    }

    fn pricing(&self) -> ProviderPricing {
        ProviderPricing {
            input_per_1k: self.price,
            output_per_1k: self.price,
        }
    }

    async fn generate(&self, _prompt: &str, _context: &GenerationContext) -> Result<ProviderResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(ProviderResponse {
            content: self.content.clone(),
            raw_choices: self.raw_choices.clone(),
            token_usage: TokenUsage::new(200, 150),
        })
    }
}

struct RejectingProvider;

#[async_trait]
impl TextProvider for RejectingProvider {
    fn name(&self) -> &str {
        "providerA"
    }

    async fn generate(&self, _prompt: &str, _context: &GenerationContext) -> Result<ProviderResponse, ProviderError> {
        Err(ProviderError::Auth("invalid api key".into()))
    }
}

/// Memory tier that counts writes
struct SpyTier {
    inner: MemoryTier,
    sets: AtomicUsize,
}

#[async_trait]
impl CacheTier for SpyTier {
    fn name(&self) -> &str {
        "spy"
    }

    async fn get(&self, key: &str) -> Result<Option<CachedResponse>, CacheError> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: CachedResponse, ttl: Option<Duration>) -> Result<(), CacheError> {
        self.sets.fetch_add(1, Ordering::SeqCst);
        self.inner.set(key, value, ttl).await
    }

    async fn clear(&self) -> Result<(), CacheError> {
        self.inner.clear().await
    }

    async fn stats(&self) -> CacheStats {
        self.inner.stats().await
    }
}

struct BrokenTier;

#[async_trait]
impl CacheTier for BrokenTier {
    fn name(&self) -> &str {
        "broken"
    }

    async fn get(&self, _key: &str) -> Result<Option<CachedResponse>, CacheError> {
        Err(CacheError::Backend("database is locked".into()))
    }

    async fn set(&self, _key: &str, _value: CachedResponse, _ttl: Option<Duration>) -> Result<(), CacheError> {
        Err(CacheError::Backend("database is locked".into()))
    }

    async fn clear(&self) -> Result<(), CacheError> {
        Ok(())
    }

    async fn stats(&self) -> CacheStats {
        CacheStats::default()
    }
}

fn context() -> GenerationContext {
    GenerationContext {
        location: "Busan".to_string(),
        preferences: Preferences {
            genre: "mystery".to_string(),
            style: "lyrical".to_string(),
            mood: "calm".to_string(),
        },
        prior_choices: vec![PriorChoice {
            ordinal: 1,
            text: "Take the night train from Seoul".to_string(),
        }],
        max_choices: 0,
    }
}

fn request(prompt: &str) -> GenerationRequest {
    GenerationRequest::new(prompt, context())
}

fn orchestrator(config: OptimizationConfig, provider: Arc<ScriptedProvider>) -> OptimizationOrchestrator {
    OptimizationOrchestrator::builder(config)
        .provider(provider)
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_second_identical_request_is_served_from_cache() {
    let provider = Arc::new(ScriptedProvider::new(SCENE, three_options()));
    let optimizer = orchestrator(OptimizationConfig::default(), provider.clone());

    let first = optimizer.generate(request("Describe the night market.")).await.unwrap();
    assert!(!first.optimization.cache_hit);
    assert!(!first.optimization.cache_write_skipped);

    let second = optimizer.generate(request("Describe the night market.")).await.unwrap();
    assert_eq!(provider.calls(), 1);
    assert!(second.optimization.cache_hit);
    assert_eq!(second.data, first.data);
    assert_eq!(second.optimization.tokens_saved, 350);
    assert!(second.optimization.cost_saved > 0.0);

    let summary = optimizer.metrics_summary();
    assert_eq!(summary.request_count, 2);
    assert_eq!(summary.cache_hits, 1);
}

#[tokio::test]
async fn test_volatile_prompt_text_shares_cache_entry() {
    let provider = Arc::new(ScriptedProvider::new(SCENE, three_options()));
    let optimizer = orchestrator(OptimizationConfig::default(), provider.clone());

    optimizer
        .generate(request("Scene requested at 2024-05-01T10:15:00Z."))
        .await
        .unwrap();
    let again = optimizer
        .generate(request("Scene requested at 2024-05-02T08:00:00Z."))
        .await
        .unwrap();

    assert!(again.optimization.cache_hit);
    assert_eq!(provider.calls(), 1);
}

#[tokio::test]
async fn test_changed_preferences_miss_the_cache() {
    let provider = Arc::new(ScriptedProvider::new(SCENE, three_options()));
    let optimizer = orchestrator(OptimizationConfig::default(), provider.clone());

    optimizer.generate(request("Describe the night market.")).await.unwrap();

    let mut other = request("Describe the night market.");
    other.context.preferences.mood = "tense".to_string();
    let result = optimizer.generate(other).await.unwrap();

    assert!(!result.optimization.cache_hit);
    assert_eq!(provider.calls(), 2);
}

#[tokio::test]
async fn test_persistent_hit_warms_memory_tier() {
    let spy = Arc::new(SpyTier {
        inner: MemoryTier::new(10, Duration::from_secs(60)),
        sets: AtomicUsize::new(0),
    });
    let persistent = Arc::new(PersistentTier::new(Arc::new(InMemoryStore::new()), 24));

    let ctx = context();
    let key = fingerprint("Describe the night market.", &ctx.prior_choices, &ctx.preferences, &ctx.location, 3, true).key;
    let mut stored = CachedResponse::new(SCENE, "providerA", 0.9);
    stored.token_usage = TokenUsage::new(200, 150);
    persistent.set(&key, stored, None).await.unwrap();

    let provider = Arc::new(ScriptedProvider::new("unused", Value::Null));
    let optimizer = OptimizationOrchestrator::builder(OptimizationConfig::default())
        .provider(provider.clone())
        .cache(CompositeCache::new(vec![spy.clone(), persistent], Duration::from_millis(200)))
        .build()
        .unwrap();

    let result = optimizer.generate(request("Describe the night market.")).await.unwrap();

    assert!(result.optimization.cache_hit);
    assert_eq!(result.data.content, SCENE);
    assert_eq!(provider.calls(), 0);
    assert_eq!(spy.sets.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_short_response_is_returned_but_not_cached() {
    let provider = Arc::new(ScriptedProvider::new("Too short.", three_options()));
    let optimizer = orchestrator(OptimizationConfig::default(), provider.clone());

    let first = optimizer.generate(request("Describe the harbour.")).await.unwrap();
    assert_eq!(first.data.content, "Too short.");
    assert!(first.optimization.cache_write_skipped);

    let second = optimizer.generate(request("Describe the harbour.")).await.unwrap();
    assert!(!second.optimization.cache_hit);
    assert_eq!(provider.calls(), 2);
}

#[tokio::test]
async fn test_missing_marker_blocks_caching() {
    let provider = Arc::new(ScriptedProvider::new(SCENE, three_options()));
    let config = ConfigBuilder::new()
        .required_markers(vec!["[SCENE]".to_string()])
        .build()
        .unwrap();
    let optimizer = orchestrator(config, provider.clone());

    let result = optimizer.generate(request("Describe the harbour.")).await.unwrap();
    assert!(result.optimization.cache_write_skipped);
    assert_eq!(optimizer.cache_stats().await.size, 0);
}

#[tokio::test]
async fn test_near_duplicate_options_are_not_cached() {
    let raw = json!([
        {"question": "Where now?", "options": [
            {"text": "Walk to the old market"},
            {"text": "Walk to the old market now"},
            {"text": "Take a taxi to Haeundae beach"}
        ]}
    ]);
    let provider = Arc::new(ScriptedProvider::new(SCENE, raw));
    let optimizer = orchestrator(OptimizationConfig::default(), provider.clone());

    let first = optimizer.generate(request("Describe the station.")).await.unwrap();
    assert_eq!(first.data.choices[0].options.len(), 3);
    assert!(first.optimization.cache_write_skipped);

    let second = optimizer.generate(request("Describe the station.")).await.unwrap();
    assert!(!second.optimization.cache_hit);
    assert_eq!(provider.calls(), 2);
    assert_eq!(optimizer.cache_stats().await.size, 0);
}

#[tokio::test]
async fn test_compressed_response_not_served_to_uncompressed_request() {
    let provider = Arc::new(ScriptedProvider::new(SCENE, three_options()));
    let optimizer = orchestrator(OptimizationConfig::default(), provider.clone());

    optimizer.generate(request("Describe the night market.")).await.unwrap();
    let plain = optimizer
        .generate(request("Describe the night market.").without_compression())
        .await
        .unwrap();

    assert!(!plain.optimization.cache_hit);
    assert_eq!(provider.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_memory_entry_expires_after_ttl() {
    let provider = Arc::new(ScriptedProvider::new(SCENE, three_options()));
    let config = ConfigBuilder::new().memory_ttl_ms(1000).build().unwrap();
    let optimizer = orchestrator(config, provider.clone());

    optimizer.generate(request("Describe the night market.")).await.unwrap();

    tokio::time::advance(Duration::from_millis(500)).await;
    let warm = optimizer.generate(request("Describe the night market.")).await.unwrap();
    assert!(warm.optimization.cache_hit);

    tokio::time::advance(Duration::from_millis(1000)).await;
    let cold = optimizer.generate(request("Describe the night market.")).await.unwrap();
    assert!(!cold.optimization.cache_hit);
    assert_eq!(provider.calls(), 2);
}

#[tokio::test]
async fn test_provider_error_reaches_caller() {
    let optimizer = OptimizationOrchestrator::builder(OptimizationConfig::default())
        .provider(Arc::new(RejectingProvider))
        .build()
        .unwrap();

    let err = optimizer.generate(request("Describe the harbour.")).await.unwrap_err();
    assert!(matches!(err, OptimizerError::Provider(ProviderError::Auth(_))));
}

#[tokio::test(start_paused = true)]
async fn test_caller_timeout_applies_to_provider_call() {
    let provider = Arc::new(ScriptedProvider::new(SCENE, three_options()).slow(Duration::from_secs(10)));
    let optimizer = orchestrator(OptimizationConfig::default(), provider);

    let err = optimizer
        .generate(request("Describe the harbour.").with_timeout(Duration::from_millis(100)))
        .await
        .unwrap_err();
    assert!(matches!(err, OptimizerError::Provider(ProviderError::Timeout(100))));
}

#[tokio::test]
async fn test_cache_outage_is_invisible() {
    let provider = Arc::new(ScriptedProvider::new(SCENE, three_options()));
    let optimizer = OptimizationOrchestrator::builder(OptimizationConfig::default())
        .provider(provider.clone())
        .cache(CompositeCache::new(vec![Arc::new(BrokenTier)], Duration::from_millis(200)))
        .build()
        .unwrap();

    for _ in 0..2 {
        let result = optimizer.generate(request("Describe the harbour.")).await.unwrap();
        assert!(result.success);
        assert!(!result.optimization.cache_hit);
    }
    assert_eq!(provider.calls(), 2);
}

#[tokio::test]
async fn test_two_options_are_padded() {
    let raw = json!([
        {"question": "Which path?", "options": [
            {"text": "Take the ferry to Yeongdo"},
            {"text": "Wait for the fireworks on the beach"}
        ]}
    ]);
    let provider = Arc::new(ScriptedProvider::new(SCENE, raw));
    let optimizer = orchestrator(OptimizationConfig::default(), provider);

    let result = optimizer.generate(request("Describe the pier.")).await.unwrap();
    let options = &result.data.choices[0].options;
    assert_eq!(options.len(), 3);
    assert_eq!(options[2].text, "Consider more carefully");
    assert!(!result.optimization.choices_defaulted);
}

#[tokio::test]
async fn test_unparseable_choices_get_default_set() {
    let provider = Arc::new(ScriptedProvider::new(SCENE, Value::Null));
    let optimizer = orchestrator(OptimizationConfig::default(), provider);

    let result = optimizer.generate(request("Describe the pier.")).await.unwrap();
    assert!(result.optimization.choices_defaulted);
    assert_eq!(result.data.choices.len(), 1);
    assert_eq!(result.data.choices[0].options.len(), 3);
    assert_eq!(result.data.choices[0].location, "Busan");
}

#[tokio::test]
async fn test_choice_count_is_limited() {
    let raw: Vec<Value> = (1..=5)
        .map(|i| {
            json!({"question": format!("Decision {}?", i), "options": [
                {"text": format!("Visit stall number {}", i)},
                {"text": format!("Ask vendor {} about the festival", i)},
                {"text": format!("Buy a lantern for {} thousand won", i)}
            ]})
        })
        .collect();
    let provider = Arc::new(ScriptedProvider::new(SCENE, Value::Array(raw)));
    let optimizer = orchestrator(OptimizationConfig::default(), provider);

    let result = optimizer.generate(request("Describe the stalls.")).await.unwrap();
    assert_eq!(result.data.choices.len(), 3);
    assert!(result.optimization.choices_limited);
}

#[tokio::test]
async fn test_compression_telemetry_on_miss() {
    let prompt = "You are really standing at the very edge of the old harbour, and the evening light is \
                  basically fading over the cranes. Perhaps the sailors are somewhat tired, and it seems \
                  that nobody notices you. The fish market holds a hidden stall. Locals say the stall \
                  keeps a secret recipe from the last owner. In order to reach the stall, you must cross \
                  the wooden pier before the gates close at 9pm. "
        .repeat(6);
    let provider = Arc::new(ScriptedProvider::new(SCENE, three_options()));
    let optimizer = orchestrator(OptimizationConfig::default(), provider);

    let result = optimizer.generate(request(&prompt)).await.unwrap();
    let telemetry = &result.optimization;
    assert!(telemetry.tokens_saved > 0);
    assert!(telemetry.final_tokens < telemetry.original_tokens);
    assert_eq!(
        telemetry.tokens_saved,
        telemetry.original_tokens as i64 - telemetry.final_tokens as i64
    );
    assert!(telemetry.cost_saved > 0.0);
}

#[tokio::test]
async fn test_uncompressed_request_saves_nothing() {
    let provider = Arc::new(ScriptedProvider::new(SCENE, three_options()));
    let optimizer = orchestrator(OptimizationConfig::default(), provider);

    let result = optimizer
        .generate(request("The  final   chapter   body.").without_compression())
        .await
        .unwrap();
    assert_eq!(result.optimization.tokens_saved, 0);
    assert_eq!(result.optimization.original_tokens, result.optimization.final_tokens);
}

#[tokio::test]
async fn test_auto_selects_cheapest_provider() {
    let expensive = Arc::new(ScriptedProvider::new(SCENE, three_options()).named("providerA", 0.03));
    let cheap = Arc::new(ScriptedProvider::new(SCENE, three_options()).named("providerB", 0.0005));
    let config = ConfigBuilder::new()
        .preferred_provider(PreferredProvider::Auto)
        .build()
        .unwrap();
    let optimizer = OptimizationOrchestrator::builder(config)
        .provider(expensive.clone())
        .secondary_provider(cheap.clone())
        .build()
        .unwrap();

    let result = optimizer.generate(request("Describe the harbour.")).await.unwrap();
    assert_eq!(result.optimization.provider, "providerB");
    assert_eq!(expensive.calls(), 0);
    assert!(optimizer.cost_tracker().spent_today("providerB") > 0.0);
}

#[tokio::test]
async fn test_exhausted_budget_is_quota_error() {
    let provider = Arc::new(ScriptedProvider::new(SCENE, three_options()));
    let optimizer = orchestrator(ConfigBuilder::new().max_daily_cost(0.01).build().unwrap(), provider);
    optimizer.cost_tracker().record("providerA", 0.01);

    let err = optimizer.generate(request("Describe the harbour.")).await.unwrap_err();
    assert!(matches!(err, OptimizerError::Provider(ProviderError::Quota(_))));
}

#[test]
fn test_builder_rejects_incomplete_setups() {
    let provider = || Arc::new(ScriptedProvider::new(SCENE, Value::Null));

    assert!(matches!(
        OptimizationOrchestrator::builder(OptimizationConfig::default()).build(),
        Err(ConfigError::MissingProvider(_))
    ));

    let no_backend = ConfigBuilder::new().max_memory_size(0).build().unwrap();
    assert!(matches!(
        OptimizationOrchestrator::builder(no_backend).provider(provider()).build(),
        Err(ConfigError::NoCacheBackend)
    ));

    let pinned_b = ConfigBuilder::new()
        .preferred_provider(PreferredProvider::ProviderB)
        .build()
        .unwrap();
    assert!(matches!(
        OptimizationOrchestrator::builder(pinned_b).provider(provider()).build(),
        Err(ConfigError::MissingProvider(_))
    ));

    let no_cache = ConfigBuilder::new()
        .cache_enabled(false)
        .max_memory_size(0)
        .build()
        .unwrap();
    assert!(OptimizationOrchestrator::builder(no_cache).provider(provider()).build().is_ok());
}

#[test]
fn test_shared_instance_is_explicit_and_resettable() {
    assert!(shared::current().is_none());

    let optimizer = orchestrator(
        OptimizationConfig::default(),
        Arc::new(ScriptedProvider::new(SCENE, Value::Null)),
    );
    assert!(shared::install(optimizer).is_none());
    assert!(shared::current().is_some());

    assert!(shared::reset().is_some());
    assert!(shared::current().is_none());
}
