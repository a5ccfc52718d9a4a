//! narrative_optimizer - Cut the cost of branching-narrative generation
//!
//! This library sits between an application and a remote text-generation provider and
//! reduces cost and latency for repeated "write a scene with a few choices" requests.
//!
//! ## Key Features
//!
//! - **Multi-tier Cache**: memory and persistent tiers behind a composite with hit propagation
//! - **Prompt Compression**: staged, token-budget-aware, with a quality-preserving fallback
//! - **Choice Processing**: ordered matchers, option scoring, padding and limiting
//! - **Cost Control**: per-provider daily budgets and cheapest-provider selection
//! - **Telemetry**: every response reports what the optimizer did and what it saved

pub mod cache;
pub mod choices;
pub mod compression;
pub mod config;
pub mod cost;
pub mod metrics;
pub mod orchestrator;
pub mod provider;
pub mod quality;
pub mod text;
pub mod tokens;

pub use cache::{CacheStats, CachedResponse, CompositeCache};
pub use choices::{Choice, ChoiceOption, ChoiceProcessor, LimitedChoices};
pub use compression::{CompressedPrompt, PromptCompressor};
pub use config::{ConfigBuilder, ConfigError, OptimizationConfig};
pub use metrics::MetricsTracker;
pub use orchestrator::{
    GenerationRequest, OptimizationOrchestrator, OptimizationTelemetry, OptimizedResponse, OptimizerError,
};
pub use provider::{GenerationContext, ProviderError, TextProvider, TokenUsage};
pub use quality::{QualityScore, QualityValidator};
pub use tokens::TokenEstimator;
