//! Text-generation provider abstraction
//!
//! The optimizer consumes a provider purely as a capability: one prompt in, content plus
//! raw choices plus token usage out. [`HttpProvider`] talks to any OpenAI-compatible chat
//! completions endpoint; tests substitute scripted implementations of [`TextProvider`].

mod http;

pub use http::HttpProvider;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Rate limited: retry after {retry_after_secs} seconds")]
    RateLimited { retry_after_secs: u64 },

    #[error("Quota exceeded: {0}")]
    Quota(String),

    #[error("Provider call timed out after {0} ms")]
    Timeout(u64),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Token counts reported by the provider
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt: u32,
    pub completion: u32,
    pub total: u32,
}

impl TokenUsage {
    pub fn new(prompt: u32, completion: u32) -> Self {
        Self {
            prompt,
            completion,
            total: prompt.saturating_add(completion),
        }
    }
}

/// USD price per 1k tokens
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProviderPricing {
    pub input_per_1k: f64,
    pub output_per_1k: f64,
}

impl ProviderPricing {
    pub fn cost(&self, usage: &TokenUsage) -> f64 {
        (usage.prompt as f64 / 1000.0) * self.input_per_1k
            + (usage.completion as f64 / 1000.0) * self.output_per_1k
    }

    /// Input-side cost of `tokens` prompt tokens
    pub fn input_cost(&self, tokens: u64) -> f64 {
        (tokens as f64 / 1000.0) * self.input_per_1k
    }
}

impl Default for ProviderPricing {
    fn default() -> Self {
        Self {
            input_per_1k: 0.0005,
            output_per_1k: 0.0015,
        }
    }
}

/// Caller's semantic preferences for the generated narrative
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    pub genre: String,
    pub style: String,
    pub mood: String,
}

/// A choice the reader already made earlier in the story
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorChoice {
    pub ordinal: usize,
    pub text: String,
}

/// Everything a provider may need besides the prompt
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationContext {
    pub location: String,
    pub preferences: Preferences,
    pub prior_choices: Vec<PriorChoice>,
    pub max_choices: usize,
}

/// What a provider returns for one prompt
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderResponse {
    pub content: String,
    /// Provider-specific choice payload: structured JSON, a string, or null
    #[serde(default)]
    pub raw_choices: Value,
    pub token_usage: TokenUsage,
}

/// A text-generation backend
#[async_trait]
pub trait TextProvider: Send + Sync {
    fn name(&self) -> &str;

    fn pricing(&self) -> ProviderPricing {
        ProviderPricing::default()
    }

    async fn generate(&self, prompt: &str, context: &GenerationContext) -> Result<ProviderResponse, ProviderError>;
}

/// Connection settings for an HTTP provider
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Name reported in telemetry
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub pricing: ProviderPricing,
}

impl ProviderConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            api_key: String::new(),
            base_url: "https://api.openai.com/v1/chat/completions".to_string(),
            model: "gpt-4o-mini".to_string(),
            max_tokens: Some(2048),
            temperature: Some(0.8),
            pricing: ProviderPricing::default(),
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self::new("providerA")
    }
}
