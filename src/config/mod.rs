//! Configuration for the narrative optimizer
//!
//! Supports configuration via:
//! 1. Config file (~/.config/narrative-optimizer/config.toml)
//! 2. Environment variables (NARRATIVE_API_KEY, NARRATIVE_MAX_DAILY_COST, etc.)
//! 3. CLI arguments (override file/env settings)
//!
//! An [`OptimizationConfig`] is immutable once an orchestrator is built from it; to
//! reconfigure, build a new orchestrator.

use crate::choices::{ChoiceRules, PaddingRule};
use crate::cost::PreferredProvider;
use crate::provider::ProviderConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Caching is enabled but no cache backend is available")]
    NoCacheBackend,

    #[error("Missing provider: {0}")]
    MissingProvider(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizationConfig {
    pub cache: CacheSettings,
    pub compression: CompressionSettings,
    pub choices: ChoiceSettings,
    pub cost: CostSettings,
    pub quality: QualitySettings,
    pub providers: ProviderSettings,
}

/// Cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub enabled: bool,

    /// Memory tier TTL in milliseconds
    pub memory_ttl_ms: u64,

    /// Persistent tier TTL in hours
    pub db_ttl_hours: u64,

    /// Memory tier capacity; 0 disables the memory tier
    pub max_memory_size: usize,

    /// Per-tier read and write timeout, independent of the provider timeout
    pub tier_timeout_ms: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            memory_ttl_ms: 30 * 60 * 1000,
            db_ttl_hours: 24,
            max_memory_size: 500,
            tier_timeout_ms: 250,
        }
    }
}

/// Prompt compression settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionSettings {
    pub enabled: bool,

    /// Requested token reduction, in percent (0-100 exclusive)
    pub target_reduction_percent: f64,

    /// Apply the quality gate and fallback
    pub preserve_quality: bool,

    pub min_quality_score: f64,
}

impl Default for CompressionSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            target_reduction_percent: 30.0,
            preserve_quality: true,
            min_quality_score: 0.7,
        }
    }
}

/// Choice processing settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChoiceSettings {
    pub enabled: bool,

    /// Maximum choices per response; 2 or 3
    pub max_choices: usize,

    pub enforce_limit: bool,

    pub options_per_choice: usize,

    pub padding: PaddingRule,
}

impl Default for ChoiceSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_choices: 3,
            enforce_limit: true,
            options_per_choice: 3,
            padding: PaddingRule::default(),
        }
    }
}

/// Cost tracking settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CostSettings {
    pub enabled: bool,

    /// Per-provider daily budget in USD
    pub max_daily_cost: f64,

    pub preferred_provider: PreferredProvider,
}

impl Default for CostSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_daily_cost: 10.0,
            preferred_provider: PreferredProvider::ProviderA,
        }
    }
}

/// Response quality gate settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualitySettings {
    /// Responses shorter than this (in characters) are never cached
    pub min_content_length: usize,

    /// Substrings every cacheable response must contain
    pub required_markers: Vec<String>,

    pub min_response_quality: f64,

    /// Options shorter than this (in characters) count as trivial
    pub min_option_chars: usize,
}

impl Default for QualitySettings {
    fn default() -> Self {
        Self {
            min_content_length: 100,
            required_markers: Vec::new(),
            min_response_quality: 0.6,
            min_option_chars: 2,
        }
    }
}

/// HTTP provider endpoints used by the CLI
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    pub provider_a: ProviderConfig,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_b: Option<ProviderConfig>,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            provider_a: ProviderConfig::new("providerA"),
            provider_b: None,
        }
    }
}

impl OptimizationConfig {
    /// Get default config file path
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("narrative-optimizer")
            .join("config.toml")
    }

    /// Load config from default location
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(Self::default_path())
    }

    /// Load config from specific path; a missing file yields defaults
    pub fn load_from(path: PathBuf) -> Result<Self, ConfigError> {
        let config = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            toml::from_str(&content)?
        } else {
            Self::default()
        };

        let config = config.with_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable source
    pub fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(key) = lookup("NARRATIVE_API_KEY") {
            self.providers.provider_a.api_key = key;
        }
        if let Some(url) = lookup("NARRATIVE_BASE_URL") {
            self.providers.provider_a.base_url = url;
        }
        if let Some(model) = lookup("NARRATIVE_MODEL") {
            self.providers.provider_a.model = model;
        }

        if let Some(key) = lookup("NARRATIVE_SECONDARY_API_KEY") {
            self.providers
                .provider_b
                .get_or_insert_with(|| ProviderConfig::new("providerB"))
                .api_key = key;
        }

        if let Some(cost) = lookup("NARRATIVE_MAX_DAILY_COST").and_then(|v| v.parse::<f64>().ok()) {
            self.cost.max_daily_cost = cost;
        }

        self
    }

    /// Save config to default location
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(Self::default_path())
    }

    /// Save config to specific path
    pub fn save_to(&self, path: PathBuf) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&path, content)?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(2..=3).contains(&self.choices.max_choices) {
            return Err(ConfigError::Invalid(format!(
                "choices.max_choices must be 2 or 3, got {}",
                self.choices.max_choices
            )));
        }

        if self.choices.options_per_choice < 2 {
            return Err(ConfigError::Invalid(format!(
                "choices.options_per_choice must be at least 2, got {}",
                self.choices.options_per_choice
            )));
        }

        let target = self.compression.target_reduction_percent;
        if !(target > 0.0 && target < 100.0) {
            return Err(ConfigError::Invalid(format!(
                "compression.target_reduction_percent must be between 0 and 100, got {}",
                target
            )));
        }

        for (name, value) in [
            ("compression.min_quality_score", self.compression.min_quality_score),
            ("quality.min_response_quality", self.quality.min_response_quality),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Invalid(format!(
                    "{} must be within [0, 1], got {}",
                    name, value
                )));
            }
        }

        if self.cost.enabled && self.cost.max_daily_cost <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "cost.max_daily_cost must be positive, got {}",
                self.cost.max_daily_cost
            )));
        }

        Ok(())
    }

    /// Rules handed to the choice processor
    pub fn choice_rules(&self) -> ChoiceRules {
        ChoiceRules {
            options_per_choice: self.choices.options_per_choice,
            min_option_chars: self.quality.min_option_chars,
            padding: self.choices.padding.clone(),
        }
    }

    pub fn memory_ttl(&self) -> Duration {
        Duration::from_millis(self.cache.memory_ttl_ms)
    }

    pub fn tier_timeout(&self) -> Duration {
        Duration::from_millis(self.cache.tier_timeout_ms)
    }

    /// Generate example config content
    pub fn example() -> String {
        let example = OptimizationConfig::default();
        toml::to_string_pretty(&example).unwrap_or_default()
    }
}

/// Builder for creating OptimizationConfig programmatically
pub struct ConfigBuilder {
    config: OptimizationConfig,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: OptimizationConfig::default(),
        }
    }

    pub fn cache_enabled(mut self, enabled: bool) -> Self {
        self.config.cache.enabled = enabled;
        self
    }

    pub fn memory_ttl_ms(mut self, ttl_ms: u64) -> Self {
        self.config.cache.memory_ttl_ms = ttl_ms;
        self
    }

    pub fn max_memory_size(mut self, size: usize) -> Self {
        self.config.cache.max_memory_size = size;
        self
    }

    pub fn compression_enabled(mut self, enabled: bool) -> Self {
        self.config.compression.enabled = enabled;
        self
    }

    pub fn target_reduction_percent(mut self, percent: f64) -> Self {
        self.config.compression.target_reduction_percent = percent;
        self
    }

    pub fn max_choices(mut self, max: usize) -> Self {
        self.config.choices.max_choices = max;
        self
    }

    pub fn enforce_limit(mut self, enforce: bool) -> Self {
        self.config.choices.enforce_limit = enforce;
        self
    }

    pub fn padding(mut self, padding: PaddingRule) -> Self {
        self.config.choices.padding = padding;
        self
    }

    pub fn max_daily_cost(mut self, cost: f64) -> Self {
        self.config.cost.max_daily_cost = cost;
        self
    }

    pub fn preferred_provider(mut self, provider: PreferredProvider) -> Self {
        self.config.cost.preferred_provider = provider;
        self
    }

    pub fn min_content_length(mut self, length: usize) -> Self {
        self.config.quality.min_content_length = length;
        self
    }

    pub fn required_markers(mut self, markers: Vec<String>) -> Self {
        self.config.quality.required_markers = markers;
        self
    }

    pub fn min_response_quality(mut self, score: f64) -> Self {
        self.config.quality.min_response_quality = score;
        self
    }

    /// Validate and return the config
    pub fn build(self) -> Result<OptimizationConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
