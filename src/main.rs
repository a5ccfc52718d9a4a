//! narrative-optimizer CLI - cache, compress and rank narrative generation requests

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use narrative_optimizer::{
    cache::FileStore,
    choices::ChoiceProcessor,
    compression::PromptCompressor,
    config::OptimizationConfig,
    orchestrator::{GenerationRequest, OptimizationOrchestrator},
    provider::{GenerationContext, HttpProvider, Preferences, PriorChoice},
    tokens::TokenEstimator,
};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "narrative-optimizer")]
#[command(about = "Cut the cost of branching-narrative generation with caching, compression and choice limiting")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbosity level
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Estimate the token count of a text or file
    Estimate {
        /// Input file or text
        #[arg(short, long)]
        input: String,

        /// Use BPE tokenization instead of the heuristic
        #[arg(long)]
        precise: bool,
    },

    /// Compress a prompt
    Compress {
        /// Input file or prompt text
        #[arg(short, long)]
        input: String,

        /// Target reduction in percent (default: from config)
        #[arg(short, long)]
        target: Option<f64>,

        /// Skip the quality gate
        #[arg(long)]
        no_quality_gate: bool,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Extract, normalise and limit choices from a provider response
    Choices {
        /// Response file or text
        #[arg(short, long)]
        input: String,

        /// Maximum choices to keep (default: from config)
        #[arg(short, long)]
        max: Option<usize>,

        /// Location to attach to the choices
        #[arg(long, default_value = "")]
        location: String,
    },

    /// Generate a scene through the full optimization pipeline
    Generate {
        /// Prompt file or text
        #[arg(short, long)]
        prompt: String,

        /// Current location in the story
        #[arg(long, default_value = "")]
        location: String,

        #[arg(long, default_value = "")]
        genre: String,

        #[arg(long, default_value = "")]
        style: String,

        #[arg(long, default_value = "")]
        mood: String,

        /// Choices already made, in order
        #[arg(long = "prior")]
        prior_choices: Vec<String>,

        /// Send the prompt uncompressed
        #[arg(long)]
        no_compress: bool,

        /// Provider timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Skip the on-disk cache tier
        #[arg(long)]
        memory_only: bool,
    },

    /// Manage configuration
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Initialize configuration file with defaults
    Init {
        /// Overwrite existing config
        #[arg(long)]
        force: bool,
    },

    /// Show current configuration
    Show {
        /// Show only one section (cache, compression, choices, cost, quality, providers)
        #[arg(short, long)]
        section: Option<String>,
    },

    /// Show configuration file path
    Path,

    /// Validate configuration
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Estimate { input, precise } => run_estimate(&input, precise).await?,
        Commands::Compress {
            input,
            target,
            no_quality_gate,
            output,
        } => run_compress(&input, target, no_quality_gate, output).await?,
        Commands::Choices { input, max, location } => run_choices(&input, max, &location).await?,
        Commands::Generate {
            prompt,
            location,
            genre,
            style,
            mood,
            prior_choices,
            no_compress,
            timeout,
            memory_only,
        } => {
            let context = GenerationContext {
                location,
                preferences: Preferences { genre, style, mood },
                prior_choices: prior_choices
                    .into_iter()
                    .enumerate()
                    .map(|(i, text)| PriorChoice { ordinal: i + 1, text })
                    .collect(),
                max_choices: 0,
            };
            run_generate(&prompt, context, no_compress, timeout, memory_only).await?
        }
        Commands::Config(cmd) => run_config_command(cmd)?,
    }

    Ok(())
}

/// Treat `input` as a path if such a file exists, otherwise as literal text
async fn read_input(input: &str) -> Result<String> {
    let path = PathBuf::from(input);
    if path.is_file() {
        Ok(tokio::fs::read_to_string(&path).await?)
    } else {
        Ok(input.to_string())
    }
}

async fn run_estimate(input: &str, precise: bool) -> Result<()> {
    let text = read_input(input).await?;
    let estimator = if precise {
        TokenEstimator::precise()
    } else {
        TokenEstimator::heuristic()
    };

    println!("Characters: {}", text.chars().count());
    println!("Estimated tokens ({:?}): {}", estimator.mode(), estimator.estimate(&text));

    Ok(())
}

async fn run_compress(input: &str, target: Option<f64>, no_quality_gate: bool, output: Option<PathBuf>) -> Result<()> {
    let config = OptimizationConfig::load()?;
    let prompt = read_input(input).await?;
    let target = target.unwrap_or(config.compression.target_reduction_percent);
    info!("Compressing prompt with target reduction {}%", target);

    let compressor = PromptCompressor::new(
        TokenEstimator::default(),
        config.compression.preserve_quality && !no_quality_gate,
        config.compression.min_quality_score,
    );
    let result = compressor.compress(&prompt, target);

    if let Some(path) = output {
        tokio::fs::write(&path, &result.compressed).await?;
        println!("Compressed prompt written to: {}", path.display());
    } else {
        println!("{}", result.compressed);
    }

    println!("\n--- Compression Stats ---");
    println!("Tokens saved: ~{}", result.tokens_saved);
    println!("Compression ratio: {:.1}%", result.compression_ratio * 100.0);
    println!("Quality score: {:.2}", result.quality.score);
    println!("Outcome: {:?}", result.outcome);
    println!("Stages applied: {:?}", result.stages_applied);

    Ok(())
}

async fn run_choices(input: &str, max: Option<usize>, location: &str) -> Result<()> {
    let config = OptimizationConfig::load()?;
    let text = read_input(input).await?;
    let max = max.unwrap_or(config.choices.max_choices);

    // A JSON document is treated as structured choices, anything else as prose
    let raw: Value = serde_json::from_str(&text).unwrap_or(Value::Null);

    let processor = ChoiceProcessor::new(config.choice_rules());
    let processed = processor.process(&text, &raw, location);
    if processed.defaulted {
        println!("No choices found, using the default choice set");
    }

    let limited = processor.limit_choices(processed.choices, max);
    println!("{}", serde_json::to_string_pretty(&limited)?);
    println!(
        "\nKept {} of {} choices (quality ratio {:.2}, valid: {})",
        limited.limited_count,
        limited.original_count,
        limited.quality,
        processor.validate_choices(&limited.choices)
    );

    Ok(())
}

async fn run_generate(
    prompt: &str,
    context: GenerationContext,
    no_compress: bool,
    timeout: Option<u64>,
    memory_only: bool,
) -> Result<()> {
    let config = OptimizationConfig::load()?;
    if config.providers.provider_a.api_key.is_empty() {
        bail!("No API key configured. Set NARRATIVE_API_KEY or add providers.provider_a.api_key to the config file");
    }

    let prompt = read_input(prompt).await?;
    let mut builder = OptimizationOrchestrator::builder(config.clone())
        .provider(Arc::new(HttpProvider::new(config.providers.provider_a.clone())));
    if let Some(secondary) = &config.providers.provider_b {
        builder = builder.secondary_provider(Arc::new(HttpProvider::new(secondary.clone())));
    }
    if !memory_only {
        if let Some(dir) = FileStore::default_dir() {
            builder = builder.persistent_store(Arc::new(FileStore::new(dir)));
        }
    }
    let optimizer = builder.build()?;

    let mut request = GenerationRequest::new(prompt, context);
    if no_compress {
        request = request.without_compression();
    }
    if let Some(secs) = timeout {
        request = request.with_timeout(Duration::from_secs(secs));
    }

    let response = optimizer.generate(request).await?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    println!("\n{}", optimizer.metrics_summary());

    Ok(())
}

fn run_config_command(cmd: ConfigCommands) -> Result<()> {
    match cmd {
        ConfigCommands::Init { force } => config_init(force)?,
        ConfigCommands::Show { section } => config_show(section)?,
        ConfigCommands::Path => config_path(),
        ConfigCommands::Validate => config_validate()?,
    }
    Ok(())
}

fn config_init(force: bool) -> Result<()> {
    let path = OptimizationConfig::default_path();

    if path.exists() && !force {
        println!("Configuration file already exists at: {}", path.display());
        println!("Use --force to overwrite");
        return Ok(());
    }

    OptimizationConfig::default().save()?;

    println!("Configuration file created at: {}", path.display());
    println!();
    println!("Next steps:");
    println!("  1. Edit the config file to add your provider API key, or");
    println!("  2. Set environment variables:");
    println!("     export NARRATIVE_API_KEY=your_key");
    println!("     export NARRATIVE_SECONDARY_API_KEY=your_other_key");

    Ok(())
}

fn config_show(section: Option<String>) -> Result<()> {
    let mut config = OptimizationConfig::load()?;

    // Mask API keys in display
    if !config.providers.provider_a.api_key.is_empty() {
        config.providers.provider_a.api_key = "***".to_string();
    }
    if let Some(secondary) = config.providers.provider_b.as_mut() {
        if !secondary.api_key.is_empty() {
            secondary.api_key = "***".to_string();
        }
    }

    let display = match section.as_deref().map(str::to_lowercase).as_deref() {
        None => toml::to_string_pretty(&config)?,
        Some("cache") => toml::to_string_pretty(&config.cache)?,
        Some("compression") => toml::to_string_pretty(&config.compression)?,
        Some("choices") => toml::to_string_pretty(&config.choices)?,
        Some("cost") => toml::to_string_pretty(&config.cost)?,
        Some("quality") => toml::to_string_pretty(&config.quality)?,
        Some("providers") => toml::to_string_pretty(&config.providers)?,
        Some(other) => {
            println!("Unknown section: {}", other);
            println!("Available: cache, compression, choices, cost, quality, providers");
            return Ok(());
        }
    };

    println!("{}", display);

    println!("\n--- Environment Variables ---");
    for var in [
        "NARRATIVE_API_KEY",
        "NARRATIVE_SECONDARY_API_KEY",
        "NARRATIVE_BASE_URL",
        "NARRATIVE_MODEL",
        "NARRATIVE_MAX_DAILY_COST",
    ] {
        println!("{}: {}", var, if std::env::var(var).is_ok() { "set" } else { "not set" });
    }

    Ok(())
}

fn config_path() {
    let path = OptimizationConfig::default_path();
    println!("{}", path.display());

    if path.exists() {
        println!("(file exists)");
    } else {
        println!("(file does not exist - run 'config init' to create)");
    }
}

fn config_validate() -> Result<()> {
    match OptimizationConfig::load() {
        Ok(config) => {
            println!("Configuration is valid!");
            println!();
            println!(
                "Cache: {} (memory {} entries, {} ms; disk {} h)",
                if config.cache.enabled { "enabled" } else { "disabled" },
                config.cache.max_memory_size,
                config.cache.memory_ttl_ms,
                config.cache.db_ttl_hours
            );
            println!(
                "Compression: {} (target {}%)",
                if config.compression.enabled { "enabled" } else { "disabled" },
                config.compression.target_reduction_percent
            );
            println!("Max choices: {}", config.choices.max_choices);
            println!(
                "Provider: {} ({}){}",
                config.providers.provider_a.name,
                config.providers.provider_a.model,
                if config.providers.provider_a.api_key.is_empty() { " - NO API KEY" } else { "" }
            );
            if let Some(secondary) = &config.providers.provider_b {
                println!("Secondary provider: {} ({})", secondary.name, secondary.model);
            }
            println!("Preferred provider: {}", config.cost.preferred_provider);
        }
        Err(e) => {
            println!("Configuration validation failed:");
            println!("  {}", e);
            println!();
            println!("Fix the value in {} and run this again", OptimizationConfig::default_path().display());
        }
    }

    Ok(())
}
