use eyre::{Context, Result};
use probefan::domain::TaskDefaults;
use probefan::provider::{EndpointConfig, ProviderCatalog};
use probefan::resilience::{BreakerConfig, GovernorConfig, RetryPolicy};
use probefan::scheduler::SchedulerConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: Option<String>,
    pub governor: GovernorConfig,
    pub breaker: BreakerConfig,
    pub retry: RetryPolicy,
    pub scheduler: SchedulerConfig,
    pub task: TaskDefaults,
    pub providers: ProvidersConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    /// Extra providers: name -> default model
    pub extra: BTreeMap<String, String>,
    /// Extra aliases: alias -> `provider` or `provider:model`
    pub aliases: BTreeMap<String, String>,
    /// HTTP endpoints for OpenAI-compatible providers
    pub endpoints: BTreeMap<String, EndpointConfig>,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        let endpoints = [
            ("openai", "https://api.openai.com/v1", "OPENAI_API_KEY"),
            ("anthropic", "https://api.anthropic.com/v1", "ANTHROPIC_API_KEY"),
            (
                "google",
                "https://generativelanguage.googleapis.com/v1beta/openai",
                "GEMINI_API_KEY",
            ),
            ("perplexity", "https://api.perplexity.ai", "PERPLEXITY_API_KEY"),
            ("deepseek", "https://api.deepseek.com/v1", "DEEPSEEK_API_KEY"),
        ]
        .into_iter()
        .map(|(provider, url, env)| (provider.to_string(), EndpointConfig::new(url, env)))
        .collect();

        Self {
            extra: BTreeMap::new(),
            aliases: BTreeMap::new(),
            endpoints,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: Some("info".to_string()),
            governor: GovernorConfig::default(),
            breaker: BreakerConfig::default(),
            retry: RetryPolicy::default(),
            scheduler: SchedulerConfig::default(),
            task: TaskDefaults::default(),
            providers: ProvidersConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try primary location: ~/.config/<project>/<project>.yml
        if let Some(config_dir) = dirs::config_dir() {
            let project_name = env!("CARGO_PKG_NAME");
            let primary_config = config_dir.join(project_name).join(format!("{}.yml", project_name));
            if primary_config.exists() {
                match Self::load_from_file(&primary_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        log::warn!("Failed to load config from {}: {}", primary_config.display(), e);
                    }
                }
            }
        }

        // Try fallback location: ./<project>.yml
        let project_name = env!("CARGO_PKG_NAME");
        let fallback_config = PathBuf::from(format!("{}.yml", project_name));
        if fallback_config.exists() {
            match Self::load_from_file(&fallback_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    log::warn!("Failed to load config from {}: {}", fallback_config.display(), e);
                }
            }
        }

        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        log::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Built-in catalog extended with the configured providers and aliases.
    pub fn catalog(&self) -> Result<ProviderCatalog> {
        let mut catalog = ProviderCatalog::new();
        for (provider, model) in &self.providers.extra {
            catalog.add_provider(provider, model);
        }
        for (alias, target) in &self.providers.aliases {
            catalog
                .add_alias(alias, target)
                .context(format!("Invalid alias '{}' -> '{}'", alias, target))?;
        }
        Ok(catalog)
    }
}
