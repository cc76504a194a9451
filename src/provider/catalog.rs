//! Provider catalog - resolves aliases and display names to canonical keys.
//!
//! Callers name providers loosely ("ChatGPT", "claude", "openai:gpt-4o").
//! Resilience state is keyed by the canonical `(provider, model)` pair, so
//! every identifier is normalized here before anything else happens.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::{ProbeError, Result};

/// Built-in providers and their default models.
const BUILTIN_PROVIDERS: &[(&str, &str)] = &[
    ("openai", "gpt-4o-mini"),
    ("anthropic", "claude-3-5-sonnet-latest"),
    ("google", "gemini-1.5-pro"),
    ("perplexity", "sonar"),
    ("deepseek", "deepseek-chat"),
];

/// Built-in aliases: alias -> (provider, model override).
const BUILTIN_ALIASES: &[(&str, &str, Option<&str>)] = &[
    ("chatgpt", "openai", Some("gpt-4o")),
    ("gpt", "openai", None),
    ("gpt-4o", "openai", Some("gpt-4o")),
    ("gpt-4o-mini", "openai", Some("gpt-4o-mini")),
    ("claude", "anthropic", None),
    ("gemini", "google", None),
    ("sonar", "perplexity", Some("sonar")),
    ("perplexity-ai", "perplexity", None),
    ("deepseek-chat", "deepseek", Some("deepseek-chat")),
];

/// Canonical provider and model for a raw identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResolvedProvider {
    pub provider: String,
    pub model: String,
}

impl fmt::Display for ResolvedProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.provider, self.model)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct AliasTarget {
    provider: String,
    model: Option<String>,
}

/// Registry of known providers and aliases.
#[derive(Debug, Clone)]
pub struct ProviderCatalog {
    /// provider -> default model
    providers: BTreeMap<String, String>,
    aliases: BTreeMap<String, AliasTarget>,
}

impl ProviderCatalog {
    /// Catalog with the built-in providers and aliases.
    pub fn new() -> Self {
        let mut catalog = Self::empty();
        for (provider, model) in BUILTIN_PROVIDERS {
            catalog.providers.insert(provider.to_string(), model.to_string());
        }
        for (alias, provider, model) in BUILTIN_ALIASES {
            catalog.aliases.insert(
                alias.to_string(),
                AliasTarget {
                    provider: provider.to_string(),
                    model: model.map(str::to_string),
                },
            );
        }
        catalog
    }

    /// Catalog with no providers at all.
    pub fn empty() -> Self {
        Self {
            providers: BTreeMap::new(),
            aliases: BTreeMap::new(),
        }
    }

    /// Add or replace a provider and its default model.
    pub fn add_provider(&mut self, provider: &str, default_model: &str) {
        self.providers
            .insert(normalize(provider), default_model.trim().to_string());
    }

    /// Add an alias pointing at `target`, written as `provider` or `provider:model`.
    pub fn add_alias(&mut self, alias: &str, target: &str) -> Result<()> {
        let (provider, model) = split_explicit(target).unwrap_or((target, ""));
        let provider = normalize(provider);
        if !self.providers.contains_key(&provider) {
            return Err(ProbeError::UnknownProvider(target.to_string()));
        }
        let model = model.trim();
        self.aliases.insert(
            normalize(alias),
            AliasTarget {
                provider,
                model: (!model.is_empty()).then(|| model.to_string()),
            },
        );
        Ok(())
    }

    /// Resolve a raw identifier to its canonical provider and model.
    ///
    /// Accepted forms: `alias`, `provider`, `provider:model`, `provider/model`.
    /// The provider part of the explicit forms may itself be an alias.
    pub fn resolve(&self, raw: &str) -> Result<ResolvedProvider> {
        if let Some((provider_part, model_part)) = split_explicit(raw) {
            let provider = self
                .canonical_provider(&normalize(provider_part))
                .ok_or_else(|| ProbeError::UnknownProvider(raw.to_string()))?;
            let model = model_part.trim();
            let model = if model.is_empty() {
                self.default_model(&provider).unwrap_or_default().to_string()
            } else {
                model.to_string()
            };
            return Ok(ResolvedProvider { provider, model });
        }

        let key = normalize(raw);
        if let Some(target) = self.aliases.get(&key) {
            let model = target
                .model
                .clone()
                .unwrap_or_else(|| self.default_model(&target.provider).unwrap_or_default().to_string());
            return Ok(ResolvedProvider {
                provider: target.provider.clone(),
                model,
            });
        }
        if let Some(model) = self.providers.get(&key) {
            return Ok(ResolvedProvider {
                provider: key,
                model: model.clone(),
            });
        }

        Err(ProbeError::UnknownProvider(raw.to_string()))
    }

    pub fn default_model(&self, provider: &str) -> Option<&str> {
        self.providers.get(provider).map(String::as_str)
    }

    /// Canonical providers with their default models, sorted by key.
    pub fn providers(&self) -> impl Iterator<Item = (&str, &str)> {
        self.providers.iter().map(|(p, m)| (p.as_str(), m.as_str()))
    }

    /// Aliases with their target, rendered as `provider[:model]`.
    pub fn aliases(&self) -> impl Iterator<Item = (&str, String)> {
        self.aliases.iter().map(|(alias, target)| {
            let rendered = match &target.model {
                Some(model) => format!("{}:{}", target.provider, model),
                None => target.provider.clone(),
            };
            (alias.as_str(), rendered)
        })
    }

    fn canonical_provider(&self, key: &str) -> Option<String> {
        if self.providers.contains_key(key) {
            return Some(key.to_string());
        }
        self.aliases.get(key).map(|t| t.provider.clone())
    }
}

impl Default for ProviderCatalog {
    fn default() -> Self {
        Self::new()
    }
}

/// Lowercase, trim, and fold spaces/underscores into dashes.
pub fn normalize(raw: &str) -> String {
    raw.trim()
        .to_lowercase()
        .split(|c: char| c.is_whitespace() || c == '_')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

fn split_explicit(raw: &str) -> Option<(&str, &str)> {
    raw.split_once(':').or_else(|| raw.split_once('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("  ChatGPT "), "chatgpt");
        assert_eq!(normalize("Perplexity AI"), "perplexity-ai");
        assert_eq!(normalize("deepseek_chat"), "deepseek-chat");
    }

    #[test]
    fn test_resolve_canonical_provider() {
        let catalog = ProviderCatalog::new();
        let resolved = catalog.resolve("openai").unwrap();
        assert_eq!(resolved.provider, "openai");
        assert_eq!(resolved.model, "gpt-4o-mini");
    }

    #[test]
    fn test_resolve_alias_with_model_override() {
        let catalog = ProviderCatalog::new();
        let resolved = catalog.resolve("ChatGPT").unwrap();
        assert_eq!(resolved.provider, "openai");
        assert_eq!(resolved.model, "gpt-4o");
    }

    #[test]
    fn test_resolve_alias_uses_default_model() {
        let catalog = ProviderCatalog::new();
        let resolved = catalog.resolve("Claude").unwrap();
        assert_eq!(resolved.provider, "anthropic");
        assert_eq!(resolved.model, "claude-3-5-sonnet-latest");
    }

    #[test]
    fn test_resolve_explicit_forms() {
        let catalog = ProviderCatalog::new();
        let colon = catalog.resolve("openai:gpt-4.1").unwrap();
        assert_eq!(colon.to_string(), "openai:gpt-4.1");

        let slash = catalog.resolve("gemini/gemini-2.0-flash").unwrap();
        assert_eq!(slash.provider, "google");
        assert_eq!(slash.model, "gemini-2.0-flash");

        let empty_model = catalog.resolve("deepseek:").unwrap();
        assert_eq!(empty_model.model, "deepseek-chat");
    }

    #[test]
    fn test_resolve_unknown() {
        let catalog = ProviderCatalog::new();
        assert!(matches!(catalog.resolve("bard"), Err(ProbeError::UnknownProvider(_))));
        assert!(matches!(catalog.resolve("bard:x"), Err(ProbeError::UnknownProvider(_))));
    }

    #[test]
    fn test_add_provider_and_alias() {
        let mut catalog = ProviderCatalog::empty();
        catalog.add_provider("Mock", "mock-1");
        catalog.add_alias("Fake Bot", "mock:mock-2").unwrap();

        assert_eq!(catalog.resolve("mock").unwrap().model, "mock-1");
        let aliased = catalog.resolve("fake bot").unwrap();
        assert_eq!(aliased.provider, "mock");
        assert_eq!(aliased.model, "mock-2");
    }

    #[test]
    fn test_add_alias_requires_known_provider() {
        let mut catalog = ProviderCatalog::empty();
        assert!(catalog.add_alias("x", "nowhere").is_err());
    }

    #[test]
    fn test_listing() {
        let catalog = ProviderCatalog::new();
        let providers: Vec<_> = catalog.providers().map(|(p, _)| p).collect();
        assert_eq!(providers, vec!["anthropic", "deepseek", "google", "openai", "perplexity"]);
        assert!(catalog.aliases().any(|(alias, target)| alias == "chatgpt" && target == "openai:gpt-4o"));
    }
}
