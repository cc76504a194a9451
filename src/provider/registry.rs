//! Provider registry - catalog plus the adapter serving each provider.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{ProbeError, Result};
use crate::provider::adapter::ProviderAdapter;
use crate::provider::catalog::{ProviderCatalog, ResolvedProvider, normalize};

/// Maps canonical providers to the adapters that talk to them.
#[derive(Clone)]
pub struct ProviderRegistry {
    catalog: ProviderCatalog,
    adapters: HashMap<String, Arc<dyn ProviderAdapter>>,
}

impl ProviderRegistry {
    pub fn new(catalog: ProviderCatalog) -> Self {
        Self {
            catalog,
            adapters: HashMap::new(),
        }
    }

    /// Register the adapter serving every model of `provider`.
    pub fn register(&mut self, provider: &str, adapter: Arc<dyn ProviderAdapter>) {
        self.adapters.insert(normalize(provider), adapter);
    }

    /// Builder-style [`register`](Self::register).
    pub fn with_adapter(mut self, provider: &str, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.register(provider, adapter);
        self
    }

    /// Register `adapter` for every provider in the catalog that has none yet.
    pub fn with_fallback_adapter(mut self, adapter: Arc<dyn ProviderAdapter>) -> Self {
        let missing: Vec<String> = self
            .catalog
            .providers()
            .map(|(p, _)| p.to_string())
            .filter(|p| !self.adapters.contains_key(p))
            .collect();
        for provider in missing {
            self.adapters.insert(provider, adapter.clone());
        }
        self
    }

    pub fn catalog(&self) -> &ProviderCatalog {
        &self.catalog
    }

    pub fn has_adapter(&self, provider: &str) -> bool {
        self.adapters.contains_key(provider)
    }

    /// Resolve a raw provider identifier and find its adapter.
    pub fn resolve(&self, raw: &str) -> Result<(ResolvedProvider, Arc<dyn ProviderAdapter>)> {
        let resolved = self.catalog.resolve(raw)?;
        let adapter = self
            .adapters
            .get(&resolved.provider)
            .cloned()
            .ok_or_else(|| ProbeError::AdapterMissing(resolved.provider.clone()))?;
        Ok((resolved, adapter))
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new(ProviderCatalog::new())
    }
}
