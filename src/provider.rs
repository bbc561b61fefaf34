//! Provider records and the model routing directory.

use crate::error::{GatewayError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::info;

/// Reference to a transformer by name, optionally carrying options.
///
/// In config this is either a plain string or a `["name", { ... }]` pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TransformerRef {
    Name(String),
    WithOptions(String, Map<String, Value>),
}

impl TransformerRef {
    pub fn name(&self) -> &str {
        match self {
            TransformerRef::Name(name) => name,
            TransformerRef::WithOptions(name, _) => name,
        }
    }

    pub fn options(&self) -> Option<&Map<String, Value>> {
        match self {
            TransformerRef::Name(_) => None,
            TransformerRef::WithOptions(_, options) => Some(options),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelChain {
    #[serde(default, rename = "use", skip_serializing_if = "Vec::is_empty")]
    pub chain: Vec<TransformerRef>,
}

/// Transformer chains attached to a provider: a provider-wide `use` list
/// plus optional per-model lists keyed by model name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransformerChains {
    #[serde(default, rename = "use", skip_serializing_if = "Vec::is_empty")]
    pub chain: Vec<TransformerRef>,
    #[serde(default, flatten, skip_serializing_if = "HashMap::is_empty")]
    pub models: HashMap<String, ModelChain>,
}

impl TransformerChains {
    pub fn model_chain(&self, model: &str) -> &[TransformerRef] {
        self.models
            .get(model)
            .map(|m| m.chain.as_slice())
            .unwrap_or_default()
    }
}

fn default_enabled() -> bool {
    true
}

/// An upstream LLM service the gateway can route to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provider {
    pub name: String,
    pub api_base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub models: Vec<String>,
    #[serde(default, skip_serializing_if = "chains_are_empty")]
    pub transformers: TransformerChains,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

fn chains_are_empty(chains: &TransformerChains) -> bool {
    chains.chain.is_empty() && chains.models.is_empty()
}

/// One row of the model listing: a routable id, its owning provider, and
/// the provider's creation time as epoch seconds.
#[derive(Debug, Clone)]
pub struct ModelEntry {
    pub id: String,
    pub provider: String,
    pub created: i64,
}

impl Provider {
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(GatewayError::provider("provider name must not be empty"));
        }
        if self.name.contains(',') {
            return Err(GatewayError::provider(
                "provider name must not contain a comma",
            ));
        }
        if self.api_base_url.is_empty() {
            return Err(GatewayError::provider(format!(
                "provider '{}' has no api_base_url",
                self.name
            )));
        }
        if self.api_key.is_empty() {
            return Err(GatewayError::provider(format!(
                "provider '{}' has no api_key",
                self.name
            )));
        }
        if self.models.is_empty() {
            return Err(GatewayError::provider(format!(
                "provider '{}' lists no models",
                self.name
            )));
        }
        Ok(())
    }
}

#[derive(Default)]
struct Directory {
    providers: HashMap<String, Arc<Provider>>,
    /// Registration order, which decides bare-model route precedence.
    order: Vec<String>,
    /// Bare model name to owning provider. First registrant wins.
    routes: HashMap<String, String>,
}

impl Directory {
    fn rebuild_routes(&mut self) {
        self.routes.clear();
        for name in &self.order {
            let Some(provider) = self.providers.get(name) else {
                continue;
            };
            for model in &provider.models {
                self.routes
                    .entry(model.clone())
                    .or_insert_with(|| name.clone());
            }
        }
    }
}

/// Thread-safe registry of providers plus the model routing table.
#[derive(Default)]
pub struct ProviderDirectory {
    inner: RwLock<Directory>,
}

impl ProviderDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a provider. A fresh record gets a creation stamp;
    /// replacing an existing one keeps it and stamps the update time.
    pub fn register(&self, mut provider: Provider) -> Result<()> {
        provider.validate()?;
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let now = Utc::now();
        match inner.providers.get(&provider.name) {
            Some(existing) => {
                provider.created_at = provider.created_at.or(existing.created_at);
                provider.updated_at = Some(now);
            }
            None => {
                provider.created_at.get_or_insert(now);
                inner.order.push(provider.name.clone());
            }
        }
        info!(provider = %provider.name, models = provider.models.len(), "registered provider");
        inner
            .providers
            .insert(provider.name.clone(), Arc::new(provider));
        inner.rebuild_routes();
        Ok(())
    }

    pub fn remove(&self, name: &str) -> bool {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let existed = inner.providers.remove(name).is_some();
        if existed {
            inner.order.retain(|n| n != name);
            inner.rebuild_routes();
            info!(provider = %name, "removed provider");
        }
        existed
    }

    /// Enable or disable a provider. Routes stay in place; resolution fails
    /// while disabled.
    pub fn set_enabled(&self, name: &str, enabled: bool) -> Result<()> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let Some(existing) = inner.providers.get(name) else {
            return Err(GatewayError::provider(format!("unknown provider '{name}'")));
        };
        let mut updated = (**existing).clone();
        updated.enabled = enabled;
        updated.updated_at = Some(Utc::now());
        inner.providers.insert(name.to_string(), Arc::new(updated));
        info!(provider = %name, enabled, "toggled provider");
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<Provider>> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.providers.get(name).cloned()
    }

    /// Providers in registration order.
    pub fn list(&self) -> Vec<Arc<Provider>> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner
            .order
            .iter()
            .filter_map(|name| inner.providers.get(name).cloned())
            .collect()
    }

    /// All routable model ids with their owning provider and the provider's
    /// creation time, composite forms first, then the bare routes. Disabled
    /// providers are left out.
    pub fn model_entries(&self) -> Vec<ModelEntry> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let entry = |id: String, provider: &Provider| ModelEntry {
            id,
            provider: provider.name.clone(),
            created: provider.created_at.map(|t| t.timestamp()).unwrap_or_default(),
        };

        let mut entries = Vec::new();
        for name in &inner.order {
            if let Some(provider) = inner.providers.get(name).filter(|p| p.enabled) {
                for model in &provider.models {
                    entries.push(entry(format!("{name},{model}"), provider));
                }
            }
        }
        for name in &inner.order {
            if let Some(provider) = inner.providers.get(name).filter(|p| p.enabled) {
                for model in &provider.models {
                    if inner.routes.get(model).is_some_and(|owner| owner == name) {
                        entries.push(entry(model.clone(), provider));
                    }
                }
            }
        }
        entries
    }

    /// Resolve a request model to a provider and the upstream model name.
    ///
    /// `"provider,model"` addresses a provider directly; a bare model name
    /// goes through the routing table.
    pub fn resolve(&self, model: &str) -> Result<(Arc<Provider>, String)> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let no_route = |inner: &Directory| {
            let mut available: Vec<String> = Vec::new();
            for name in &inner.order {
                if let Some(provider) = inner.providers.get(name).filter(|p| p.enabled) {
                    for m in &provider.models {
                        available.push(format!("{name},{m}"));
                    }
                }
            }
            GatewayError::no_route(model, &available)
        };

        let (provider_name, target_model) = match model.split_once(',') {
            Some((provider, rest)) => (provider.trim().to_string(), rest.trim().to_string()),
            None => {
                let Some(provider) = inner.routes.get(model) else {
                    return Err(no_route(&inner));
                };
                (provider.clone(), model.to_string())
            }
        };

        let Some(provider) = inner.providers.get(&provider_name) else {
            return Err(no_route(&inner));
        };
        if !provider.models.contains(&target_model) {
            return Err(no_route(&inner));
        }
        // A disabled provider's routes do not resolve, same as a missing one.
        if !provider.enabled {
            return Err(no_route(&inner));
        }
        Ok((provider.clone(), target_model))
    }
}
