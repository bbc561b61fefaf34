//! Compile-time registry of transformer factories plus the named instances
//! built from them.

use super::Transformer;
use crate::error::{GatewayError, Result};
use crate::provider::TransformerRef;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;

/// Shared resources factories may need when building an instance.
#[derive(Clone)]
pub struct RegistryContext {
    pub client: reqwest::Client,
}

type Factory = fn(&Map<String, Value>, &RegistryContext) -> Result<Arc<dyn Transformer>>;

const BUILTINS: &[(&str, Factory)] = &[
    ("anthropic", super::anthropic::factory),
    ("openai", super::openai::factory),
    ("gemini", super::gemini::factory),
    ("vertex-gemini", super::vertex_gemini::factory),
    ("vertex-claude", super::vertex_claude::factory),
    ("deepseek", super::deepseek::factory),
    ("openrouter", super::openrouter::factory),
    ("groq", super::groq::factory),
    ("cerebras", super::cerebras::factory),
    ("vercel", super::vercel::factory),
    ("tooluse", super::tooluse::factory),
    ("reasoning", super::reasoning::factory),
    ("maxtoken", super::maxtoken::factory),
    ("max_completion_tokens", super::max_completion_tokens::factory),
    ("sampling", super::sampling::factory),
    ("stream_options", super::stream_options::factory),
    ("cleancache", super::cleancache::factory),
    ("custom_params", super::custom_params::factory),
    ("enhancetool", super::enhancetool::factory),
];

/// Holds every transformer the gateway can reference by name.
pub struct Registry {
    context: RegistryContext,
    factories: HashMap<&'static str, Factory>,
    instances: RwLock<HashMap<String, Arc<dyn Transformer>>>,
}

impl Registry {
    /// Build the registry with one default instance of every built-in.
    pub fn with_builtins(client: reqwest::Client) -> Result<Self> {
        let context = RegistryContext { client };
        let factories: HashMap<&'static str, Factory> = BUILTINS.iter().copied().collect();

        let empty = Map::new();
        let mut instances: HashMap<String, Arc<dyn Transformer>> = HashMap::new();
        for (name, factory) in &factories {
            instances.insert(name.to_string(), factory(&empty, &context)?);
        }

        Ok(Self {
            context,
            factories,
            instances: RwLock::new(instances),
        })
    }

    /// Publish a config-declared instance: a factory (`backend`) built with
    /// options, registered under its own name.
    pub fn declare(&self, name: &str, backend: &str, options: &Map<String, Value>) -> Result<()> {
        let Some(factory) = self.factories.get(backend) else {
            return Err(GatewayError::transformer(format!(
                "unknown transformer backend '{backend}'"
            )));
        };
        let instance = factory(options, &self.context)?;
        debug!(name, backend, "declared transformer instance");
        self.instances
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), instance);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Transformer>> {
        self.instances
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Resolve a chain reference. A bare name uses the published instance;
    /// a name with options builds a fresh one from the factory.
    pub fn resolve(&self, reference: &TransformerRef) -> Result<Arc<dyn Transformer>> {
        match reference.options() {
            None => self.get(reference.name()).ok_or_else(|| {
                GatewayError::transformer(format!("unknown transformer '{}'", reference.name()))
            }),
            Some(options) => {
                let Some(factory) = self.factories.get(reference.name()) else {
                    return Err(GatewayError::transformer(format!(
                        "unknown transformer '{}'",
                        reference.name()
                    )));
                };
                factory(options, &self.context)
            }
        }
    }

    /// Transformers that serve an inbound endpoint path.
    pub fn endpoints(&self) -> Vec<(&'static str, Arc<dyn Transformer>)> {
        let instances = self
            .instances
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let mut endpoints: Vec<(&'static str, Arc<dyn Transformer>)> = instances
            .values()
            .filter_map(|t| t.endpoint().map(|path| (path, t.clone())))
            .collect();
        endpoints.sort_by_key(|(path, _)| *path);
        endpoints.dedup_by_key(|(path, _)| *path);
        endpoints
    }
}
