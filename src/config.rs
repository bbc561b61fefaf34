use crate::error::{GatewayError, Result};
use crate::provider::Provider;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Optional access key callers must present (x-api-key or bearer).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
    /// Proxy for upstream HTTPS traffic.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub https_proxy: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default, rename = "providers")]
    pub providers: Vec<Provider>,
    /// Extra named transformer instances built from registered factories.
    #[serde(default, rename = "transformers")]
    pub transformers: Vec<TransformerDecl>,
}

/// A config-declared transformer instance: a registered factory (`backend`)
/// plus options, published under its own name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformerDecl {
    pub name: String,
    pub backend: String,
    #[serde(default)]
    pub options: Map<String, Value>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3456
}

fn default_timeout_secs() -> u64 {
    3600
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            api_key: None,
            log_file: None,
            https_proxy: None,
            timeout_secs: default_timeout_secs(),
            providers: Vec::new(),
            transformers: Vec::new(),
        }
    }
}

impl GatewayConfig {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            GatewayError::config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Search standard locations for a config file.
    /// Priority: CLI arg > CWD > XDG config > home dir.
    ///
    /// Providers can also be registered over HTTP, so a missing config file
    /// is not an error; the gateway starts empty.
    pub fn find_and_load(explicit_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit_path {
            return Self::load(path);
        }

        for candidate in config_search_paths() {
            if candidate.exists() {
                tracing::info!(path = %candidate.display(), "Loading config");
                return Self::load(&candidate);
            }
        }

        tracing::info!("No config file found, starting with defaults");
        Ok(Self::default())
    }

    /// Resolve `$VAR` references in provider api keys against the
    /// environment.
    pub fn resolve_api_keys(&mut self) -> Result<()> {
        for provider in &mut self.providers {
            if let Some(var) = provider.api_key.strip_prefix('$') {
                provider.api_key = std::env::var(var).map_err(|_| {
                    GatewayError::config(format!(
                        "Environment variable '{}' referenced by provider '{}' is not set",
                        var, provider.name
                    ))
                })?;
            }
        }
        Ok(())
    }
}

fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    // CWD
    paths.push(PathBuf::from("llm-bridge.toml"));

    // XDG / platform config dir
    if cfg!(target_os = "macos") {
        if let Some(home) = dirs_path() {
            paths.push(
                home.join("Library")
                    .join("Application Support")
                    .join("llm-bridge")
                    .join("config.toml"),
            );
        }
    } else {
        if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
            paths.push(PathBuf::from(xdg).join("llm-bridge").join("config.toml"));
        }
        if let Some(home) = dirs_path() {
            paths.push(home.join(".config").join("llm-bridge").join("config.toml"));
        }
    }

    // Home directory fallback
    if let Some(home) = dirs_path() {
        paths.push(home.join(".llm-bridge.toml"));
    }

    paths
}

fn dirs_path() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
