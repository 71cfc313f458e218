//! Backend configuration (agent.toml)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::backend::ChatBackend;
use crate::ollama::OllamaClient;
use crate::openai::OpenAiClient;

pub const CONFIG_FILE: &str = "agent.toml";

/// Which backend drives the conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Ollama,
    Openai,
}

impl std::str::FromStr for BackendKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "openai" => Ok(Self::Openai),
            other => anyhow::bail!("Unknown backend '{}' (expected ollama or openai)", other),
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ollama => write!(f, "ollama"),
            Self::Openai => write!(f, "openai"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub backend: BackendKind,
    pub ollama: OllamaConfig,
    pub openai: OpenAiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OllamaConfig {
    pub base_url: String,
    pub model: String,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "qwen3:4b".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAiConfig {
    pub api_base: String,
    pub api_key: Option<String>,
    pub model: String,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.openai.com/v1".to_string(),
            api_key: None,
            model: "gpt-4o-mini".to_string(),
        }
    }
}

impl Config {
    /// Load agent.toml if one is found, else defaults, then apply environment
    /// overrides
    pub fn load() -> Result<Self> {
        let mut config = match Self::find_config_path() {
            Some(path) => Self::load_from(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read {}", path.as_ref().display()))?;

        toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.as_ref().display()))
    }

    /// Find agent.toml by searching current directory and parents
    pub fn find_config_path() -> Option<PathBuf> {
        let mut current = std::env::current_dir().ok()?;

        for _ in 0..10 {
            let candidate = current.join(CONFIG_FILE);
            if candidate.exists() {
                return Some(candidate);
            }
            if !current.pop() {
                break;
            }
        }

        None
    }

    /// Apply overrides from a variable lookup (the process environment in
    /// production)
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(agent) = get("CURRENT_AGENT") {
            self.backend = agent.parse()?;
        }
        if let Some(url) = get("OLLAMA_BASE_URL").or_else(|| get("OLLAMA_HOST")) {
            self.ollama.base_url = normalize_host(&url);
        }
        if let Some(model) = get("OLLAMA_MODEL") {
            self.ollama.model = model;
        }
        if let Some(base) = get("OPENAI_API_BASE") {
            self.openai.api_base = base;
        }
        if let Some(key) = get("OPENAI_API_KEY") {
            self.openai.api_key = Some(key);
        }
        if let Some(model) = get("OPENAI_MODEL") {
            self.openai.model = model;
        }
        Ok(())
    }

    /// Model name of the selected backend
    pub fn model(&self) -> &str {
        match self.backend {
            BackendKind::Ollama => &self.ollama.model,
            BackendKind::Openai => &self.openai.model,
        }
    }

    /// Override the model of the selected backend
    pub fn set_model(&mut self, model: impl Into<String>) {
        match self.backend {
            BackendKind::Ollama => self.ollama.model = model.into(),
            BackendKind::Openai => self.openai.model = model.into(),
        }
    }

    /// Construct the selected backend
    pub fn build_backend(&self) -> Result<Arc<dyn ChatBackend>> {
        let backend: Arc<dyn ChatBackend> = match self.backend {
            BackendKind::Ollama => Arc::new(OllamaClient::new(
                &self.ollama.base_url,
                &self.ollama.model,
            )?),
            BackendKind::Openai => Arc::new(OpenAiClient::new(
                &self.openai.api_base,
                self.openai.api_key.clone(),
                &self.openai.model,
            )?),
        };
        Ok(backend)
    }
}

/// OLLAMA_HOST is commonly given as `host:port` without a scheme
fn normalize_host(value: &str) -> String {
    let value = value.trim().trim_end_matches('/');
    if value.starts_with("http://") || value.starts_with("https://") {
        value.to_string()
    } else {
        format!("http://{}", value)
    }
}
