//! User configuration for the agent CLI
//!
//! Configuration file: ~/.config/local-agent-toolkit/config.toml (or platform
//! equivalent). Every key is optional.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::agent::{AgentConfig, DEFAULT_SYSTEM_PROMPT};
use crate::tools::ToolContext;

/// User configuration for the agent CLI
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UserConfig {
    #[serde(default)]
    pub agent: AgentSection,

    #[serde(default)]
    pub mcp: McpSection,

    #[serde(default)]
    pub tools: ToolsSection,
}

/// Agent loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSection {
    /// Maximum model calls per question
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    /// Stream responses from the backend
    #[serde(default = "default_true")]
    pub stream: bool,

    /// Run the tool calls of one turn concurrently
    #[serde(default)]
    pub parallel_tool_calls: bool,

    /// Where the transcript is written after each run
    #[serde(default = "default_messages_file")]
    pub messages_file: PathBuf,
}

/// MCP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpSection {
    /// JSON file declaring `mcpServers`
    #[serde(default = "default_mcp_config_path")]
    pub config_path: PathBuf,
}

/// Local tool settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsSection {
    /// Base URL of the question-answering web service
    #[serde(default)]
    pub web_api_base: Option<String>,

    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
}

fn default_max_iterations() -> usize {
    25
}

fn default_system_prompt() -> String {
    DEFAULT_SYSTEM_PROMPT.to_string()
}

fn default_true() -> bool {
    true
}

fn default_messages_file() -> PathBuf {
    PathBuf::from("messages.json")
}

fn default_mcp_config_path() -> PathBuf {
    PathBuf::from("mcp_config.json")
}

fn default_command_timeout() -> u64 {
    30
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            system_prompt: default_system_prompt(),
            stream: true,
            parallel_tool_calls: false,
            messages_file: default_messages_file(),
        }
    }
}

impl Default for McpSection {
    fn default() -> Self {
        Self {
            config_path: default_mcp_config_path(),
        }
    }
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            web_api_base: None,
            command_timeout_secs: default_command_timeout(),
        }
    }
}

impl UserConfig {
    /// Load user configuration from the default location, then apply
    /// environment overrides
    pub fn load() -> Result<Self> {
        let mut config = match Self::config_path() {
            Ok(path) if path.exists() => Self::load_from(&path)?,
            _ => Self::default(),
        };
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("Invalid config in {}", path.display()))?;
        Ok(config)
    }

    /// Reject settings the agent loop cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.agent.max_iterations == 0 {
            anyhow::bail!("max_iterations must be at least 1");
        }
        Ok(())
    }

    /// Get the configuration file path
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;

        Ok(config_dir.join("local-agent-toolkit").join("config.toml"))
    }

    /// `MAX_ITERATIONS` and `API_BASE_URL` win over the file
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(max) = get("MAX_ITERATIONS") {
            self.agent.max_iterations = max
                .trim()
                .parse()
                .with_context(|| format!("MAX_ITERATIONS must be a positive integer, got '{}'", max))?;
            self.validate()
                .with_context(|| format!("MAX_ITERATIONS must be a positive integer, got '{}'", max))?;
        }
        if let Some(base) = get("API_BASE_URL") {
            self.tools.web_api_base = Some(base);
        }
        Ok(())
    }

    /// Loop settings rooted at `working_dir`
    pub fn agent_config(&self, working_dir: PathBuf) -> AgentConfig {
        AgentConfig::new()
            .with_system_prompt(self.agent.system_prompt.clone())
            .with_max_iterations(self.agent.max_iterations)
            .with_stream(self.agent.stream)
            .with_parallel_tool_calls(self.agent.parallel_tool_calls)
            .with_working_dir(working_dir)
    }

    /// Tool context rooted at `working_dir`
    pub fn tool_context(&self, working_dir: PathBuf) -> ToolContext {
        ToolContext::new(working_dir)
            .with_command_timeout(self.tools.command_timeout_secs)
            .with_web_api_base(self.tools.web_api_base.clone())
    }
}
