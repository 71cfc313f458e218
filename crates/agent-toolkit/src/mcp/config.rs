//! MCP server configuration parsing
//!
//! Servers are declared in a JSON file in the common `mcpServers` layout:
//!
//! ```json
//! {
//!   "mcpServers": {
//!     "files": {
//!       "command": "npx",
//!       "args": ["-y", "@modelcontextprotocol/server-filesystem", "./"],
//!       "env": { "TOKEN": "${MY_TOKEN}" },
//!       "disabled": false
//!     }
//!   }
//! }
//! ```

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

/// Configuration for an MCP server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpServerConfig {
    /// Unique name for this server (the key in `mcpServers`, used in tool prefixes)
    #[serde(skip)]
    pub name: String,
    /// Command to run the server
    pub command: String,
    /// Arguments to pass to the command
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment variables (supports ${VAR} expansion)
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Working directory for the server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
    /// Disabled servers are never started
    #[serde(default)]
    pub disabled: bool,
    /// Expose tools as `<server>_<tool>` rather than the raw tool name
    #[serde(default = "default_prefix_tools", alias = "prefix_tools")]
    pub prefix_tools: bool,
    /// Timeout for server operations in seconds
    #[serde(default = "default_timeout", alias = "timeout_secs")]
    pub timeout_secs: u64,
}

fn default_prefix_tools() -> bool {
    true
}

fn default_timeout() -> u64 {
    30
}

impl McpServerConfig {
    /// Create a new server config with just name and command
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args: Vec::new(),
            env: HashMap::new(),
            cwd: None,
            disabled: false,
            prefix_tools: true,
            timeout_secs: default_timeout(),
        }
    }

    /// Add arguments
    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Add an environment variable
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set working directory
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn with_prefix_tools(mut self, prefix: bool) -> Self {
        self.prefix_tools = prefix;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.disabled = true;
        self
    }

    /// Environment with `${VAR}` references resolved
    pub fn expanded_env(&self) -> Result<HashMap<String, String>> {
        self.env
            .iter()
            .map(|(k, v)| Ok((k.clone(), expand_env_string(v)?)))
            .collect()
    }

    /// Name the model sees for one of this server's tools
    pub fn exposed_name(&self, tool: &str) -> String {
        if self.prefix_tools {
            format!("{}_{}", self.name, tool)
        } else {
            tool.to_string()
        }
    }
}

/// Expand ${VAR} patterns in a string using environment variables
pub fn expand_env_string(s: &str) -> Result<String> {
    let re = Regex::new(r"\$\{([^}]+)\}")?;
    let mut result = s.to_string();

    for cap in re.captures_iter(s) {
        let var_name = &cap[1];
        let var_value = std::env::var(var_name)
            .with_context(|| format!("Environment variable {} not set", var_name))?;
        result = result.replace(&cap[0], &var_value);
    }

    Ok(result)
}

#[derive(Debug, Default, Deserialize)]
struct McpConfigFile {
    #[serde(default, rename = "mcpServers")]
    mcp_servers: BTreeMap<String, McpServerConfig>,
}

/// The set of configured servers, ordered by name
#[derive(Debug, Clone, Default)]
pub struct McpConfig {
    pub servers: Vec<McpServerConfig>,
}

impl McpConfig {
    /// Parse a `mcpServers` JSON document
    pub fn from_json(json: &str) -> Result<Self> {
        let file: McpConfigFile =
            serde_json::from_str(json).context("Failed to parse MCP server configuration")?;

        let servers = file
            .mcp_servers
            .into_iter()
            .map(|(name, mut server)| {
                server.name = name;
                server
            })
            .collect();

        Ok(Self { servers })
    }

    /// Load from a file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read MCP config from {}", path.display()))?;
        Self::from_json(&content).with_context(|| format!("Invalid MCP config {}", path.display()))
    }

    /// Load from a file, treating a missing file as "no servers"
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Servers that will actually be started
    pub fn enabled(&self) -> impl Iterator<Item = &McpServerConfig> {
        self.servers.iter().filter(|s| !s.disabled)
    }
}
