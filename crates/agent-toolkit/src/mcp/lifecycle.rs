//! MCP server lifecycle management
//!
//! Handles starting and stopping MCP server processes, merging their tool
//! listings into one namespace and routing calls back to the owning server.

use super::client::McpClient;
use super::config::McpServerConfig;
use super::tools::{call_result_to_output, DiscoveredTool};
use crate::error::AgentError;
use crate::tools::registry::ToolRegistry;
use crate::tools::ToolOutput;
use llm_core::ToolDefinition;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info, warn};

/// State of an MCP server
#[derive(Debug, Clone, PartialEq)]
pub enum ServerState {
    /// Server is running and initialized
    Running,
    /// Server was stopped or its process went away
    Stopped,
    /// Server failed to start
    Failed(String),
}

/// A started server
struct McpServerHandle {
    config: McpServerConfig,
    client: McpClient,
}

/// Manager for MCP server lifecycle
#[derive(Default)]
pub struct McpManager {
    /// Started servers, ordered by name
    servers: BTreeMap<String, McpServerHandle>,
    /// Start failures by server name
    failures: BTreeMap<String, String>,
    /// Exposed tool name -> (server, original tool name). Only servers that
    /// are still running have entries.
    routes: RwLock<HashMap<String, (String, String)>>,
}

impl McpManager {
    /// Create a new MCP manager
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a single MCP server
    pub async fn start_server(&mut self, config: McpServerConfig) -> Result<(), AgentError> {
        let name = config.name.clone();
        info!(server = %name, command = %config.command, "Starting MCP server");

        match McpClient::start(&config).await {
            Ok(client) => {
                self.failures.remove(&name);
                self.servers.insert(name, McpServerHandle { config, client });
                Ok(())
            }
            Err(e) => {
                self.failures.insert(name, e.to_string());
                Err(e)
            }
        }
    }

    /// Start every enabled server. Failures are logged and skipped; the
    /// names of the servers that failed are returned.
    pub async fn start_all(&mut self, configs: &[McpServerConfig]) -> Vec<String> {
        let mut failed = Vec::new();

        for config in configs {
            if config.disabled {
                debug!(server = %config.name, "Skipping disabled MCP server");
                continue;
            }

            if let Err(e) = self.start_server(config.clone()).await {
                warn!(server = %config.name, error = %e, "Failed to start MCP server");
                failed.push(config.name.clone());
            }
        }

        failed
    }

    /// Collect the tools of every running server under their exposed names.
    ///
    /// A server whose listing fails contributes nothing. Two servers exposing
    /// the same name is a configuration error.
    pub async fn discover_tools(&mut self) -> Result<Vec<DiscoveredTool>, AgentError> {
        let mut discovered: Vec<DiscoveredTool> = Vec::new();
        let mut routes: HashMap<String, (String, String)> = HashMap::new();

        for (name, handle) in &self.servers {
            if !handle.client.is_connected() {
                continue;
            }

            let tools = match handle.client.list_tools().await {
                Ok(tools) => tools,
                Err(e) => {
                    warn!(server = %name, error = %e, "Failed to list tools from MCP server");
                    continue;
                }
            };
            debug!(server = %name, count = tools.len(), "Discovered MCP tools");

            for info in tools {
                let tool = DiscoveredTool::from_info(&handle.config, info);
                let exposed = tool.exposed_name().to_string();

                if let Some((owner, _)) = routes.get(&exposed) {
                    return Err(AgentError::DuplicateTool {
                        name: exposed,
                        existing: format!("mcp:{}", owner),
                        incoming: format!("mcp:{}", name),
                    });
                }

                routes.insert(exposed, (tool.server.clone(), tool.original_name.clone()));
                discovered.push(tool);
            }
        }

        *self.routes.write() = routes;
        Ok(discovered)
    }

    /// Definitions of every server tool under its exposed name
    pub async fn tool_definitions(&mut self) -> Result<Vec<ToolDefinition>, AgentError> {
        Ok(self
            .discover_tools()
            .await?
            .into_iter()
            .map(|tool| tool.definition)
            .collect())
    }

    /// Discover tools and add them to `registry`. A name already taken by a
    /// local tool fails the whole registration.
    pub async fn register_tools(&mut self, registry: &mut ToolRegistry) -> Result<usize, AgentError> {
        let tools = self.discover_tools().await?;
        let count = tools.len();

        for tool in tools {
            registry.register_mcp(tool.definition, tool.server, tool.original_name)?;
        }

        info!(count, "Registered MCP tools");
        Ok(count)
    }

    /// Call a tool by its exposed name. A tool whose server has gone away
    /// is unknown.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolOutput, AgentError> {
        let (server, original) = self
            .routes
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| AgentError::UnknownTool(name.to_string()))?;

        if !self.is_running(&server) {
            self.forget_server_tools(&server);
            return Err(AgentError::UnknownTool(name.to_string()));
        }

        self.call_server_tool(&server, &original, arguments).await
    }

    /// Call a tool on a specific server by the name the server uses
    pub async fn call_server_tool(
        &self,
        server: &str,
        tool: &str,
        arguments: Value,
    ) -> Result<ToolOutput, AgentError> {
        let handle = match self.servers.get(server) {
            Some(handle) if handle.client.is_connected() => handle,
            Some(_) => {
                warn!(%server, %tool, "MCP server is no longer running");
                self.forget_server_tools(server);
                return Err(AgentError::UnknownTool(format!(
                    "{} (server '{}' is not running)",
                    tool, server
                )));
            }
            None => {
                return Err(AgentError::UnknownTool(format!(
                    "{} (server '{}' is not running)",
                    tool, server
                )))
            }
        };

        debug!(%server, %tool, "Calling MCP tool");
        let result = handle.client.call_tool(tool, arguments).await?;
        Ok(call_result_to_output(&result))
    }

    /// Stop one server and drop its tools
    pub async fn stop_server(&self, name: &str) -> anyhow::Result<()> {
        let handle = self
            .servers
            .get(name)
            .ok_or_else(|| anyhow::anyhow!("MCP server '{}' is not running", name))?;

        self.forget_server_tools(name);
        handle.client.stop().await
    }

    /// Stop every server, continuing past failures and reporting them
    /// together
    pub async fn stop_all(&self) -> anyhow::Result<()> {
        let mut errors = Vec::new();
        self.routes.write().clear();

        for (name, handle) in &self.servers {
            if let Err(e) = handle.client.stop().await {
                warn!(server = %name, error = %e, "Error stopping MCP server");
                errors.push(format!("{}: {:#}", name, e));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            anyhow::bail!("Failed to stop MCP servers: {}", errors.join("; "))
        }
    }

    fn is_running(&self, server: &str) -> bool {
        self.servers
            .get(server)
            .map_or(false, |h| h.client.is_connected())
    }

    fn forget_server_tools(&self, server: &str) {
        let mut routes = self.routes.write();
        let before = routes.len();
        routes.retain(|_, route| route.0 != server);
        if routes.len() != before {
            debug!(%server, removed = before - routes.len(), "Dropped tools of stopped MCP server");
        }
    }

    /// Exposed names of the tools currently reachable
    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.routes.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Get all running server names
    pub fn running_servers(&self) -> Vec<&str> {
        self.servers
            .iter()
            .filter(|(_, h)| h.client.is_connected())
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Get server state
    pub fn server_state(&self, name: &str) -> Option<ServerState> {
        if let Some(handle) = self.servers.get(name) {
            return Some(if handle.client.is_connected() {
                ServerState::Running
            } else {
                ServerState::Stopped
            });
        }
        self.failures
            .get(name)
            .map(|reason| ServerState::Failed(reason.clone()))
    }
}

impl std::fmt::Debug for McpManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpManager")
            .field("servers", &self.servers.keys().collect::<Vec<_>>())
            .field("failures", &self.failures)
            .field("tools", &self.routes.read().len())
            .finish()
    }
}

impl Drop for McpManager {
    fn drop(&mut self) {
        // No async cleanup here; children are spawned kill-on-drop
        if !self.servers.is_empty() {
            debug!("McpManager dropping with {} servers", self.servers.len());
        }
    }
}
