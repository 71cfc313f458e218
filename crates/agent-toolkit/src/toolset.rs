//! Assembling the tool namespace for a run: built-in tools plus whatever the
//! configured MCP servers expose.

use std::sync::Arc;

use tracing::{info, warn};

use crate::error::AgentError;
use crate::mcp::{McpManager, McpServerConfig};
use crate::tools::builtin::create_default_registry;
use crate::tools::registry::ToolRegistry;
use crate::tools::router::ToolRouter;

/// A router over every available tool and the servers backing it
#[derive(Debug)]
pub struct Toolset {
    pub router: ToolRouter,
    pub mcp: Arc<McpManager>,
    /// Servers that were configured but failed to start
    pub failed_servers: Vec<String>,
}

impl Toolset {
    /// Start the MCP servers and merge their tools after the built-in ones.
    ///
    /// A name collision stops every started server and fails the whole
    /// setup, so no model call is ever made with an ambiguous namespace.
    pub async fn start(servers: &[McpServerConfig]) -> Result<Self, AgentError> {
        Self::start_with(create_default_registry()?, servers).await
    }

    /// Same as [`Toolset::start`] on top of a caller-built registry
    pub async fn start_with(mut registry: ToolRegistry, servers: &[McpServerConfig]) -> Result<Self, AgentError> {
        let mut manager = McpManager::new();
        let failed_servers = manager.start_all(servers).await;
        if !failed_servers.is_empty() {
            warn!(failed = ?failed_servers, "Some MCP servers failed to start");
        }

        if let Err(e) = manager.register_tools(&mut registry).await {
            if let Err(stop_err) = manager.stop_all().await {
                warn!(error = %stop_err, "Error stopping MCP servers after failed setup");
            }
            return Err(e);
        }

        info!(
            tools = registry.len(),
            servers = manager.running_servers().len(),
            "Tool namespace ready"
        );

        let mcp = Arc::new(manager);
        Ok(Self {
            router: ToolRouter::with_mcp(registry, Arc::clone(&mcp)),
            mcp,
            failed_servers,
        })
    }
}
