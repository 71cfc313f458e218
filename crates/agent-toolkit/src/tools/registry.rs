//! Tool registry: the closed set of names the model may call

use std::collections::HashMap;
use std::sync::Arc;

use llm_core::ToolDefinition;

use super::Tool;
use crate::error::AgentError;

/// Where a registered name is dispatched to
#[derive(Clone)]
pub enum ToolHandler {
    /// In-process tool
    Local(Arc<dyn Tool>),
    /// Tool owned by a running MCP server, called by its unprefixed name
    Mcp {
        server: String,
        original_name: String,
    },
}

impl ToolHandler {
    /// Short provenance label used in logs and collision errors
    pub fn origin(&self) -> String {
        match self {
            ToolHandler::Local(_) => "local".to_string(),
            ToolHandler::Mcp { server, .. } => format!("mcp:{}", server),
        }
    }
}

impl std::fmt::Debug for ToolHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ToolHandler::Local(tool) => f.debug_tuple("Local").field(&tool.name()).finish(),
            ToolHandler::Mcp {
                server,
                original_name,
            } => f
                .debug_struct("Mcp")
                .field("server", server)
                .field("original_name", original_name)
                .finish(),
        }
    }
}

/// A name paired with its schema and handler
#[derive(Debug, Clone)]
pub struct RegisteredTool {
    pub definition: ToolDefinition,
    pub handler: ToolHandler,
}

impl RegisteredTool {
    pub fn name(&self) -> &str {
        &self.definition.function.name
    }
}

/// Registry of available tools, kept in registration order
#[derive(Debug, Default)]
pub struct ToolRegistry {
    tools: Vec<RegisteredTool>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a definition with its handler
    pub fn register(
        &mut self,
        definition: ToolDefinition,
        handler: ToolHandler,
    ) -> Result<(), AgentError> {
        let name = definition.function.name.clone();
        if let Some(&existing) = self.index.get(&name) {
            return Err(AgentError::DuplicateTool {
                name,
                existing: self.tools[existing].handler.origin(),
                incoming: handler.origin(),
            });
        }

        self.index.insert(name, self.tools.len());
        self.tools.push(RegisteredTool {
            definition,
            handler,
        });
        Ok(())
    }

    /// Register a local tool
    pub fn register_local<T: Tool + 'static>(&mut self, tool: T) -> Result<(), AgentError> {
        let tool: Arc<dyn Tool> = Arc::new(tool);
        self.register(tool.to_definition(), ToolHandler::Local(tool))
    }

    /// Register a tool served by an MCP server
    pub fn register_mcp(
        &mut self,
        definition: ToolDefinition,
        server: impl Into<String>,
        original_name: impl Into<String>,
    ) -> Result<(), AgentError> {
        self.register(
            definition,
            ToolHandler::Mcp {
                server: server.into(),
                original_name: original_name.into(),
            },
        )
    }

    /// Look up a tool by name
    pub fn resolve(&self, name: &str) -> Result<&RegisteredTool, AgentError> {
        self.index
            .get(name)
            .map(|&i| &self.tools[i])
            .ok_or_else(|| AgentError::UnknownTool(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Registered names, in registration order
    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    /// Tool definitions for the LLM API, in registration order
    pub fn schemas(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.definition.clone()).collect()
    }

    /// Number of registered tools
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
