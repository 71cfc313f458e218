//! Error kinds callers branch on. Everything else travels as `anyhow::Error`.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("MCP server '{server}' failed to start: {reason}")]
    ServerStart { server: String, reason: String },

    #[error("Protocol error from MCP server '{server}': {message}")]
    Protocol { server: String, message: String },

    #[error("MCP server '{server}' did not answer {method} within {secs}s")]
    Timeout {
        server: String,
        method: String,
        secs: u64,
    },

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Duplicate tool '{name}' (already provided by {existing}, now offered by {incoming})")]
    DuplicateTool {
        name: String,
        existing: String,
        incoming: String,
    },

    #[error("Invalid arguments for {tool}: {reason}")]
    InvalidArguments { tool: String, reason: String },

    #[error("Maximum iterations ({0}) exceeded")]
    MaxIterationsExceeded(usize),
}

impl AgentError {
    pub fn protocol(server: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Protocol {
            server: server.into(),
            message: message.into(),
        }
    }

    pub fn server_start(server: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ServerStart {
            server: server.into(),
            reason: reason.into(),
        }
    }
}
