//! MCP (Model Context Protocol) client support
//!
//! This module provides integration with MCP servers, enabling the use of
//! external tools through the Model Context Protocol.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                     McpManager                          │
//! │  - Starts and stops servers                             │
//! │  - Merges tool listings, rejects name collisions        │
//! │  - Routes calls to the owning server                    │
//! └─────────────────┬───────────────────────────────────────┘
//!                   │
//!          ┌────────┴────────┐
//!          │                 │
//!          ▼                 ▼
//! ┌─────────────────┐ ┌─────────────────┐
//! │  McpClient      │ │  McpClient      │
//! │  (github)       │ │  (filesystem)   │
//! └────────┬────────┘ └────────┬────────┘
//!          │                   │
//!          ▼                   ▼
//! ┌─────────────────┐ ┌─────────────────┐
//! │  StdioTransport │ │  StdioTransport │
//! │  + reader task  │ │  + reader task  │
//! └────────┬────────┘ └────────┬────────┘
//!          │                   │
//!          ▼                   ▼
//! ┌─────────────────┐ ┌─────────────────┐
//! │  MCP Server     │ │  MCP Server     │
//! │  (npx github)   │ │  (npx fs)       │
//! └─────────────────┘ └─────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use agent_toolkit::mcp::{McpConfig, McpManager};
//!
//! let config = McpConfig::load_or_default("mcp_config.json")?;
//! let mut manager = McpManager::new();
//! let failed = manager.start_all(&config.servers).await;
//!
//! let mut registry = create_default_registry()?;
//! manager.register_tools(&mut registry).await?;
//!
//! // ... run the agent ...
//!
//! manager.stop_all().await?;
//! ```

pub mod client;
pub mod config;
pub mod lifecycle;
pub mod tools;
pub mod transport;

// Re-exports
pub use client::{CallToolResult, McpClient, McpToolInfo};
pub use config::{McpConfig, McpServerConfig};
pub use lifecycle::{McpManager, ServerState};
pub use tools::DiscoveredTool;
pub use transport::{McpTransport, StdioTransport, TransportError};
