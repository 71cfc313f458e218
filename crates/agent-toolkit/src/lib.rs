//! Tool-calling agent loop for local and cloud LLMs, with built-in tools and
//! tools served by MCP servers over stdio.

pub mod agent;
pub mod config;
pub mod conversation;
pub mod error;
pub mod mcp;
pub mod tools;
pub mod toolset;

pub use agent::{AgentConfig, AgentLoop, AgentOutcome, LoopStatus};
pub use conversation::Transcript;
pub use error::AgentError;
pub use toolset::Toolset;
