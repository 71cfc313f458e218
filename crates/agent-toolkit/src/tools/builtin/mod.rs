//! Built-in tools for the agent framework

mod ask_internet;
mod list_files;
mod mkdir;
mod read_file;
mod shell;
mod write_file;

pub use ask_internet::AskInternetTool;
pub use list_files::{ListFilesByPatternTool, ListFilesTool};
pub use mkdir::MkdirTool;
pub use read_file::ReadFileTool;
pub use shell::ShellCommandTool;
pub use write_file::WriteFileTool;

use super::registry::ToolRegistry;
use crate::error::AgentError;

/// Create a registry with all default tools
pub fn create_default_registry() -> Result<ToolRegistry, AgentError> {
    let mut registry = ToolRegistry::new();

    // Read-only
    registry.register_local(ListFilesTool)?;
    registry.register_local(ListFilesByPatternTool)?;
    registry.register_local(ReadFileTool)?;

    // Write/execute
    registry.register_local(WriteFileTool)?;
    registry.register_local(MkdirTool)?;
    registry.register_local(ShellCommandTool)?;

    // Network
    registry.register_local(AskInternetTool)?;

    Ok(registry)
}
