//! File write tool

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::fs;

use crate::tools::{required_str, ParameterProperty, ParameterSchema, Tool, ToolContext, ToolOutput};

/// Tool for writing file contents
pub struct WriteFileTool;

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file. Creates the file if it doesn't exist, overwrites if it does. Creates parent directories as needed."
    }

    fn parameters_schema(&self) -> ParameterSchema {
        ParameterSchema::new()
            .with_required("filepath", ParameterProperty::string("The path to write to (absolute or relative)"))
            .with_required("content", ParameterProperty::string("The content to write to the file"))
    }

    async fn execute(&self, args: &Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let filepath = required_str(args, "filepath")?;
        let content = required_str(args, "content")?;
        let path = ctx.resolve_path(filepath);

        if let Some(parent) = path.parent() {
            if !parent.exists() {
                if let Err(e) = fs::create_dir_all(parent) {
                    return Ok(ToolOutput::error(format!("Failed to create directories: {}", e)));
                }
            }
        }

        match fs::write(&path, content) {
            Ok(()) => Ok(ToolOutput::success(format!(
                "File '{}' written successfully ({} bytes).",
                filepath,
                content.len()
            ))),
            Err(e) => Ok(ToolOutput::error(format!(
                "Error writing to file '{}': {}",
                filepath, e
            ))),
        }
    }
}
