//! File read tool

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::fs;

use crate::tools::{required_str, ParameterProperty, ParameterSchema, Tool, ToolContext, ToolOutput};

/// Tool for reading file contents
pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read the contents of a text file and return it verbatim."
    }

    fn parameters_schema(&self) -> ParameterSchema {
        ParameterSchema::new().with_required(
            "filepath",
            ParameterProperty::string("The path to the file (absolute or relative to the working directory)"),
        )
    }

    async fn execute(&self, args: &Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let filepath = required_str(args, "filepath")?;
        let path = ctx.resolve_path(filepath);

        if !path.exists() {
            return Ok(ToolOutput::error(format!("File '{}' not found.", filepath)));
        }

        if !path.is_file() {
            return Ok(ToolOutput::error(format!("'{}' is not a file.", filepath)));
        }

        match fs::read_to_string(&path) {
            Ok(content) => Ok(ToolOutput::success(ctx.truncate(content))),
            Err(e) => Ok(ToolOutput::error(format!(
                "Error reading file '{}': {}",
                filepath, e
            ))),
        }
    }
}
