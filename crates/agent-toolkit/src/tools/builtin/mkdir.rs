use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::fs;

use crate::tools::{required_str, ParameterProperty, ParameterSchema, Tool, ToolContext, ToolOutput};

/// Create a directory and any missing parents
pub struct MkdirTool;

#[async_trait]
impl Tool for MkdirTool {
    fn name(&self) -> &str {
        "mkdir"
    }

    fn description(&self) -> &str {
        "Create a directory at the specified path, including missing parents. Succeeds if it already exists."
    }

    fn parameters_schema(&self) -> ParameterSchema {
        ParameterSchema::new()
            .with_required("path", ParameterProperty::string("The path of the directory to create"))
    }

    async fn execute(&self, args: &Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let raw = required_str(args, "path")?;
        let path = ctx.resolve_path(raw);

        if path.is_dir() {
            return Ok(ToolOutput::success(format!("Directory '{}' already exists.", raw)));
        }
        if path.exists() {
            return Ok(ToolOutput::error(format!(
                "Cannot create directory '{}': a file with that name exists.",
                raw
            )));
        }

        match fs::create_dir_all(&path) {
            Ok(()) => Ok(ToolOutput::success(format!("Directory '{}' created.", raw))),
            Err(e) => Ok(ToolOutput::error(format!(
                "Failed to create directory '{}': {}",
                raw, e
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_mkdir_nested_and_idempotent() {
        let dir = TempDir::new().unwrap();
        let ctx = ToolContext::new(dir.path().to_path_buf());
        let args = json!({"path": "a/b/c"});

        let first = MkdirTool.execute(&args, &ctx).await.unwrap();
        assert!(!first.is_error);
        assert!(dir.path().join("a/b/c").is_dir());

        let second = MkdirTool.execute(&args, &ctx).await.unwrap();
        assert!(!second.is_error);
        assert!(second.content.contains("already exists"));
    }

    #[tokio::test]
    async fn test_mkdir_over_existing_file_is_error() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("report"), "data").unwrap();
        let ctx = ToolContext::new(dir.path().to_path_buf());

        let result = MkdirTool.execute(&json!({"path": "report"}), &ctx).await.unwrap();
        assert!(result.is_error);
        assert!(result.content.contains("report"));
        assert_eq!(fs::read_to_string(dir.path().join("report")).unwrap(), "data");
    }
}
