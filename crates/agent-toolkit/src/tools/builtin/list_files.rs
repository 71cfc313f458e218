//! Directory listing tools

use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use std::path::Path;
use walkdir::WalkDir;

use crate::tools::{required_str, ParameterProperty, ParameterSchema, Tool, ToolContext, ToolOutput};

/// Collect file paths under `dir`, sorted, as they would be addressed by the
/// model (the directory argument joined with the relative path).
fn collect_files(
    dir: &Path,
    shown_as: &str,
    recursive: bool,
    filter: impl Fn(&str) -> bool,
) -> Result<Vec<String>> {
    let max_depth = if recursive { usize::MAX } else { 1 };
    let mut files = Vec::new();

    for entry in WalkDir::new(dir).min_depth(1).max_depth(max_depth).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let file_name = entry.file_name().to_string_lossy();
        if !filter(&*file_name) {
            continue;
        }
        let relative = entry.path().strip_prefix(dir).unwrap_or(entry.path());
        files.push(Path::new(shown_as).join(relative).display().to_string());
    }

    Ok(files)
}

fn render(files: Vec<String>, ctx: &ToolContext) -> ToolOutput {
    let json = serde_json::to_string_pretty(&files).unwrap_or_else(|_| files.join("\n"));
    ToolOutput::success(ctx.truncate(json))
}

fn recursive_flag(args: &Value) -> bool {
    args.get("recursive").and_then(Value::as_bool).unwrap_or(false)
}

/// Tool listing the files of a directory
pub struct ListFilesTool;

#[async_trait]
impl Tool for ListFilesTool {
    fn name(&self) -> &str {
        "list_files"
    }

    fn description(&self) -> &str {
        "List all files in a directory, optionally including subdirectories. Returns a JSON array of paths."
    }

    fn parameters_schema(&self) -> ParameterSchema {
        ParameterSchema::new()
            .with_required("directory", ParameterProperty::string("The path to the directory"))
            .with_property(
                "recursive",
                ParameterProperty::boolean("If true, lists files in subdirectories as well").with_default(Value::Bool(false)),
            )
    }

    async fn execute(&self, args: &Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let directory = required_str(args, "directory")?;
        let path = ctx.resolve_path(directory);

        if !path.is_dir() {
            return Ok(ToolOutput::error(format!("Directory '{}' not found.", directory)));
        }

        match collect_files(&path, directory, recursive_flag(args), |_| true) {
            Ok(files) => Ok(render(files, ctx)),
            Err(e) => Ok(ToolOutput::error(format!(
                "Error listing files in '{}': {}",
                directory, e
            ))),
        }
    }
}

/// Tool listing the files whose name matches a regex
pub struct ListFilesByPatternTool;

#[async_trait]
impl Tool for ListFilesByPatternTool {
    fn name(&self) -> &str {
        "list_files_by_pattern"
    }

    fn description(&self) -> &str {
        "List files in a directory whose file name matches a regular expression. Returns a JSON array of paths."
    }

    fn parameters_schema(&self) -> ParameterSchema {
        ParameterSchema::new()
            .with_required("directory", ParameterProperty::string("The path to the directory"))
            .with_required("pattern", ParameterProperty::string("Regular expression matched against file names, e.g. '\\.rs$'"))
            .with_property(
                "recursive",
                ParameterProperty::boolean("If true, searches subdirectories as well").with_default(Value::Bool(false)),
            )
    }

    async fn execute(&self, args: &Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let directory = required_str(args, "directory")?;
        let pattern = required_str(args, "pattern")?;
        let path = ctx.resolve_path(directory);

        let regex = match Regex::new(pattern) {
            Ok(r) => r,
            Err(e) => return Ok(ToolOutput::error(format!("Invalid pattern '{}': {}", pattern, e))),
        };

        if !path.is_dir() {
            return Ok(ToolOutput::error(format!("Directory '{}' not found.", directory)));
        }

        match collect_files(&path, directory, recursive_flag(args), |name| regex.is_match(name)) {
            Ok(files) => Ok(render(files, ctx)),
            Err(e) => Ok(ToolOutput::error(format!(
                "Error listing files by pattern in '{}': {}",
                directory, e
            ))),
        }
    }
}
