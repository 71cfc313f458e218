//! Shell command execution tool

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::process::Stdio;
use tokio::process::Command;
use tokio::time::{timeout, Duration};

use crate::tools::{required_str, ParameterProperty, ParameterSchema, Tool, ToolContext, ToolOutput};

/// Tool for executing shell commands
pub struct ShellCommandTool;

#[async_trait]
impl Tool for ShellCommandTool {
    fn name(&self) -> &str {
        "execute_shell_command"
    }

    fn description(&self) -> &str {
        "Execute a shell command and return its stdout, stderr and exit code."
    }

    fn parameters_schema(&self) -> ParameterSchema {
        ParameterSchema::new()
            .with_required("command", ParameterProperty::string("The shell command to execute"))
            .with_property(
                "working_directory",
                ParameterProperty::string("Directory to run the command in (default: current directory)"),
            )
    }

    async fn execute(&self, args: &Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let command = required_str(args, "command")?;

        let working_dir = args
            .get("working_directory")
            .and_then(|v| v.as_str())
            .map(|p| ctx.resolve_path(p))
            .unwrap_or_else(|| ctx.working_dir.clone());

        if !working_dir.is_dir() {
            return Ok(ToolOutput::error(format!(
                "Directory '{}' not found.",
                working_dir.display()
            )));
        }

        let (shell, shell_arg) = if cfg!(target_os = "windows") {
            ("cmd", "/C")
        } else {
            ("sh", "-c")
        };

        let mut cmd = Command::new(shell);
        cmd.arg(shell_arg)
            .arg(command)
            .current_dir(&working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let timeout_secs = ctx.command_timeout_secs;
        let result = timeout(Duration::from_secs(timeout_secs), cmd.output()).await;

        match result {
            Ok(Ok(output)) => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                let stderr = String::from_utf8_lossy(&output.stderr);
                let code = output
                    .status
                    .code()
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "unknown".to_string());

                let mut report = format!("exit code: {}\n", code);
                if !stdout.is_empty() {
                    report.push_str("--- stdout ---\n");
                    report.push_str(&stdout);
                    if !stdout.ends_with('\n') {
                        report.push('\n');
                    }
                }
                if !stderr.is_empty() {
                    report.push_str("--- stderr ---\n");
                    report.push_str(&stderr);
                }
                let report = ctx.truncate(report);

                if output.status.success() {
                    Ok(ToolOutput::success(report))
                } else {
                    Ok(ToolOutput::error(report))
                }
            }
            Ok(Err(e)) => Ok(ToolOutput::error(format!("Failed to execute command: {}", e))),
            Err(_) => Ok(ToolOutput::error(format!(
                "Command timed out after {} seconds",
                timeout_secs
            ))),
        }
    }
}
