//! Bridging MCP tool listings and results into the agent's tool model

use llm_core::ToolDefinition;
use serde_json::{json, Value};

use super::client::{CallToolResult, McpToolInfo};
use super::config::McpServerConfig;
use crate::tools::ToolOutput;

/// A server tool as it will be registered
#[derive(Debug, Clone)]
pub struct DiscoveredTool {
    /// Owning server
    pub server: String,
    /// Name the server knows the tool by
    pub original_name: String,
    /// Definition under the exposed name
    pub definition: ToolDefinition,
}

impl DiscoveredTool {
    pub fn from_info(config: &McpServerConfig, info: McpToolInfo) -> Self {
        let exposed = config.exposed_name(&info.name);
        let description = info
            .description
            .filter(|d| !d.trim().is_empty())
            .unwrap_or_else(|| format!("MCP tool '{}' from server '{}'", info.name, config.name));

        Self {
            server: config.name.clone(),
            definition: ToolDefinition::function(exposed, description, normalize_schema(info.input_schema)),
            original_name: info.name,
        }
    }

    pub fn exposed_name(&self) -> &str {
        &self.definition.function.name
    }
}

/// Keep the server's schema as-is (unknown keywords included), only making
/// sure it is an object schema the backends accept
fn normalize_schema(schema: Value) -> Value {
    match schema {
        Value::Object(mut map) => {
            map.entry("type").or_insert_with(|| json!("object"));
            map.entry("properties").or_insert_with(|| json!({}));
            Value::Object(map)
        }
        _ => json!({"type": "object", "properties": {}}),
    }
}

/// Flatten MCP content blocks into the text fed back to the model
pub fn call_result_to_output(result: &CallToolResult) -> ToolOutput {
    let mut parts = Vec::new();

    for content in &result.content {
        match content.content_type.as_str() {
            "image" | "audio" => parts.push(format!(
                "[{} content: {}]",
                content.content_type,
                content.mime_type.as_deref().unwrap_or("unknown type")
            )),
            "resource" => {
                if let Some(resource) = &content.resource {
                    match &resource.text {
                        Some(text) => parts.push(format!("[Resource: {}]\n{}", resource.uri, text)),
                        None => parts.push(format!("[Resource: {}]", resource.uri)),
                    }
                }
            }
            // text and anything unrecognised that still carries text
            _ => {
                if let Some(text) = &content.text {
                    parts.push(text.clone());
                }
            }
        }
    }

    let output = parts.join("\n");
    if result.is_error {
        ToolOutput::error(output)
    } else {
        ToolOutput::success(output)
    }
}
