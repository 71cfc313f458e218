//! Tool framework for agent-based execution
//!
//! Local tools implement [`Tool`]; MCP tools are registered by name and
//! dispatched through the MCP manager. Both advertise the same JSON-Schema
//! shaped definition to the model.

pub mod builtin;
pub mod registry;
pub mod router;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use llm_core::ToolDefinition;

/// Output of one tool invocation, as fed back to the model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub content: String,
    pub is_error: bool,
}

impl ToolOutput {
    /// Create a successful result
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    /// Create a failed result
    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
        }
    }

    /// Text sent back to the model; errors are labelled so the model can tell
    pub fn to_message_content(&self) -> String {
        if self.is_error {
            format!("Error: {}", self.content)
        } else {
            self.content.clone()
        }
    }
}

/// Context provided to tools during execution
#[derive(Debug, Clone)]
pub struct ToolContext {
    /// Base for relative paths
    pub working_dir: PathBuf,
    /// Maximum output length (truncate if exceeded)
    pub max_output_len: usize,
    /// Default timeout for shell commands in seconds
    pub command_timeout_secs: u64,
    /// Default timeout for HTTP requests in seconds
    pub http_timeout_secs: u64,
    /// Base URL of the question-answering web service
    pub web_api_base: Option<String>,
}

impl Default for ToolContext {
    fn default() -> Self {
        Self {
            working_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            max_output_len: 50000,
            command_timeout_secs: 30,
            http_timeout_secs: 60,
            web_api_base: None,
        }
    }
}

impl ToolContext {
    /// Create a new context with the given working directory
    pub fn new(working_dir: PathBuf) -> Self {
        Self {
            working_dir,
            ..Default::default()
        }
    }

    /// Set command timeout
    pub fn with_command_timeout(mut self, secs: u64) -> Self {
        self.command_timeout_secs = secs;
        self
    }

    /// Set HTTP timeout
    pub fn with_http_timeout(mut self, secs: u64) -> Self {
        self.http_timeout_secs = secs;
        self
    }

    pub fn with_web_api_base(mut self, base: Option<String>) -> Self {
        self.web_api_base = base.filter(|b| !b.trim().is_empty());
        self
    }

    /// Resolve a tool-supplied path against the working directory
    pub fn resolve_path(&self, path: &str) -> PathBuf {
        let p = Path::new(path);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.working_dir.join(p)
        }
    }

    /// Cut output at `max_output_len` bytes, on a char boundary
    pub fn truncate(&self, output: String) -> String {
        if output.len() <= self.max_output_len {
            return output;
        }
        let mut end = self.max_output_len;
        while !output.is_char_boundary(end) {
            end -= 1;
        }
        format!(
            "{}\n\n[Output truncated at {} characters]",
            &output[..end],
            self.max_output_len
        )
    }
}

/// Schema for a tool parameter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterProperty {
    /// Parameter type (string, number, boolean, array, object)
    #[serde(rename = "type")]
    pub param_type: String,
    /// Parameter description
    pub description: String,
    /// Enum values if applicable
    #[serde(rename = "enum", skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<String>>,
    /// Default value if applicable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl ParameterProperty {
    fn typed(param_type: &str, description: impl Into<String>) -> Self {
        Self {
            param_type: param_type.to_string(),
            description: description.into(),
            enum_values: None,
            default: None,
        }
    }

    pub fn string(description: impl Into<String>) -> Self {
        Self::typed("string", description)
    }

    pub fn number(description: impl Into<String>) -> Self {
        Self::typed("number", description)
    }

    pub fn boolean(description: impl Into<String>) -> Self {
        Self::typed("boolean", description)
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn with_enum(mut self, values: Vec<String>) -> Self {
        self.enum_values = Some(values);
        self
    }
}

/// Schema describing tool parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterSchema {
    /// Type is always "object"
    #[serde(rename = "type")]
    pub schema_type: String,
    /// Parameter properties
    pub properties: BTreeMap<String, ParameterProperty>,
    /// Required parameter names
    #[serde(default)]
    pub required: Vec<String>,
}

impl ParameterSchema {
    pub fn new() -> Self {
        Self {
            schema_type: "object".to_string(),
            properties: BTreeMap::new(),
            required: Vec::new(),
        }
    }

    pub fn with_property(mut self, name: impl Into<String>, prop: ParameterProperty) -> Self {
        self.properties.insert(name.into(), prop);
        self
    }

    pub fn with_required(mut self, name: impl Into<String>, prop: ParameterProperty) -> Self {
        let name = name.into();
        self.properties.insert(name.clone(), prop);
        self.required.push(name);
        self
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| serde_json::json!({"type": "object"}))
    }
}

impl Default for ParameterSchema {
    fn default() -> Self {
        Self::new()
    }
}

/// Check call arguments against a JSON-Schema object definition.
///
/// Covers what models actually get wrong: a non-object payload, missing
/// required keys and mismatched primitive types. Keywords beyond `type`,
/// `properties` and `required` are not enforced.
pub fn validate_arguments(schema: &Value, args: &Value) -> std::result::Result<(), String> {
    let Some(map) = args.as_object() else {
        return Err(format!("arguments must be a JSON object, got {}", json_type(args)));
    };

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for key in required.iter().filter_map(Value::as_str) {
            if map.get(key).map_or(true, Value::is_null) {
                return Err(format!("missing required parameter '{}'", key));
            }
        }
    }

    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return Ok(());
    };

    for (key, value) in map {
        let Some(expected) = properties.get(key).and_then(|p| p.get("type")) else {
            continue;
        };
        // Optional parameters explicitly sent as null are treated as absent
        if value.is_null() {
            continue;
        }
        let accepted: Vec<&str> = match expected {
            Value::String(t) => vec![t.as_str()],
            Value::Array(ts) => ts.iter().filter_map(Value::as_str).collect(),
            _ => continue,
        };
        if !accepted.iter().any(|t| type_matches(t, value)) {
            return Err(format!(
                "parameter '{}' must be {}, got {}",
                key,
                accepted.join(" or "),
                json_type(value)
            ));
        }
    }

    Ok(())
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "null" => value.is_null(),
        // Unknown type keywords are not ours to reject
        _ => true,
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Read a required string argument
pub(crate) fn required_str<'a>(args: &'a Value, key: &str) -> Result<&'a str> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow::anyhow!("Missing required parameter: {}", key))
}

/// The Tool trait that all local tools implement
#[async_trait]
pub trait Tool: Send + Sync {
    /// Get the tool name
    fn name(&self) -> &str;

    /// Get a description of what the tool does
    fn description(&self) -> &str;

    /// Get the parameter schema
    fn parameters_schema(&self) -> ParameterSchema;

    /// Execute the tool with the given arguments. `Err` is reported to the
    /// model as an error result.
    async fn execute(&self, args: &Value, ctx: &ToolContext) -> Result<ToolOutput>;

    /// Convert to a tool definition for the LLM
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition::function(
            self.name(),
            self.description(),
            self.parameters_schema().to_value(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> Value {
        ParameterSchema::new()
            .with_required("filepath", ParameterProperty::string("Path"))
            .with_property("recursive", ParameterProperty::boolean("Recurse"))
            .to_value()
    }

    #[test]
    fn test_schema_shape() {
        let value = ParameterSchema::new()
            .with_required(
                "vendor",
                ParameterProperty::string("Vendor").with_enum(vec!["Perplexity".into()]),
            )
            .to_value();
        assert_eq!(value["type"], "object");
        assert_eq!(value["properties"]["vendor"]["enum"][0], "Perplexity");
        assert_eq!(value["required"], json!(["vendor"]));
    }

    #[test]
    fn test_validate_arguments() {
        let schema = schema();
        assert!(validate_arguments(&schema, &json!({"filepath": "a.txt"})).is_ok());
        assert!(validate_arguments(&schema, &json!({"filepath": "a", "recursive": null})).is_ok());

        let err = validate_arguments(&schema, &json!({})).unwrap_err();
        assert!(err.contains("filepath"));

        let err = validate_arguments(&schema, &json!({"filepath": 3})).unwrap_err();
        assert!(err.contains("must be string"));

        let err = validate_arguments(&schema, &json!("{not json")).unwrap_err();
        assert!(err.contains("JSON object"));
    }

    #[test]
    fn test_validate_type_union_and_unknown_keywords() {
        let schema = json!({
            "type": "object",
            "properties": {
                "count": {"type": ["integer", "string"], "minimum": 1},
                "mode": {"type": "custom"}
            }
        });
        assert!(validate_arguments(&schema, &json!({"count": 2, "mode": 5})).is_ok());
        assert!(validate_arguments(&schema, &json!({"count": "2"})).is_ok());
        assert!(validate_arguments(&schema, &json!({"count": 1.5})).is_err());
    }

    #[test]
    fn test_truncate_on_char_boundary() {
        let ctx = ToolContext {
            max_output_len: 4,
            ..Default::default()
        };
        let out = ctx.truncate("héllo".to_string());
        assert!(out.starts_with("hél"));
        assert!(out.contains("[Output truncated"));
        assert_eq!(ctx.truncate("abc".to_string()), "abc");
    }

    #[test]
    fn test_resolve_path() {
        let ctx = ToolContext::new(PathBuf::from("/work"));
        assert_eq!(ctx.resolve_path("a/b.txt"), PathBuf::from("/work/a/b.txt"));
        assert_eq!(ctx.resolve_path("/etc/hosts"), PathBuf::from("/etc/hosts"));
    }
}
