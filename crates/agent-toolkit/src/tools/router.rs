//! Tool routing and dispatch

use std::sync::Arc;

use futures::future::join_all;
use llm_core::ToolCall;
use tracing::{debug, info, instrument, warn};

use super::registry::{ToolHandler, ToolRegistry};
use super::{validate_arguments, ToolContext, ToolOutput};
use crate::error::AgentError;
use crate::mcp::McpManager;

/// Result of routing a tool call
#[derive(Debug)]
pub enum RouteResult {
    /// Tool ran; the output may still report a tool-level failure
    Success(ToolOutput),
    /// Name is not in the registry
    NotFound(String),
    /// Arguments do not satisfy the tool's schema
    InvalidArguments(String),
    /// Implementation or transport failure
    Error(String),
}

impl RouteResult {
    /// Collapse into the output fed back to the model. Never fails.
    pub fn into_output(self) -> ToolOutput {
        match self {
            RouteResult::Success(output) => output,
            RouteResult::NotFound(name) => ToolOutput::error(AgentError::UnknownTool(name).to_string()),
            RouteResult::InvalidArguments(reason) => ToolOutput::error(reason),
            RouteResult::Error(e) => ToolOutput::error(e),
        }
    }
}

/// Router for dispatching tool calls
pub struct ToolRouter {
    registry: ToolRegistry,
    mcp: Option<Arc<McpManager>>,
}

impl ToolRouter {
    /// Router over local tools only
    pub fn new(registry: ToolRegistry) -> Self {
        Self {
            registry,
            mcp: None,
        }
    }

    /// Router that can also reach MCP servers
    pub fn with_mcp(registry: ToolRegistry, mcp: Arc<McpManager>) -> Self {
        Self {
            registry,
            mcp: Some(mcp),
        }
    }

    /// Route a single tool call
    #[instrument(skip(self, ctx), fields(tool = %tool_call.name(), id = %tool_call.id))]
    pub async fn route(&self, tool_call: &ToolCall, ctx: &ToolContext) -> RouteResult {
        let name = tool_call.name();
        let entry = match self.registry.resolve(name) {
            Ok(entry) => entry,
            Err(_) => {
                warn!(tool = %name, "Tool not found");
                return RouteResult::NotFound(name.to_string());
            }
        };

        let args = &tool_call.function.arguments;
        if let Err(reason) = validate_arguments(&entry.definition.function.parameters, args) {
            let err = AgentError::InvalidArguments {
                tool: name.to_string(),
                reason,
            };
            warn!(error = %err, "Rejected tool arguments");
            return RouteResult::InvalidArguments(err.to_string());
        }

        info!(tool = %name, origin = %entry.handler.origin(), "Executing tool");
        let result = match &entry.handler {
            ToolHandler::Local(tool) => tool.execute(args, ctx).await,
            ToolHandler::Mcp {
                server,
                original_name,
            } => match &self.mcp {
                Some(mcp) => match mcp.call_server_tool(server, original_name, args.clone()).await {
                    Err(AgentError::UnknownTool(detail)) => {
                        warn!(tool = %name, %detail, "MCP tool disappeared with its server");
                        return RouteResult::NotFound(name.to_string());
                    }
                    other => other.map_err(anyhow::Error::from),
                },
                None => Err(anyhow::anyhow!("No MCP manager available for server '{}'", server)),
            },
        };

        match result {
            Ok(output) => {
                if output.is_error {
                    warn!(tool = %name, "Tool reported an error");
                } else {
                    debug!(tool = %name, output_len = output.content.len(), "Tool executed successfully");
                }
                RouteResult::Success(output)
            }
            Err(e) => {
                warn!(tool = %name, error = %e, "Tool execution error");
                RouteResult::Error(format!("{:#}", e))
            }
        }
    }

    /// Route every call of a turn. Results come back in emitted order
    /// whether or not the calls ran concurrently.
    pub async fn route_all(
        &self,
        tool_calls: &[ToolCall],
        ctx: &ToolContext,
        parallel: bool,
    ) -> Vec<(String, RouteResult)> {
        if parallel {
            let results = join_all(tool_calls.iter().map(|call| self.route(call, ctx))).await;
            return tool_calls
                .iter()
                .map(|c| c.id.clone())
                .zip(results)
                .collect();
        }

        let mut results = Vec::with_capacity(tool_calls.len());
        for call in tool_calls {
            let result = self.route(call, ctx).await;
            results.push((call.id.clone(), result));
        }
        results
    }

    /// Get a reference to the registry
    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }
}

impl std::fmt::Debug for ToolRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRouter")
            .field("registry", &self.registry)
            .field("mcp", &self.mcp.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{ParameterProperty, ParameterSchema, Tool};
    use anyhow::Result;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::time::Duration;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echoes input"
        }

        fn parameters_schema(&self) -> ParameterSchema {
            ParameterSchema::new()
                .with_required("text", ParameterProperty::string("Text to echo"))
                .with_property("delay_ms", ParameterProperty::number("Delay before answering"))
        }

        async fn execute(&self, args: &Value, _ctx: &ToolContext) -> Result<ToolOutput> {
            if let Some(ms) = args.get("delay_ms").and_then(Value::as_u64) {
                tokio::time::sleep(Duration::from_millis(ms)).await;
            }
            let text = args.get("text").and_then(|v| v.as_str()).unwrap_or("empty");
            Ok(ToolOutput::success(text))
        }
    }

    struct BrokenTool;

    #[async_trait]
    impl Tool for BrokenTool {
        fn name(&self) -> &str {
            "broken"
        }

        fn description(&self) -> &str {
            "Always fails"
        }

        fn parameters_schema(&self) -> ParameterSchema {
            ParameterSchema::new()
        }

        async fn execute(&self, _args: &Value, _ctx: &ToolContext) -> Result<ToolOutput> {
            anyhow::bail!("disk on fire")
        }
    }

    fn router() -> ToolRouter {
        let mut registry = ToolRegistry::new();
        registry.register_local(EchoTool).unwrap();
        registry.register_local(BrokenTool).unwrap();
        ToolRouter::new(registry)
    }

    #[tokio::test]
    async fn test_router_success() {
        let call = ToolCall::new("1", "echo", json!({"text": "hello"}));
        let output = router().route(&call, &ToolContext::default()).await.into_output();
        assert!(!output.is_error);
        assert_eq!(output.content, "hello");
    }

    #[tokio::test]
    async fn test_router_not_found() {
        let call = ToolCall::new("1", "nonexistent", json!({}));
        let result = router().route(&call, &ToolContext::default()).await;
        assert!(matches!(result, RouteResult::NotFound(_)));
        let output = result.into_output();
        assert!(output.is_error);
        assert!(output.content.contains("nonexistent"));
    }

    #[tokio::test]
    async fn test_router_invalid_arguments() {
        let call = ToolCall::new("1", "echo", json!("{broken"));
        let result = router().route(&call, &ToolContext::default()).await;
        assert!(matches!(result, RouteResult::InvalidArguments(_)));

        let call = ToolCall::new("2", "echo", json!({}));
        let output = router().route(&call, &ToolContext::default()).await.into_output();
        assert!(output.is_error);
        assert!(output.content.contains("text"));
    }

    #[tokio::test]
    async fn test_router_execution_error_becomes_result() {
        let call = ToolCall::new("1", "broken", json!({}));
        let output = router().route(&call, &ToolContext::default()).await.into_output();
        assert!(output.is_error);
        assert!(output.content.contains("disk on fire"));
    }

    #[tokio::test]
    async fn test_route_all_keeps_emitted_order_when_parallel() {
        let calls = vec![
            ToolCall::new("a", "echo", json!({"text": "first"})),
            ToolCall::new("b", "echo", json!({"text": "second", "delay_ms": 150})),
            ToolCall::new("c", "echo", json!({"text": "third"})),
        ];
        let router = router();

        for parallel in [false, true] {
            let results = router.route_all(&calls, &ToolContext::default(), parallel).await;
            let ids: Vec<&str> = results.iter().map(|(id, _)| id.as_str()).collect();
            assert_eq!(ids, vec!["a", "b", "c"]);
            let texts: Vec<String> = results
                .into_iter()
                .map(|(_, r)| r.into_output().content)
                .collect();
            assert_eq!(texts, vec!["first", "second", "third"]);
        }
    }
}
