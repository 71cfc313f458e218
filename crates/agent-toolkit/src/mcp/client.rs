//! MCP client implementation
//!
//! One client per server process. `start` does not return until the
//! `initialize` handshake has succeeded, so a client that exists is usable.

use super::config::McpServerConfig;
use super::transport::{JsonRpcRequest, JsonRpcResponse, McpTransport, StdioTransport, TransportError};
use crate::error::AgentError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// MCP protocol version offered by this client
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

/// Versions this client can talk
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["2024-11-05", "2025-03-26", "2025-06-18"];

/// Client info for initialization
#[derive(Debug, Clone, Serialize)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self {
            name: "agent-toolkit".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Server capabilities returned during initialization
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerCapabilities {
    #[serde(default)]
    pub tools: Option<ToolsCapability>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolsCapability {
    #[serde(default)]
    pub list_changed: bool,
}

/// Server info returned during initialization
#[derive(Debug, Clone, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
}

/// Initialize result
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: String,
    #[serde(default)]
    pub capabilities: ServerCapabilities,
    pub server_info: ServerInfo,
}

/// MCP Tool definition from server
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct McpToolInfo {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub input_schema: Value,
}

/// Tool list result
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListToolsResult {
    pub tools: Vec<McpToolInfo>,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

/// One block of tool call output
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResultContent {
    #[serde(rename = "type")]
    pub content_type: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub resource: Option<EmbeddedResource>,
}

/// Resource embedded in a tool result
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddedResource {
    pub uri: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
}

/// Tool call result
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolResult {
    #[serde(default)]
    pub content: Vec<ToolResultContent>,
    #[serde(default)]
    pub is_error: bool,
}

impl CallToolResult {
    /// Provider-side failure expressed as a result
    pub fn error_text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolResultContent {
                content_type: "text".to_string(),
                text: Some(text.into()),
                mime_type: None,
                resource: None,
            }],
            is_error: true,
        }
    }
}

/// MCP Client
pub struct McpClient {
    name: String,
    transport: Box<dyn McpTransport>,
    request_id: AtomicU64,
    timeout: Duration,
    server: InitializeResult,
    stopped: AtomicBool,
}

impl McpClient {
    /// Spawn the configured server and complete the handshake
    pub async fn start(config: &McpServerConfig) -> Result<Self, AgentError> {
        let env = config
            .expanded_env()
            .map_err(|e| AgentError::server_start(&config.name, format!("{:#}", e)))?;

        let transport = StdioTransport::spawn(
            &config.name,
            &config.command,
            &config.args,
            &env,
            config.cwd.as_deref(),
        )
        .map_err(|e| AgentError::server_start(&config.name, format!("{:#}", e)))?;

        Self::connect(
            &config.name,
            Box::new(transport),
            Duration::from_secs(config.timeout_secs),
        )
        .await
    }

    /// Run the handshake over an already-open transport. On failure the
    /// transport is closed before the error is returned.
    pub async fn connect(
        name: &str,
        transport: Box<dyn McpTransport>,
        timeout: Duration,
    ) -> Result<Self, AgentError> {
        match handshake(name, transport.as_ref(), timeout).await {
            Ok(server) => {
                info!(
                    server = %name,
                    remote = %server.server_info.name,
                    protocol = %server.protocol_version,
                    "MCP server initialized"
                );
                Ok(Self {
                    name: name.to_string(),
                    transport,
                    // id 1 went to `initialize`
                    request_id: AtomicU64::new(2),
                    timeout,
                    server,
                    stopped: AtomicBool::new(false),
                })
            }
            Err(e) => {
                if let Err(close_err) = transport.close().await {
                    debug!(server = %name, error = %close_err, "Close after failed handshake");
                }
                Err(e)
            }
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// What the server reported during the handshake
    pub fn server_info(&self) -> &InitializeResult {
        &self.server
    }

    pub fn is_connected(&self) -> bool {
        !self.stopped.load(Ordering::SeqCst) && self.transport.is_connected()
    }

    /// Get the next request ID
    fn next_id(&self) -> u64 {
        self.request_id.fetch_add(1, Ordering::SeqCst)
    }

    async fn round_trip(&self, method: &str, params: Option<Value>) -> Result<JsonRpcResponse, AgentError> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(AgentError::protocol(&self.name, "client has been stopped"));
        }

        let request = JsonRpcRequest::new(self.next_id(), method, params);
        self.transport
            .send_request(request, self.timeout)
            .await
            .map_err(|e| match e {
                TransportError::Timeout(_) => AgentError::Timeout {
                    server: self.name.clone(),
                    method: method.to_string(),
                    secs: self.timeout.as_secs(),
                },
                other => AgentError::protocol(&self.name, format!("{} failed: {}", method, other)),
            })
    }

    /// Send a request and decode its result
    async fn request<T: DeserializeOwned>(&self, method: &str, params: Option<Value>) -> Result<T, AgentError> {
        let response = self.round_trip(method, params).await?;

        if let Some(error) = response.error {
            return Err(AgentError::protocol(&self.name, format!("{} returned {}", method, error)));
        }

        let result = response
            .result
            .ok_or_else(|| AgentError::protocol(&self.name, format!("{} response missing result", method)))?;

        serde_json::from_value(result)
            .map_err(|e| AgentError::protocol(&self.name, format!("malformed {} result: {}", method, e)))
    }

    /// List available tools, following pagination
    pub async fn list_tools(&self) -> Result<Vec<McpToolInfo>, AgentError> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        let mut seen_cursors = HashSet::new();

        loop {
            let params = cursor.as_ref().map(|c| json!({ "cursor": c }));
            let result: ListToolsResult = self.request("tools/list", params).await?;
            tools.extend(result.tools);

            match result.next_cursor {
                Some(next) if !next.is_empty() => {
                    if !seen_cursors.insert(next.clone()) {
                        return Err(AgentError::protocol(
                            &self.name,
                            format!("tools/list returned repeated cursor '{}'", next),
                        ));
                    }
                    cursor = Some(next);
                }
                _ => break,
            }
        }

        debug!(server = %self.name, count = tools.len(), "Listed MCP tools");
        Ok(tools)
    }

    /// Call a tool. A JSON-RPC error answering the call is a tool failure,
    /// reported as an `is_error` result; only transport problems are `Err`.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResult, AgentError> {
        let params = json!({
            "name": name,
            "arguments": arguments
        });

        let response = self.round_trip("tools/call", Some(params)).await?;

        if let Some(error) = response.error {
            warn!(server = %self.name, tool = %name, %error, "MCP tool call rejected");
            return Ok(CallToolResult::error_text(error.to_string()));
        }

        let result = response
            .result
            .ok_or_else(|| AgentError::protocol(&self.name, "tools/call response missing result"))?;

        serde_json::from_value(result)
            .map_err(|e| AgentError::protocol(&self.name, format!("malformed tools/call result: {}", e)))
    }

    /// Terminate the server. Safe to call more than once and after the
    /// process has already exited.
    pub async fn stop(&self) -> anyhow::Result<()> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.transport.close().await
    }
}

impl std::fmt::Debug for McpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpClient")
            .field("name", &self.name)
            .field("remote", &self.server.server_info.name)
            .field("connected", &self.is_connected())
            .finish()
    }
}

async fn handshake(
    name: &str,
    transport: &dyn McpTransport,
    timeout: Duration,
) -> Result<InitializeResult, AgentError> {
    let params = json!({
        "protocolVersion": MCP_PROTOCOL_VERSION,
        "capabilities": {},
        "clientInfo": ClientInfo::default()
    });

    let response = transport
        .send_request(JsonRpcRequest::new(1, "initialize", Some(params)), timeout)
        .await
        .map_err(|e| match e {
            TransportError::Closed => {
                AgentError::server_start(name, "process exited before completing the handshake")
            }
            other => AgentError::server_start(name, format!("initialize failed: {}", other)),
        })?;

    if let Some(error) = response.error {
        return Err(AgentError::server_start(name, format!("initialize rejected: {}", error)));
    }

    let result: InitializeResult = response
        .result
        .ok_or_else(|| AgentError::server_start(name, "initialize response missing result"))
        .and_then(|r| {
            serde_json::from_value(r).map_err(|e| {
                AgentError::server_start(name, format!("malformed initialize result: {}", e))
            })
        })?;

    if !SUPPORTED_PROTOCOL_VERSIONS.contains(&result.protocol_version.as_str()) {
        return Err(AgentError::server_start(
            name,
            format!("unsupported protocol version {}", result.protocol_version),
        ));
    }

    transport
        .send_notification("notifications/initialized", None)
        .await
        .map_err(|e| AgentError::server_start(name, format!("{:#}", e)))?;

    Ok(result)
}
