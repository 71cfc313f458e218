//! MCP transport layer
//!
//! Line-delimited JSON-RPC 2.0 over a child process's stdio. A background
//! reader task owns stdout and hands each response to the request waiting on
//! its id, so any number of requests may be in flight on one session.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How long a server gets to exit on its own after stdin is closed
const GRACEFUL_EXIT: Duration = Duration::from_millis(500);

/// JSON-RPC 2.0 request
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC 2.0 response
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub jsonrpc: String,
    pub id: Option<u64>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC 2.0 error
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

impl std::fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JSON-RPC error {}: {}", self.code, self.message)
    }
}

/// Why a round trip did not produce a response
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("no response within {0:?}")]
    Timeout(Duration),

    #[error("connection closed")]
    Closed,

    #[error("write failed: {0}")]
    Io(String),
}

/// Transport trait for MCP communication
#[async_trait]
pub trait McpTransport: Send + Sync {
    /// Send a request and wait up to `timeout` for its response
    async fn send_request(
        &self,
        request: JsonRpcRequest,
        timeout: Duration,
    ) -> std::result::Result<JsonRpcResponse, TransportError>;

    /// Send a notification (no response expected)
    async fn send_notification(&self, method: &str, params: Option<Value>) -> Result<()>;

    /// Check if transport is still connected
    fn is_connected(&self) -> bool;

    /// Close the transport. Calling it again is a no-op.
    async fn close(&self) -> Result<()>;
}

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>;

/// Stdio transport for MCP servers running as child processes
pub struct StdioTransport {
    name: String,
    stdin: Mutex<Option<ChildStdin>>,
    child: Mutex<Option<Child>>,
    pending: PendingMap,
    connected: Arc<AtomicBool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl StdioTransport {
    /// Take over a running process's pipes and start the reader tasks
    pub fn new(name: impl Into<String>, mut child: Child) -> Result<Self> {
        let name = name.into();
        let stdin = child
            .stdin
            .take()
            .context("Failed to capture stdin of MCP server")?;
        let stdout = child
            .stdout
            .take()
            .context("Failed to capture stdout of MCP server")?;
        let stderr = child.stderr.take();

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let connected = Arc::new(AtomicBool::new(true));

        let mut tasks = vec![tokio::spawn(read_loop(
            name.clone(),
            stdout,
            pending.clone(),
            connected.clone(),
        ))];
        if let Some(stderr) = stderr {
            tasks.push(tokio::spawn(drain_stderr(name.clone(), stderr)));
        }

        Ok(Self {
            name,
            stdin: Mutex::new(Some(stdin)),
            child: Mutex::new(Some(child)),
            pending,
            connected,
            tasks: Mutex::new(tasks),
        })
    }

    /// Spawn a new process and create transport
    pub fn spawn(
        name: &str,
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
        cwd: Option<&Path>,
    ) -> Result<Self> {
        let mut cmd = Command::new(command);
        cmd.args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }

        let child = cmd
            .spawn()
            .with_context(|| format!("Failed to spawn MCP server: {}", command))?;

        debug!(server = %name, pid = ?child.id(), "Spawned MCP server");
        Self::new(name, child)
    }

    async fn write_line(&self, value: &impl Serialize) -> std::result::Result<(), TransportError> {
        let mut json = serde_json::to_string(value).map_err(|e| TransportError::Io(e.to_string()))?;
        json.push('\n');

        let mut guard = self.stdin.lock().await;
        let stdin = guard.as_mut().ok_or(TransportError::Closed)?;
        stdin
            .write_all(json.as_bytes())
            .await
            .map_err(|e| TransportError::Io(e.to_string()))?;
        stdin
            .flush()
            .await
            .map_err(|e| TransportError::Io(e.to_string()))
    }
}

#[async_trait]
impl McpTransport for StdioTransport {
    async fn send_request(
        &self,
        request: JsonRpcRequest,
        timeout: Duration,
    ) -> std::result::Result<JsonRpcResponse, TransportError> {
        let id = request.id;
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        // The reader marks the session closed before it drains the map, so a
        // slot inserted after the drain is caught here
        if !self.is_connected() {
            self.pending.lock().await.remove(&id);
            return Err(TransportError::Closed);
        }

        if let Err(e) = self.write_line(&request).await {
            self.pending.lock().await.remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(TransportError::Closed),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                debug!(server = %self.name, id, method = %request.method, "Request timed out");
                Err(TransportError::Timeout(timeout))
            }
        }
    }

    async fn send_notification(&self, method: &str, params: Option<Value>) -> Result<()> {
        let mut notification = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
        });
        if let Some(params) = params {
            notification["params"] = params;
        }

        self.write_line(&notification)
            .await
            .with_context(|| format!("Failed to send {} to {}", method, self.name))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);

        // Closing stdin is the polite shutdown signal for stdio servers
        drop(self.stdin.lock().await.take());

        if let Some(mut child) = self.child.lock().await.take() {
            match tokio::time::timeout(GRACEFUL_EXIT, child.wait()).await {
                Ok(Ok(status)) => debug!(server = %self.name, %status, "MCP server exited"),
                _ => {
                    // Already-exited processes make kill fail; that is fine
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                    debug!(server = %self.name, "MCP server killed");
                }
            }
            info!(server = %self.name, "MCP server stopped");
        }

        for task in self.tasks.lock().await.drain(..) {
            task.abort();
        }
        self.pending.lock().await.clear();

        Ok(())
    }
}

/// Route every stdout line to its waiting request until the stream ends
async fn read_loop(
    name: String,
    stdout: ChildStdout,
    pending: PendingMap,
    connected: Arc<AtomicBool>,
) {
    let mut lines = BufReader::new(stdout).lines();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => dispatch_line(&name, &line, &pending).await,
            Ok(None) => {
                debug!(server = %name, "MCP server closed stdout");
                break;
            }
            Err(e) => {
                warn!(server = %name, error = %e, "Failed to read from MCP server");
                break;
            }
        }
    }

    connected.store(false, Ordering::SeqCst);
    // Dropping the senders fails every outstanding request at once
    pending.lock().await.clear();
}

async fn dispatch_line(name: &str, line: &str, pending: &PendingMap) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }

    let value: Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => {
            warn!(server = %name, error = %e, "Ignoring non-JSON line from MCP server");
            return;
        }
    };

    let has_id = value.get("id").map_or(false, |id| !id.is_null());
    if let Some(method) = value.get("method").and_then(Value::as_str) {
        if has_id {
            debug!(server = %name, %method, "Ignoring server-initiated request");
        } else {
            debug!(server = %name, %method, params = ?value.get("params"), "Server notification");
        }
        return;
    }

    if !has_id {
        warn!(server = %name, "Ignoring message without id or method");
        return;
    }

    let response: JsonRpcResponse = match serde_json::from_value(value) {
        Ok(r) => r,
        Err(e) => {
            warn!(server = %name, error = %e, "Malformed JSON-RPC response");
            return;
        }
    };

    let Some(id) = response.id else {
        return;
    };
    match pending.lock().await.remove(&id) {
        Some(slot) => {
            // The waiter may have timed out and gone away
            let _ = slot.send(response);
        }
        None => debug!(server = %name, id, "Discarding response with no waiting request"),
    }
}

async fn drain_stderr(name: String, stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(server = %name, "stderr: {}", line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_rpc_request_serialization() {
        let request = JsonRpcRequest::new(1, "tools/list", Some(serde_json::json!({"cursor": "abc"})));

        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("\"jsonrpc\":\"2.0\""));
        assert!(json.contains("\"id\":1"));
        assert!(json.contains("\"method\":\"tools/list\""));

        let bare = serde_json::to_value(JsonRpcRequest::new(2, "ping", None)).unwrap();
        assert!(bare.get("params").is_none());
    }

    #[tokio::test]
    async fn test_dispatch_routes_by_id() {
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let (tx1, rx1) = oneshot::channel();
        let (tx2, rx2) = oneshot::channel();
        pending.lock().await.insert(1, tx1);
        pending.lock().await.insert(2, tx2);

        dispatch_line("t", r#"{"jsonrpc":"2.0","method":"notifications/message","params":{}}"#, &pending).await;
        dispatch_line("t", r#"{"jsonrpc":"2.0","id":2,"result":{"n":2}}"#, &pending).await;
        dispatch_line("t", "not json", &pending).await;
        dispatch_line("t", r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32601,"message":"nope"}}"#, &pending).await;

        let second = rx2.await.unwrap();
        assert_eq!(second.result.unwrap()["n"], 2);
        let first = rx1.await.unwrap();
        assert_eq!(first.error.unwrap().code, -32601);
        assert!(pending.lock().await.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_eof_fails_pending_requests() {
        // Echoes the request back (it carries a method, so it is not a
        // response) and exits after the first line
        let transport = StdioTransport::spawn(
            "head",
            "head",
            &["-n".to_string(), "1".to_string()],
            &HashMap::new(),
            None,
        )
        .unwrap();

        let err = transport
            .send_request(JsonRpcRequest::new(1, "tools/list", None), Duration::from_secs(10))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Closed));
        transport.close().await.unwrap();
        transport.close().await.unwrap();
    }
}
