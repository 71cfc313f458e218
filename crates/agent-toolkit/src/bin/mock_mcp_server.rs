//! Scripted MCP server speaking newline-delimited JSON-RPC on stdio.
//!
//! Used by the integration tests to drive the real client end to end.
//! Tools:
//! - `echo {text}` returns `text`
//! - `fail {}` returns an `isError` result
//! - `slow {ms, text}` answers after `ms` milliseconds, out of order with
//!   anything sent after it
//! - any extra name given with `--tools` behaves like `echo`
//!
//! `--exit-after N` makes the process exit once it has answered N tool calls.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter, Stdout};
use tokio::sync::Mutex;

const PROTOCOL_VERSION: &str = "2024-11-05";

#[derive(Debug, Parser)]
#[command(name = "mock-mcp-server")]
struct Args {
    /// Name reported in serverInfo
    #[arg(long, default_value = "mock")]
    name: String,

    /// Comma-separated tool names to expose
    #[arg(long, value_delimiter = ',', default_value = "echo,fail,slow")]
    tools: Vec<String>,

    /// Tools per tools/list page (0 = no paging)
    #[arg(long, default_value_t = 0)]
    page_size: usize,

    /// Exit before answering anything
    #[arg(long)]
    crash_on_start: bool,

    /// Answer initialize with an unsupported protocol version
    #[arg(long)]
    bad_handshake: bool,

    /// Exit after answering this many tools/call requests
    #[arg(long)]
    exit_after: Option<usize>,
}

type Writer = Arc<Mutex<BufWriter<Stdout>>>;

async fn write_message(writer: &Writer, message: &Value) {
    let mut writer = writer.lock().await;
    let _ = writer.write_all(message.to_string().as_bytes()).await;
    let _ = writer.write_all(b"\n").await;
    let _ = writer.flush().await;
}

fn result(id: &Value, result: Value) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "result": result})
}

fn error(id: &Value, code: i64, message: &str) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "error": {"code": code, "message": message}})
}

fn text_result(id: &Value, text: &str, is_error: bool) -> Value {
    result(
        id,
        json!({"content": [{"type": "text", "text": text}], "isError": is_error}),
    )
}

fn tool_definition(name: &str) -> Value {
    match name {
        "fail" => json!({
            "name": "fail",
            "description": "Always reports a tool error",
            "inputSchema": {"type": "object", "properties": {}}
        }),
        "slow" => json!({
            "name": "slow",
            "description": "Echo after a delay",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "ms": {"type": "integer", "minimum": 0},
                    "text": {"type": "string"}
                },
                "required": ["ms", "text"]
            }
        }),
        other => json!({
            "name": other,
            "description": format!("Echo the text back ({})", other),
            "inputSchema": {
                "type": "object",
                "properties": {"text": {"type": "string", "x-mock-keyword": true}},
                "required": ["text"]
            }
        }),
    }
}

struct MockServer {
    args: Args,
    writer: Writer,
    calls_answered: AtomicUsize,
}

impl MockServer {
    /// Answer one request. Returns false once the server should exit.
    async fn handle(&self, request: Value) -> bool {
        let id = request["id"].clone();
        let method = request["method"].as_str().unwrap_or("");
        let params = request.get("params").cloned().unwrap_or(Value::Null);

        let response = match method {
            "initialize" => {
                // An unsolicited notification ahead of the answer
                write_message(
                    &self.writer,
                    &json!({"jsonrpc": "2.0", "method": "notifications/message",
                            "params": {"level": "info", "data": "starting"}}),
                )
                .await;

                let version = if self.args.bad_handshake { "1999-01-01" } else { PROTOCOL_VERSION };
                result(
                    &id,
                    json!({
                        "protocolVersion": version,
                        "capabilities": {"tools": {"listChanged": false}},
                        "serverInfo": {"name": self.args.name, "version": env!("CARGO_PKG_VERSION")}
                    }),
                )
            }
            "tools/list" => self.list_tools(&id, &params),
            "tools/call" => {
                let name = params["name"].as_str().unwrap_or("").to_string();
                let arguments = params["arguments"].clone();
                if !self.args.tools.iter().any(|t| *t == name) {
                    error(&id, -32601, &format!("Unknown tool: {}", name))
                } else if name == "slow" {
                    let writer = Arc::clone(&self.writer);
                    tokio::spawn(async move {
                        let ms = arguments["ms"].as_u64().unwrap_or(0);
                        tokio::time::sleep(Duration::from_millis(ms)).await;
                        let text = arguments["text"].as_str().unwrap_or("");
                        write_message(&writer, &text_result(&id, text, false)).await;
                    });
                    return true;
                } else if name == "fail" {
                    text_result(&id, "requested failure", true)
                } else {
                    text_result(&id, arguments["text"].as_str().unwrap_or(""), false)
                }
            }
            "ping" => result(&id, json!({})),
            other => error(&id, -32601, &format!("Method not found: {}", other)),
        };

        write_message(&self.writer, &response).await;

        if method == "tools/call" {
            let answered = self.calls_answered.fetch_add(1, Ordering::SeqCst) + 1;
            if self.args.exit_after.map_or(false, |limit| answered >= limit) {
                eprintln!("mock-mcp-server: exiting after {} tool call(s)", answered);
                return false;
            }
        }
        true
    }

    fn list_tools(&self, id: &Value, params: &Value) -> Value {
        let all: Vec<Value> = self.args.tools.iter().map(|t| tool_definition(t)).collect();
        if self.args.page_size == 0 {
            return result(id, json!({"tools": all}));
        }

        let start: usize = params["cursor"]
            .as_str()
            .and_then(|c| c.parse().ok())
            .unwrap_or(0);
        let end = (start + self.args.page_size).min(all.len());
        let page = all.get(start..end).map(<[Value]>::to_vec).unwrap_or_default();

        if end < all.len() {
            result(id, json!({"tools": page, "nextCursor": end.to_string()}))
        } else {
            result(id, json!({"tools": page}))
        }
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    if args.crash_on_start {
        eprintln!("mock-mcp-server: crashing on purpose");
        std::process::exit(3);
    }
    eprintln!("mock-mcp-server '{}' ready", args.name);

    let server = MockServer {
        args,
        writer: Arc::new(Mutex::new(BufWriter::new(tokio::io::stdout()))),
        calls_answered: AtomicUsize::new(0),
    };

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let message: Value = match serde_json::from_str(line) {
            Ok(message) => message,
            Err(e) => {
                write_message(&server.writer, &error(&Value::Null, -32700, &format!("Parse error: {}", e))).await;
                continue;
            }
        };

        // Notifications carry no id and get no answer
        if message.get("id").map_or(true, Value::is_null) {
            continue;
        }
        if !server.handle(message).await {
            break;
        }
    }

    // Do not wait on a blocked stdin read during runtime shutdown
    std::process::exit(0);
}
