//! Question-answering web service tool

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::tools::{required_str, ParameterProperty, ParameterSchema, Tool, ToolContext, ToolOutput};

const DEFAULT_VENDOR: &str = "Perplexity";

/// Shared HTTP client for connection pooling
static SHARED_CLIENT: OnceLock<reqwest::Client> = OnceLock::new();

fn get_shared_client() -> &'static reqwest::Client {
    SHARED_CLIENT.get_or_init(|| {
        reqwest::Client::builder()
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .unwrap_or_default()
    })
}

/// Tool forwarding a question to an answer service (`{base}/ask{vendor}`)
pub struct AskInternetTool;

#[async_trait]
impl Tool for AskInternetTool {
    fn name(&self) -> &str {
        "ask_any_question_internet"
    }

    fn description(&self) -> &str {
        "Ask a question to an internet-connected answer service and return its response text."
    }

    fn parameters_schema(&self) -> ParameterSchema {
        ParameterSchema::new()
            .with_required("question", ParameterProperty::string("The question to ask"))
            .with_property(
                "vendor",
                ParameterProperty::string("Answer service to use").with_default(Value::String(DEFAULT_VENDOR.into())),
            )
    }

    #[instrument(skip(self, args, ctx), fields(vendor = tracing::field::Empty))]
    async fn execute(&self, args: &Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let question = required_str(args, "question")?;
        let vendor = args
            .get("vendor")
            .and_then(|v| v.as_str())
            .filter(|v| !v.is_empty())
            .unwrap_or(DEFAULT_VENDOR);
        tracing::Span::current().record("vendor", vendor);

        let Some(base) = ctx.web_api_base.as_deref() else {
            return Ok(ToolOutput::error(
                "No answer service configured (set API_BASE_URL or [tools] web_api_base).",
            ));
        };
        let url = format!("{}/ask{}", base.trim_end_matches('/'), vendor);
        debug!(%url, "Sending question");

        let response = match get_shared_client()
            .post(&url)
            .json(&json!({ "question": question }))
            .timeout(Duration::from_secs(ctx.http_timeout_secs))
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "Answer service request failed");
                return Ok(ToolOutput::error(format!("Error calling API: {}", e)));
            }
        };

        let status = response.status();
        let body = match response.text().await {
            Ok(b) => b,
            Err(e) => return Ok(ToolOutput::error(format!("Error reading API response: {}", e))),
        };

        if !status.is_success() {
            return Ok(ToolOutput::error(format!("API returned {}: {}", status, body)));
        }

        Ok(ToolOutput::success(ctx.truncate(body)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP response and hand back the raw request
    async fn one_shot_server(status: &'static str, body: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request);
                if let Some(split) = text.find("\r\n\r\n") {
                    let length = text
                        .lines()
                        .find_map(|l| l.to_ascii_lowercase().strip_prefix("content-length:").map(|v| v.trim().parse::<usize>().unwrap()))
                        .unwrap_or(0);
                    if request.len() >= split + 4 + length {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }
            let reply = format!(
                "HTTP/1.1 {}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            socket.write_all(reply.as_bytes()).await.unwrap();
            String::from_utf8_lossy(&request).to_string()
        });
        (format!("http://{}", addr), handle)
    }

    #[tokio::test]
    async fn test_missing_base_url_is_error() {
        let ctx = ToolContext::default();
        let result = AskInternetTool
            .execute(&json!({"question": "why?"}), &ctx)
            .await
            .unwrap();
        assert!(result.is_error);
        assert!(result.content.contains("API_BASE_URL"));
    }

    #[tokio::test]
    async fn test_posts_question_to_vendor_route() {
        let (base, server) = one_shot_server("200 OK", "Paris").await;
        let ctx = ToolContext::default().with_web_api_base(Some(format!("{}/", base)));

        let result = AskInternetTool
            .execute(&json!({"question": "Capital of France?"}), &ctx)
            .await
            .unwrap();
        assert!(!result.is_error);
        assert_eq!(result.content, "Paris");

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /askPerplexity "));
        assert!(request.contains("{\"question\":\"Capital of France?\"}"));
    }

    #[tokio::test]
    async fn test_http_error_is_error_result() {
        let (base, server) = one_shot_server("500 Internal Server Error", "upstream down").await;
        let ctx = ToolContext::default().with_web_api_base(Some(base));

        let result = AskInternetTool
            .execute(&json!({"question": "q", "vendor": "Other"}), &ctx)
            .await
            .unwrap();
        assert!(result.is_error);
        assert!(result.content.contains("upstream down"));

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /askOther "));
    }
}
