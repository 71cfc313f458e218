//! Ollama API client

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::backend::{lines, ChatBackend, ChatChunk, ChatStream};
use crate::message::{decode_arguments, AssistantTurn, ChatMessage, Role, ToolCall, ToolDefinition};

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "<[ToolDefinition]>::is_empty")]
    tools: &'a [ToolDefinition],
    stream: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    role: Role,
    #[serde(default)]
    content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    function: WireFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: Value,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    message: Option<WireMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

impl From<&ChatMessage> for WireMessage {
    fn from(msg: &ChatMessage) -> Self {
        Self {
            role: msg.role,
            content: msg.text_content().to_string(),
            tool_calls: msg
                .tool_calls
                .iter()
                .flatten()
                .map(|c| WireToolCall {
                    id: Some(c.id.clone()),
                    function: WireFunction {
                        name: c.function.name.clone(),
                        arguments: c.function.arguments.clone(),
                    },
                })
                .collect(),
            tool_call_id: msg.tool_call_id.clone(),
        }
    }
}

impl WireToolCall {
    fn into_tool_call(self) -> ToolCall {
        let mut call = ToolCall::new(
            self.id.unwrap_or_default(),
            self.function.name,
            decode_arguments(self.function.arguments),
        );
        call.ensure_id();
        call
    }
}

/// Ollama API client
#[derive(Debug, Clone)]
pub struct OllamaClient {
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl OllamaClient {
    /// Create a new client with default timeout
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Result<Self> {
        // Generation on local hardware can be slow
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(600))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            client,
        })
    }

    /// Check if Ollama is running
    pub async fn health_check(&self) -> Result<bool> {
        let url = format!("{}/api/tags", self.base_url);

        match self
            .client
            .get(&url)
            .timeout(Duration::from_secs(5))
            .send()
            .await
        {
            Ok(resp) => Ok(resp.status().is_success()),
            Err(_) => Ok(false),
        }
    }

    fn request<'a>(
        &'a self,
        messages: &[ChatMessage],
        tools: &'a [ToolDefinition],
        stream: bool,
    ) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            messages: messages.iter().map(WireMessage::from).collect(),
            tools,
            stream,
        }
    }

    async fn post(&self, body: &ChatRequest<'_>) -> Result<reqwest::Response> {
        let url = format!("{}/api/chat", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .context("Failed to connect to Ollama")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            bail!("Ollama returned {}: {}", status, text);
        }

        Ok(resp)
    }
}

fn chunk_from_response(resp: ChatResponse) -> Result<ChatChunk> {
    if let Some(error) = resp.error {
        bail!("Ollama error: {}", error);
    }

    let mut chunk = ChatChunk {
        done: resp.done,
        ..Default::default()
    };
    if let Some(message) = resp.message {
        chunk.content = message.content;
        chunk.tool_calls = message
            .tool_calls
            .into_iter()
            .map(WireToolCall::into_tool_call)
            .collect();
    }
    Ok(chunk)
}

#[async_trait]
impl ChatBackend for OllamaClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<AssistantTurn> {
        let body = self.request(messages, tools, false);
        let resp: ChatResponse = self
            .post(&body)
            .await?
            .json()
            .await
            .context("Failed to parse chat response")?;

        let chunk = chunk_from_response(resp)?;
        debug!(tool_calls = chunk.tool_calls.len(), "Ollama chat completed");

        Ok(AssistantTurn {
            content: Some(chunk.content).filter(|c| !c.is_empty()),
            tool_calls: chunk.tool_calls,
        })
    }

    async fn complete_stream(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<ChatStream> {
        let body = self.request(messages, tools, true);
        let resp = self.post(&body).await?;

        // NDJSON: one response object per line
        let stream = lines(resp.bytes_stream()).map(|line| {
            let line = line?;
            let parsed: ChatResponse = serde_json::from_str(&line)
                .with_context(|| format!("Invalid stream line from Ollama: {}", line))?;
            chunk_from_response(parsed)
        });

        Ok(Box::pin(stream))
    }
}
