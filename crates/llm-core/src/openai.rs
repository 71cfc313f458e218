//! OpenAI-compatible chat completions client

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::backend::{lines, ChatBackend, ChatChunk, ChatStream};
use crate::message::{decode_arguments, AssistantTurn, ChatMessage, Role, ToolCall, ToolDefinition};

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "<[ToolDefinition]>::is_empty")]
    tools: &'a [ToolDefinition],
    stream: bool,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: Role,
    content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    #[serde(default)]
    id: String,
    #[serde(rename = "type", default = "function_type")]
    call_type: String,
    function: WireFunction,
}

/// Arguments travel as a JSON-encoded string on this API
#[derive(Debug, Serialize, Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

fn function_type() -> String {
    "function".to_string()
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Debug, Deserialize)]
struct StreamEvent {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Debug, Default, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCallDelta>,
}

#[derive(Debug, Deserialize)]
struct ToolCallDelta {
    #[serde(default)]
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<FunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct FunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

/// Tool call assembled from stream fragments
#[derive(Debug, Default)]
struct PartialCall {
    id: String,
    name: String,
    arguments: String,
}

impl PartialCall {
    fn apply(&mut self, delta: ToolCallDelta) {
        if let Some(id) = delta.id {
            self.id = id;
        }
        if let Some(function) = delta.function {
            if let Some(name) = function.name {
                self.name.push_str(&name);
            }
            if let Some(args) = function.arguments {
                self.arguments.push_str(&args);
            }
        }
    }

    fn finish(self) -> ToolCall {
        WireToolCall {
            id: self.id,
            call_type: function_type(),
            function: WireFunction {
                name: self.name,
                arguments: self.arguments,
            },
        }
        .into_tool_call()
    }
}

impl WireToolCall {
    fn into_tool_call(self) -> ToolCall {
        let arguments = decode_arguments(serde_json::Value::String(self.function.arguments));
        let mut call = ToolCall::new(self.id, self.function.name, arguments);
        call.ensure_id();
        call
    }
}

impl From<&ChatMessage> for WireMessage {
    fn from(msg: &ChatMessage) -> Self {
        Self {
            role: msg.role,
            content: msg.content.clone(),
            tool_calls: msg
                .tool_calls
                .iter()
                .flatten()
                .map(|c| WireToolCall {
                    id: c.id.clone(),
                    call_type: function_type(),
                    function: WireFunction {
                        name: c.function.name.clone(),
                        arguments: match &c.function.arguments {
                            serde_json::Value::String(raw) => raw.clone(),
                            other => other.to_string(),
                        },
                    },
                })
                .collect(),
            tool_call_id: msg.tool_call_id.clone(),
        }
    }
}

/// Client for any server speaking the OpenAI chat completions API
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    api_base: String,
    api_key: Option<String>,
    model: String,
    client: reqwest::Client,
}

impl OpenAiClient {
    pub fn new(
        api_base: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.is_empty()),
            model: model.into(),
            client,
        })
    }

    fn request<'a>(
        &'a self,
        messages: &[ChatMessage],
        tools: &'a [ToolDefinition],
        stream: bool,
    ) -> CompletionRequest<'a> {
        CompletionRequest {
            model: &self.model,
            messages: messages.iter().map(WireMessage::from).collect(),
            tools,
            stream,
        }
    }

    async fn post(&self, body: &CompletionRequest<'_>) -> Result<reqwest::Response> {
        let url = format!("{}/chat/completions", self.api_base);
        let mut req = self.client.post(&url).json(body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        } else {
            warn!("No API key configured for {}", self.api_base);
        }

        let resp = req
            .send()
            .await
            .with_context(|| format!("Failed to connect to {}", self.api_base))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            bail!("Chat completion failed with {}: {}", status, text);
        }

        Ok(resp)
    }
}

/// Parse one SSE line. `Ok(None)` for comments, blank keep-alives and
/// non-data fields.
fn parse_sse_line(line: &str) -> Result<Option<SseData>> {
    let Some(data) = line.strip_prefix("data:") else {
        return Ok(None);
    };
    let data = data.trim();
    if data == "[DONE]" {
        return Ok(Some(SseData::Done));
    }
    let event: StreamEvent = serde_json::from_str(data)
        .with_context(|| format!("Invalid stream event: {}", data))?;
    Ok(Some(SseData::Event(event)))
}

enum SseData {
    Event(StreamEvent),
    Done,
}

#[async_trait]
impl ChatBackend for OpenAiClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<AssistantTurn> {
        let body = self.request(messages, tools, false);
        let resp: CompletionResponse = self
            .post(&body)
            .await?
            .json()
            .await
            .context("Failed to parse chat completion")?;

        let Some(choice) = resp.choices.into_iter().next() else {
            bail!("Chat completion returned no choices");
        };

        let tool_calls: Vec<ToolCall> = choice
            .message
            .tool_calls
            .into_iter()
            .map(WireToolCall::into_tool_call)
            .collect();
        debug!(tool_calls = tool_calls.len(), "Chat completion finished");

        Ok(AssistantTurn {
            content: choice.message.content.filter(|c| !c.is_empty()),
            tool_calls,
        })
    }

    async fn complete_stream(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<ChatStream> {
        let body = self.request(messages, tools, true);
        let resp = self.post(&body).await?;
        Ok(Box::pin(sse_chunks(lines(resp.bytes_stream()))))
    }
}

/// Turn SSE lines into text chunks followed by one final chunk carrying the
/// assembled tool calls
fn sse_chunks<S>(events: S) -> impl Stream<Item = Result<ChatChunk>> + Send
where
    S: Stream<Item = Result<String>> + Send + 'static,
{
    async_stream::try_stream! {
        futures::pin_mut!(events);
        let mut partial: BTreeMap<usize, PartialCall> = BTreeMap::new();

        while let Some(line) = events.next().await {
            let line = line?;
            let event = match parse_sse_line(&line)? {
                Some(SseData::Event(event)) => event,
                Some(SseData::Done) => break,
                None => continue,
            };

            for choice in event.choices {
                for delta in choice.delta.tool_calls {
                    partial.entry(delta.index).or_default().apply(delta);
                }
                if let Some(text) = choice.delta.content.filter(|t| !t.is_empty()) {
                    yield ChatChunk::text(text);
                }
            }
        }

        yield ChatChunk {
            content: String::new(),
            tool_calls: partial.into_values().map(PartialCall::finish).collect(),
            done: true,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_arguments_serialized_as_string() {
        let client = OpenAiClient::new("https://api.example.com/v1/", None, "gpt-4o-mini").unwrap();
        let messages = vec![ChatMessage::assistant_with_tools(
            None,
            vec![ToolCall::new("call_1", "read_file", json!({"filepath": "a.txt"}))],
        )];

        let value = serde_json::to_value(client.request(&messages, &[], false)).unwrap();
        let call = &value["messages"][0]["tool_calls"][0];
        assert_eq!(call["type"], "function");
        assert_eq!(call["function"]["arguments"], "{\"filepath\":\"a.txt\"}");
        assert!(value["messages"][0]["content"].is_null());
        assert!(value.get("tools").is_none());
        assert_eq!(client.api_base, "https://api.example.com/v1");
    }

    #[test]
    fn test_response_arguments_decoded() {
        let resp: CompletionResponse = serde_json::from_value(json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_abc",
                        "type": "function",
                        "function": {"name": "mkdir", "arguments": "{\"path\": \"out\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        }))
        .unwrap();

        let call = resp.choices.into_iter().next().unwrap().message.tool_calls.remove(0);
        let call = call.into_tool_call();
        assert_eq!(call.id, "call_abc");
        assert_eq!(call.function.arguments, json!({"path": "out"}));
    }

    #[tokio::test]
    async fn test_sse_stream_emits_text_then_calls() {
        let lines = [
            r#"data: {"choices":[{"delta":{"content":"Let me "}}]}"#,
            r#"data: {"choices":[{"delta":{"content":"check."}}]}"#,
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"id":"c","function":{"name":"list_files","arguments":"{}"}}]}}]}"#,
            "data: [DONE]",
        ]
        .into_iter()
        .map(|l| Ok::<_, anyhow::Error>(l.to_string()))
        .collect::<Vec<_>>();

        let chunks: Vec<ChatChunk> = sse_chunks(futures::stream::iter(lines))
            .map(|c| c.unwrap())
            .collect()
            .await;

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].content, "Let me ");
        assert!(chunks[2].done);
        assert_eq!(chunks[2].tool_calls[0].name(), "list_files");
    }

    #[test]
    fn test_partial_calls_accumulate() {
        let mut partial: BTreeMap<usize, PartialCall> = BTreeMap::new();
        let lines = [
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":1,"id":"b","function":{"name":"read_file","arguments":""}}]}}]}"#,
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"id":"a","function":{"name":"mkdir","arguments":"{\"pa"}}]}}]}"#,
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"th\":\"x\"}"}}]}}]}"#,
            ": keep-alive",
            "data: [DONE]",
        ];

        for line in lines {
            match parse_sse_line(line).unwrap() {
                Some(SseData::Event(event)) => {
                    for choice in event.choices {
                        for delta in choice.delta.tool_calls {
                            partial.entry(delta.index).or_default().apply(delta);
                        }
                    }
                }
                Some(SseData::Done) => break,
                None => {}
            }
        }

        let calls: Vec<ToolCall> = partial.into_values().map(PartialCall::finish).collect();
        assert_eq!(calls[0].id, "a");
        assert_eq!(calls[0].function.arguments, json!({"path": "x"}));
        assert_eq!(calls[1].name(), "read_file");
        assert_eq!(calls[1].function.arguments, json!({}));
    }
}
