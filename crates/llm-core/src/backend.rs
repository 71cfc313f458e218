//! Backend abstraction: send a conversation plus tool schemas, get back an
//! [`AssistantTurn`] either in one piece or as a stream of chunks.

use std::pin::Pin;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};

use crate::message::{AssistantTurn, ChatMessage, ToolCall, ToolDefinition};

/// One increment of a streamed response
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatChunk {
    /// Text fragment (may be empty)
    pub content: String,
    /// Complete tool calls carried by this chunk
    pub tool_calls: Vec<ToolCall>,
    /// Set on the last chunk of a response
    pub done: bool,
}

impl ChatChunk {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }
}

/// Lazy, finite, non-restartable sequence of chunks. Dropping it cancels the
/// underlying request.
pub type ChatStream = Pin<Box<dyn Stream<Item = Result<ChatChunk>> + Send>>;

/// An LLM capable of tool calling
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Model identifier sent with every request
    fn model(&self) -> &str;

    /// Non-streaming completion
    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<AssistantTurn>;

    /// Streaming completion
    async fn complete_stream(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<ChatStream>;
}

/// Fold a chunk stream into a single turn, reporting each text fragment
pub async fn collect_turn<F>(mut stream: ChatStream, mut on_text: F) -> Result<AssistantTurn>
where
    F: FnMut(&str),
{
    let mut content = String::new();
    let mut tool_calls = Vec::new();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if !chunk.content.is_empty() {
            on_text(&chunk.content);
            content.push_str(&chunk.content);
        }
        tool_calls.extend(chunk.tool_calls);
        if chunk.done {
            break;
        }
    }

    Ok(AssistantTurn {
        content: if content.is_empty() { None } else { Some(content) },
        tool_calls,
    })
}

/// Split a byte stream into complete text lines (without the terminator).
/// A trailing line without a newline is emitted at the end.
pub(crate) fn lines<S>(bytes: S) -> impl Stream<Item = Result<String>> + Send
where
    S: Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
{
    async_stream::try_stream! {
        let mut buffer: Vec<u8> = Vec::new();
        futures::pin_mut!(bytes);

        while let Some(chunk) = bytes.next().await {
            let chunk = chunk?;
            buffer.extend_from_slice(&chunk);

            while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=pos).collect();
                let text = String::from_utf8_lossy(&line).trim_end_matches(['\r', '\n']).to_string();
                if !text.is_empty() {
                    yield text;
                }
            }
        }

        if !buffer.is_empty() {
            let text = String::from_utf8_lossy(&buffer).trim().to_string();
            if !text.is_empty() {
                yield text;
            }
        }
    }
}
