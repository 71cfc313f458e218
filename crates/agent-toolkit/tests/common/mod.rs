//! Shared fixtures: a scripted chat backend and mock MCP server configs

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use agent_toolkit::mcp::McpServerConfig;
use anyhow::Result;
use async_trait::async_trait;
use llm_core::{AssistantTurn, ChatBackend, ChatChunk, ChatMessage, ChatStream, ToolCall, ToolDefinition};
use serde_json::Value;

/// Backend that replays canned turns and records what it was sent
pub struct ScriptedBackend {
    turns: Mutex<VecDeque<AssistantTurn>>,
    requests: Mutex<Vec<Vec<ChatMessage>>>,
    offered: Mutex<Vec<Vec<String>>>,
}

impl ScriptedBackend {
    pub fn new(turns: Vec<AssistantTurn>) -> Arc<Self> {
        Arc::new(Self {
            turns: Mutex::new(turns.into()),
            requests: Mutex::new(Vec::new()),
            offered: Mutex::new(Vec::new()),
        })
    }

    /// Number of model calls made
    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Tool names offered on each call
    pub fn offered_tools(&self) -> Vec<Vec<String>> {
        self.offered.lock().unwrap().clone()
    }

    fn next_turn(&self, messages: &[ChatMessage], tools: &[ToolDefinition]) -> Result<AssistantTurn> {
        self.requests.lock().unwrap().push(messages.to_vec());
        self.offered
            .lock()
            .unwrap()
            .push(tools.iter().map(|t| t.function.name.clone()).collect());
        self.turns
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| anyhow::anyhow!("script exhausted"))
    }
}

#[async_trait]
impl ChatBackend for ScriptedBackend {
    fn model(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, messages: &[ChatMessage], tools: &[ToolDefinition]) -> Result<AssistantTurn> {
        self.next_turn(messages, tools)
    }

    async fn complete_stream(&self, messages: &[ChatMessage], tools: &[ToolDefinition]) -> Result<ChatStream> {
        let turn = self.next_turn(messages, tools)?;

        // Split text into two fragments to exercise accumulation
        let mut chunks = Vec::new();
        if let Some(text) = turn.content {
            let mid = text.char_indices().nth(text.chars().count() / 2).map_or(0, |(i, _)| i);
            chunks.push(Ok(ChatChunk::text(&text[..mid])));
            chunks.push(Ok(ChatChunk::text(&text[mid..])));
        }
        chunks.push(Ok(ChatChunk {
            content: String::new(),
            tool_calls: turn.tool_calls,
            done: true,
        }));
        Ok(Box::pin(futures::stream::iter(chunks)))
    }
}

pub fn call(id: &str, name: &str, arguments: Value) -> ToolCall {
    ToolCall::new(id, name, arguments)
}

/// Config for the fixture server binary
pub fn mock_server(name: &str) -> McpServerConfig {
    McpServerConfig::new(name, env!("CARGO_BIN_EXE_mock-mcp-server")).with_timeout(10)
}

pub fn mock_server_with_args(name: &str, args: &[&str]) -> McpServerConfig {
    mock_server(name).with_args(args.iter().copied())
}
