//! llm-core: Shared chat model and LLM backends
//!
//! Provides:
//! - Message model (roles, tool calls, tool definitions)
//! - `ChatBackend` trait with streaming support
//! - Ollama and OpenAI-compatible clients
//! - Backend configuration loading (agent.toml)

pub mod backend;
pub mod config;
pub mod message;
pub mod ollama;
pub mod openai;

pub use backend::{collect_turn, ChatBackend, ChatChunk, ChatStream};
pub use config::{BackendKind, Config};
pub use message::{
    decode_arguments, AssistantTurn, ChatMessage, FunctionCall, FunctionDefinition, Role,
    ToolCall, ToolDefinition,
};
pub use ollama::OllamaClient;
pub use openai::OpenAiClient;
