//! Conversation transcript and persistence
//!
//! A transcript is the ordered message log of one conversation. It is saved
//! as a single pretty-printed JSON document; saving replaces the file.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use llm_core::{ChatMessage, Role};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

/// A saved conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transcript {
    /// Unique identifier
    pub id: String,
    /// Human-readable title, taken from the first user message
    #[serde(default)]
    pub title: String,
    /// Model used
    pub model: String,
    /// Chat messages
    pub messages: Vec<ChatMessage>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl Transcript {
    /// Create a new, empty transcript
    pub fn new(model: impl Into<String>) -> Self {
        let now = Utc::now();

        Self {
            id: uuid::Uuid::new_v4().to_string(),
            title: String::new(),
            model: model.into(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Append a message
    pub fn push(&mut self, message: ChatMessage) {
        if self.title.is_empty() && message.role == Role::User {
            self.title = truncate_title(message.text_content());
        }
        self.messages.push(message);
        self.updated_at = Utc::now();
    }

    /// Replace the log with the messages of a finished run
    pub fn replace_messages(&mut self, messages: Vec<ChatMessage>) {
        self.messages.clear();
        for message in messages {
            self.push(message);
        }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Check that tool messages and tool calls pair up: each assistant
    /// message with tool calls is followed by exactly one tool message per
    /// call id before anything else, and no tool message answers an id that
    /// was never requested.
    pub fn validate(&self) -> Result<()> {
        let mut pending: Vec<String> = Vec::new();

        for (index, message) in self.messages.iter().enumerate() {
            if message.role == Role::Tool {
                let id = message.tool_call_id.as_deref().unwrap_or("");
                match pending.iter().position(|p| p == id) {
                    Some(pos) => {
                        pending.remove(pos);
                    }
                    None => bail!("message {}: tool result for unknown call id '{}'", index, id),
                }
                continue;
            }

            if !pending.is_empty() {
                bail!(
                    "message {}: {} message before results for call(s) {}",
                    index,
                    message.role,
                    pending.join(", ")
                );
            }

            if let Some(calls) = message.tool_calls.as_ref().filter(|c| !c.is_empty()) {
                let mut seen = HashSet::new();
                for call in calls {
                    if call.id.is_empty() || !seen.insert(call.id.as_str()) {
                        bail!("message {}: missing or repeated call id '{}'", index, call.id);
                    }
                }
                pending = calls.iter().map(|c| c.id.clone()).collect();
            }
        }

        if !pending.is_empty() {
            bail!("transcript ends with unanswered call(s) {}", pending.join(", "));
        }
        Ok(())
    }

    /// Write the transcript, replacing any existing file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write transcript to {}", path.display()))?;
        Ok(())
    }

    /// Read a transcript written by [`Transcript::save`]
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Transcript not found: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse transcript {}", path.display()))
    }
}

/// Truncate content to a reasonable title length
fn truncate_title(content: &str) -> String {
    let first_line = content.lines().next().unwrap_or(content);
    let cleaned: String = first_line
        .chars()
        .filter(|c| !c.is_control())
        .take(50)
        .collect();

    if cleaned.len() < first_line.len() {
        format!("{}...", cleaned.trim())
    } else {
        cleaned.trim().to_string()
    }
}
