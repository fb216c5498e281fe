//! Data types and collaborator interfaces
//!
//! The message log, the retrieval store and the completion model all live
//! outside this crate. They are reached through the narrow traits below so
//! that real backends and test fakes are interchangeable.

use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single entry of a conversation's message log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Who produced the message
    pub name: String,
    /// What kind of message it is (e.g. "say", "tool_call")
    pub method: String,
    /// Opaque message payload
    #[serde(default)]
    pub args: serde_json::Value,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(name: impl Into<String>, method: impl Into<String>, args: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            method: method.into(),
            args,
            timestamp: Utc::now(),
        }
    }

    /// Convenience constructor for a plain spoken message
    pub fn say(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(name, "say", serde_json::json!({ "text": text.into() }))
    }

    /// Projection used when messages are shown to the summarizer
    pub fn summary_view(&self) -> serde_json::Value {
        serde_json::json!({
            "name": self.name,
            "method": self.method,
            "args": self.args,
        })
    }

    /// Best-effort plain text for the message
    pub fn text(&self) -> String {
        match &self.args {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Object(map) => match map.get("text").and_then(|t| t.as_str()) {
                Some(text) => text.to_string(),
                None => self.args.to_string(),
            },
            serde_json::Value::Null => String::new(),
            other => other.to_string(),
        }
    }
}

/// A persisted short text derived from past conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Memory {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Memory {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            metadata: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Options for a retrieval query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryQuery {
    /// Maximum number of memories wanted
    pub match_count: usize,
}

/// Chat roles understood by completion backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }
}

/// Which model variant a completion should use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModelSize {
    #[default]
    Default,
    /// Cheap/fast variant, used for summarization
    Small,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CompletionOptions {
    pub model: ModelSize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub content: String,
}

/// The conversation whose messages drive the memory
#[async_trait]
pub trait Conversation: Send + Sync {
    /// Suspend until the message log has finished any pending load
    async fn wait_for_load(&self);

    /// Current materialized log, oldest first
    fn messages(&self) -> Vec<Message>;

    /// Single string representation used as a similarity-search query
    fn embedding_string(&self) -> String;
}

/// Retrieval and persistence of memories
#[async_trait]
pub trait MemoryBackend: Send + Sync {
    async fn get_memory(&self, query: &str, opts: MemoryQuery) -> Result<Vec<Memory>>;

    async fn add_memory(&self, text: &str) -> Result<()>;
}

/// Language-completion backend
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(&self, messages: &[ChatMessage], opts: CompletionOptions)
        -> Result<Completion>;
}
