//! ragmem - rolling retrieval-augmented conversation memory
//!
//! Watches a conversation's message stream and:
//! - Periodically retrieves the most relevant stored memories for the current context
//! - Periodically summarizes a window of recent messages into a new memory
//! - Serializes all memory writes through a single FIFO turn queue

pub mod backend;
pub mod config;
pub mod conversation;
pub mod llm;
pub mod memory;
pub mod queue;
pub mod store;
pub mod trigger;

pub use backend::{
    ChatMessage, ChatRole, Completion, CompletionBackend, CompletionOptions, Conversation,
    Memory, MemoryBackend, MemoryQuery, Message, ModelSize,
};
pub use conversation::ConversationLog;
pub use llm::{ExtractiveSummarizer, OpenAiCompletion};
pub use memory::{MemoryReader, MemoryWriter, RagMemory, TriggerOutcome, WindowSelection};
pub use queue::{TurnHandle, TurnQueue};
pub use store::InMemoryMemoryStore;
pub use trigger::{MessageCounter, TriggerState};

use serde::Deserialize;

/// Default number of messages summarized into one memory
pub const DEFAULT_CHUNK_MESSAGES: usize = 4;

/// Default read-refresh period (in messages)
pub const DEFAULT_REFRESH_MEMORY_EVERY_N_MESSAGES: usize = 1;

/// Default cap on retrieved memories, also the old-context window length
pub const DEFAULT_MAX_MEMORY_VALUES: usize = 8;

/// Configuration for a conversation's rolling memory
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RagMemoryConfig {
    /// Messages per summarized chunk (write-trigger period)
    pub chunk_messages: usize,

    /// Read-trigger period
    pub refresh_memory_every_n_messages: usize,

    /// Maximum number of published memories and old-context messages
    pub max_memory_values: usize,

    /// Optional bound on queued summarization tasks. `None` means unbounded.
    pub max_pending_writes: Option<usize>,
}

impl Default for RagMemoryConfig {
    fn default() -> Self {
        Self {
            chunk_messages: DEFAULT_CHUNK_MESSAGES,
            refresh_memory_every_n_messages: DEFAULT_REFRESH_MEMORY_EVERY_N_MESSAGES,
            max_memory_values: DEFAULT_MAX_MEMORY_VALUES,
            max_pending_writes: None,
        }
    }
}

impl RagMemoryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_chunk_messages(mut self, n: usize) -> Self {
        self.chunk_messages = n;
        self
    }

    pub fn with_refresh_every(mut self, n: usize) -> Self {
        self.refresh_memory_every_n_messages = n;
        self
    }

    pub fn with_max_memory_values(mut self, n: usize) -> Self {
        self.max_memory_values = n;
        self
    }

    pub fn with_max_pending_writes(mut self, cap: usize) -> Self {
        self.max_pending_writes = Some(cap);
        self
    }

    /// Reject non-positive periods and limits before anything starts running.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_messages == 0 {
            return Err(RagMemoryError::InvalidConfig(
                "chunk_messages must be at least 1".to_string(),
            ));
        }
        if self.refresh_memory_every_n_messages == 0 {
            return Err(RagMemoryError::InvalidConfig(
                "refresh_memory_every_n_messages must be at least 1".to_string(),
            ));
        }
        if self.max_memory_values == 0 {
            return Err(RagMemoryError::InvalidConfig(
                "max_memory_values must be at least 1".to_string(),
            ));
        }
        if self.max_pending_writes == Some(0) {
            return Err(RagMemoryError::InvalidConfig(
                "max_pending_writes must be at least 1 when set".to_string(),
            ));
        }
        Ok(())
    }
}

/// Result type for ragmem operations
pub type Result<T> = std::result::Result<T, RagMemoryError>;

/// Errors that can occur in ragmem
#[derive(Debug, thiserror::Error)]
pub enum RagMemoryError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Memory retrieval failed: {0}")]
    Retrieval(String),

    #[error("Completion failed: {0}")]
    Completion(String),

    #[error("Memory store error: {0}")]
    Store(String),

    #[error("Turn queue is closed")]
    QueueClosed,

    #[error("Turn queue is full ({capacity} pending)")]
    QueueFull { capacity: usize },

    #[error("Queued task panicked: {0}")]
    TaskPanicked(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config parse error: {0}")]
    Config(#[from] toml::de::Error),
}
