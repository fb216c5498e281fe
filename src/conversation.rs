//! In-process message log
//!
//! [`ConversationLog`] is the default [`Conversation`]: an append-only list of
//! messages with a load gate, so callers can start observing before a stored
//! transcript has been restored.

use crate::backend::{Conversation, Message};
use async_trait::async_trait;
use std::sync::RwLock;
use tokio::sync::watch;

/// Number of trailing messages folded into the similarity-search query
const EMBEDDING_WINDOW: usize = 8;

/// Append-only conversation log
#[derive(Debug)]
pub struct ConversationLog {
    messages: RwLock<Vec<Message>>,
    loaded: watch::Sender<bool>,
}

impl ConversationLog {
    /// An empty, already loaded log
    pub fn new() -> Self {
        let (loaded, _) = watch::channel(true);
        Self {
            messages: RwLock::new(Vec::new()),
            loaded,
        }
    }

    /// A log whose history is still being restored. Readers calling
    /// `wait_for_load` suspend until [`finish_load`](Self::finish_load).
    pub fn loading() -> Self {
        let (loaded, _) = watch::channel(false);
        Self {
            messages: RwLock::new(Vec::new()),
            loaded,
        }
    }

    /// Prepend restored history and open the load gate
    pub fn finish_load(&self, history: Vec<Message>) {
        {
            let mut messages = self.messages.write().unwrap_or_else(|e| e.into_inner());
            let appended = std::mem::take(&mut *messages);
            *messages = history;
            messages.extend(appended);
        }
        self.loaded.send_replace(true);
    }

    pub fn is_loaded(&self) -> bool {
        *self.loaded.borrow()
    }

    /// Append a message, returning the new log length
    pub fn append(&self, message: Message) -> usize {
        let mut messages = self.messages.write().unwrap_or_else(|e| e.into_inner());
        messages.push(message);
        messages.len()
    }

    pub fn len(&self) -> usize {
        self.messages.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ConversationLog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Conversation for ConversationLog {
    async fn wait_for_load(&self) {
        let mut rx = self.loaded.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(|loaded| *loaded).await;
    }

    fn messages(&self) -> Vec<Message> {
        self.messages
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn embedding_string(&self) -> String {
        let messages = self.messages.read().unwrap_or_else(|e| e.into_inner());
        let start = messages.len().saturating_sub(EMBEDDING_WINDOW);
        messages[start..]
            .iter()
            .map(|m| format!("{}: {}", m.name, m.text()))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
