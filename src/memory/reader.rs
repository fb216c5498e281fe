//! Read path: refresh the published memory set

use crate::backend::{Conversation, Memory, MemoryBackend, MemoryQuery};
use crate::Result;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Snapshot of the published memory set
pub type MemorySet = Arc<[Memory]>;

/// Retrieves the memories most relevant to the current conversation and
/// publishes them.
///
/// Publishing replaces the whole set at once, so a reader never sees a mix of
/// two refreshes. A failed refresh leaves the previous set in place.
pub struct MemoryReader {
    conversation: Arc<dyn Conversation>,
    backend: Arc<dyn MemoryBackend>,
    match_count: usize,
    published: watch::Sender<MemorySet>,
}

impl MemoryReader {
    pub fn new(
        conversation: Arc<dyn Conversation>,
        backend: Arc<dyn MemoryBackend>,
        match_count: usize,
    ) -> Self {
        let (published, _) = watch::channel(MemorySet::from(Vec::new()));
        Self {
            conversation,
            backend,
            match_count,
            published,
        }
    }

    /// Run one read cycle.
    ///
    /// On error the published set is untouched and the error is returned to
    /// the caller for logging.
    pub async fn refresh(&self) -> Result<usize> {
        self.conversation.wait_for_load().await;
        let query = self.conversation.embedding_string();

        let mut memories = match self
            .backend
            .get_memory(
                &query,
                MemoryQuery {
                    match_count: self.match_count,
                },
            )
            .await
        {
            Ok(memories) => memories,
            Err(e) => {
                warn!("Memory refresh failed, keeping previous set: {}", e);
                return Err(e);
            }
        };

        if memories.len() > self.match_count {
            debug!(
                "Backend returned {} memories, truncating to {}",
                memories.len(),
                self.match_count
            );
            memories.truncate(self.match_count);
        }

        let count = memories.len();
        self.published.send_replace(MemorySet::from(memories));
        debug!("Published {} memories", count);
        Ok(count)
    }

    /// Current published set
    pub fn memories(&self) -> MemorySet {
        self.published.borrow().clone()
    }

    /// Receiver notified on every publish
    pub fn subscribe(&self) -> watch::Receiver<MemorySet> {
        self.published.subscribe()
    }
}
