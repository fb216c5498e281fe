//! Rolling conversation memory
//!
//! [`RagMemory`] is the per-conversation coordinator. It owns two message
//! counters (read-refresh and write-chunk), the write queue, the reader and
//! the writer, and turns "N new messages arrived" into memory reads and
//! writes.

mod prompt;
mod reader;
mod window;
mod writer;

pub use prompt::{render_memories, summary_request, SUMMARIZE_INSTRUCTION};
pub(crate) use prompt::NEW_MESSAGES_HEADER;
pub use reader::{MemoryReader, MemorySet};
pub use window::WindowSelection;
pub use writer::MemoryWriter;

use crate::backend::{CompletionBackend, Conversation, MemoryBackend};
use crate::queue::{TurnHandle, TurnQueue};
use crate::trigger::MessageCounter;
use crate::{RagMemoryConfig, Result};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::{debug, warn};

/// What one call to [`RagMemory::on_new_messages`] set in motion
#[derive(Debug, Default)]
pub struct TriggerOutcome {
    /// Read-trigger fires in this call
    pub read_fires: usize,
    /// Whether the (single) read cycle succeeded, when one ran
    pub refreshed: Option<bool>,
    /// One handle per queued summarization turn
    pub writes: Vec<TurnHandle>,
    /// Write fires rejected by a full or closed queue
    pub dropped_writes: usize,
}

struct Triggers {
    read: MessageCounter,
    write: MessageCounter,
}

/// Rolling retrieval-augmented memory for one conversation.
///
/// Must be created inside a Tokio runtime.
pub struct RagMemory {
    config: RagMemoryConfig,
    triggers: Mutex<Triggers>,
    reader: MemoryReader,
    writer: MemoryWriter,
}

impl RagMemory {
    pub fn new(
        config: RagMemoryConfig,
        conversation: Arc<dyn Conversation>,
        backend: Arc<dyn MemoryBackend>,
        completion: Arc<dyn CompletionBackend>,
    ) -> Result<Self> {
        config.validate()?;

        let triggers = Triggers {
            read: MessageCounter::new(config.refresh_memory_every_n_messages, true)?,
            write: MessageCounter::new(config.chunk_messages, false)?,
        };
        let queue = match config.max_pending_writes {
            Some(capacity) => TurnQueue::with_capacity(capacity)?,
            None => TurnQueue::new(),
        };

        let reader = MemoryReader::new(
            conversation.clone(),
            backend.clone(),
            config.max_memory_values,
        );
        let writer = MemoryWriter::new(
            conversation,
            backend,
            completion,
            queue,
            config.chunk_messages,
            config.max_memory_values,
        );

        debug!(
            "RagMemory ready: chunk={}, refresh_every={}, max_values={}",
            config.chunk_messages, config.refresh_memory_every_n_messages, config.max_memory_values
        );

        Ok(Self {
            config,
            triggers: Mutex::new(triggers),
            reader,
            writer,
        })
    }

    /// Observe `delta` newly appended messages.
    ///
    /// Write fires are queued and not awaited; read fires are awaited inline.
    /// A read failure keeps the previous memory set and does not fail the call.
    pub async fn on_new_messages(&self, delta: usize) -> TriggerOutcome {
        let (read_fires, write_fires) = {
            let mut triggers = self.triggers.lock().unwrap_or_else(|e| e.into_inner());
            (
                triggers.read.on_new_messages(delta),
                triggers.write.on_new_messages(delta),
            )
        };

        let mut outcome = TriggerOutcome {
            read_fires,
            ..Default::default()
        };

        // Queue writes first so a slow read never delays their turn.
        for _ in 0..write_fires {
            match self.writer.schedule() {
                Ok(handle) => outcome.writes.push(handle),
                Err(e) => {
                    warn!("Dropping memory write: {}", e);
                    outcome.dropped_writes += 1;
                }
            }
        }

        // Back-to-back refreshes would publish the same query's results.
        if read_fires > 0 {
            outcome.refreshed = Some(self.reader.refresh().await.is_ok());
        }

        outcome
    }

    /// Run a read cycle now, outside the trigger schedule
    pub async fn refresh(&self) -> Result<usize> {
        self.reader.refresh().await
    }

    /// Queue a summarization turn now, outside the trigger schedule
    pub fn summarize_now(&self) -> Result<TurnHandle> {
        self.writer.schedule()
    }

    /// Latest published memories
    pub fn memories(&self) -> MemorySet {
        self.reader.memories()
    }

    pub fn subscribe(&self) -> watch::Receiver<MemorySet> {
        self.reader.subscribe()
    }

    /// Prompt block for the latest memories, `None` when there are none
    pub fn render_prompt(&self) -> Option<String> {
        render_memories(&self.memories())
    }

    /// Summarization turns queued or running
    pub fn pending_writes(&self) -> usize {
        self.writer.queue().pending()
    }

    /// Wait until no summarization turn is queued or running
    pub async fn flush(&self) {
        self.writer.queue().wait_idle().await;
    }

    /// Stop accepting writes; queued ones still complete
    pub fn close(&self) {
        self.writer.queue().close();
    }

    pub fn config(&self) -> &RagMemoryConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ChatMessage, Completion, CompletionOptions, Message};
    use crate::conversation::ConversationLog;
    use crate::store::InMemoryMemoryStore;
    use crate::RagMemoryError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingCompletion {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CompletionBackend for CountingCompletion {
        async fn complete(
            &self,
            _messages: &[ChatMessage],
            _opts: CompletionOptions,
        ) -> Result<Completion> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(Completion {
                content: format!("chunk summary {}", n),
            })
        }
    }

    fn setup(config: RagMemoryConfig) -> (Arc<ConversationLog>, Arc<InMemoryMemoryStore>, RagMemory) {
        let log = Arc::new(ConversationLog::new());
        let store = Arc::new(InMemoryMemoryStore::new());
        let completion = Arc::new(CountingCompletion {
            calls: AtomicUsize::new(0),
        });
        let memory = RagMemory::new(config, log.clone(), store.clone(), completion).unwrap();
        (log, store, memory)
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let log = Arc::new(ConversationLog::new());
        let store = Arc::new(InMemoryMemoryStore::new());
        let completion = Arc::new(CountingCompletion {
            calls: AtomicUsize::new(0),
        });
        let result = RagMemory::new(
            RagMemoryConfig::new().with_chunk_messages(0),
            log,
            store,
            completion,
        );
        assert!(matches!(result, Err(RagMemoryError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_first_write_after_two_chunks() {
        let (log, store, memory) = setup(RagMemoryConfig::default());

        let mut write_positions = Vec::new();
        for i in 1..=12 {
            log.append(Message::say("user", format!("message {}", i)));
            let outcome = memory.on_new_messages(1).await;
            assert_eq!(outcome.read_fires, 1);
            assert_eq!(outcome.refreshed, Some(true));
            if !outcome.writes.is_empty() {
                write_positions.push(i);
            }
            for handle in outcome.writes {
                handle.await.unwrap();
            }
        }

        assert_eq!(write_positions, vec![8, 12]);
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn test_refresh_picks_up_written_memories() {
        let (log, _store, memory) = setup(RagMemoryConfig::new().with_chunk_messages(2));

        for i in 1..=4 {
            log.append(Message::say("user", format!("chunk summary topic {}", i)));
        }
        let outcome = memory.on_new_messages(4).await;
        assert_eq!(outcome.writes.len(), 1);
        memory.flush().await;

        assert!(memory.memories().is_empty());
        assert_eq!(memory.refresh().await.unwrap(), 1);
        let prompt = memory.render_prompt().unwrap();
        assert!(prompt.contains("chunk summary 1"));
    }

    #[tokio::test]
    async fn test_closed_queue_drops_writes() {
        let (log, _store, memory) = setup(RagMemoryConfig::new().with_chunk_messages(1));
        memory.close();

        log.append(Message::say("user", "a"));
        log.append(Message::say("user", "b"));
        let outcome = memory.on_new_messages(2).await;
        assert!(outcome.writes.is_empty());
        assert_eq!(outcome.dropped_writes, 1);
    }

    #[tokio::test]
    async fn test_no_render_without_memories() {
        let (_log, _store, memory) = setup(RagMemoryConfig::default());
        assert!(memory.render_prompt().is_none());
        assert_eq!(memory.pending_writes(), 0);
    }
}
