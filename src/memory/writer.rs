//! Write path: summarize the newest chunk into a memory
//!
//! Every write goes through the [`TurnQueue`], so two chunks firing close
//! together are summarized and stored one after the other, never interleaved.

use super::prompt::summary_request;
use super::window::WindowSelection;
use crate::backend::{CompletionBackend, CompletionOptions, Conversation, MemoryBackend, ModelSize};
use crate::queue::{TurnHandle, TurnQueue};
use crate::Result;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Summarizes message chunks and persists the summaries
pub struct MemoryWriter {
    conversation: Arc<dyn Conversation>,
    backend: Arc<dyn MemoryBackend>,
    completion: Arc<dyn CompletionBackend>,
    queue: TurnQueue,
    chunk_messages: usize,
    max_old_messages: usize,
}

impl MemoryWriter {
    pub fn new(
        conversation: Arc<dyn Conversation>,
        backend: Arc<dyn MemoryBackend>,
        completion: Arc<dyn CompletionBackend>,
        queue: TurnQueue,
        chunk_messages: usize,
        max_old_messages: usize,
    ) -> Self {
        Self {
            conversation,
            backend,
            completion,
            queue,
            chunk_messages,
            max_old_messages,
        }
    }

    /// Queue one summarization turn. Returns immediately.
    pub fn schedule(&self) -> Result<TurnHandle> {
        let conversation = self.conversation.clone();
        let backend = self.backend.clone();
        let completion = self.completion.clone();
        let chunk_messages = self.chunk_messages;
        let max_old_messages = self.max_old_messages;

        self.queue.submit(move || async move {
            summarize_chunk(
                conversation.as_ref(),
                backend.as_ref(),
                completion.as_ref(),
                chunk_messages,
                max_old_messages,
            )
            .await
        })
    }

    pub fn queue(&self) -> &TurnQueue {
        &self.queue
    }
}

/// Body of one write turn
async fn summarize_chunk(
    conversation: &dyn Conversation,
    backend: &dyn MemoryBackend,
    completion: &dyn CompletionBackend,
    chunk_messages: usize,
    max_old_messages: usize,
) -> Result<()> {
    // Restored history must precede the chunk in the window.
    conversation.wait_for_load().await;
    let messages = conversation.messages();
    let window = WindowSelection::select(&messages, chunk_messages, max_old_messages);

    if window.is_empty() {
        debug!("No messages to summarize");
        return Ok(());
    }

    debug!(
        "Summarizing {} new messages with {} messages of context",
        window.new_context.len(),
        window.old_context.len()
    );

    let summary = completion
        .complete(
            &summary_request(&window),
            CompletionOptions {
                model: ModelSize::Small,
            },
        )
        .await?;

    let text = summary.content.trim();
    if text.is_empty() {
        warn!("Summarizer returned an empty summary, nothing stored");
        return Ok(());
    }

    backend.add_memory(text).await?;
    info!("Stored memory ({} chars)", text.len());
    Ok(())
}
