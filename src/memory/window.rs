//! Message window selection for summarization

use crate::backend::Message;

/// The messages one summarization looks at.
///
/// `new_context` is the chunk being summarized; `old_context` is the run of
/// messages immediately before it, given as background.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WindowSelection {
    pub old_context: Vec<Message>,
    pub new_context: Vec<Message>,
}

impl WindowSelection {
    /// Select from the tail of `messages` (oldest first).
    ///
    /// `new_context` gets the last `chunk_messages` messages, `old_context`
    /// up to `max_old` messages before those. The two never overlap.
    pub fn select(messages: &[Message], chunk_messages: usize, max_old: usize) -> Self {
        let start = messages.len().saturating_sub(max_old + chunk_messages);
        let tail = &messages[start..];
        let split = tail.len().saturating_sub(chunk_messages);

        Self {
            old_context: tail[..split].to_vec(),
            new_context: tail[split..].to_vec(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.new_context.is_empty()
    }
}
