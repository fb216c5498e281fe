//! Prompt text for memory rendering and chunk summarization

use super::window::WindowSelection;
use crate::backend::{ChatMessage, Memory};

/// Closing instruction sent with every summarization request
pub const SUMMARIZE_INSTRUCTION: &str = "Summarize the new messages in a sentence or few. Include in your summary the interesting information that occurs in the new messages list above.";

/// Render published memories as a prompt block.
///
/// Returns `None` for an empty set so callers can skip the block entirely.
pub fn render_memories(memories: &[Memory]) -> Option<String> {
    if memories.is_empty() {
        return None;
    }

    let entries = serde_json::Value::Array(
        memories
            .iter()
            .map(|m| match &m.metadata {
                Some(metadata) => serde_json::json!({ "text": m.text, "metadata": metadata }),
                None => serde_json::json!({ "text": m.text }),
            })
            .collect(),
    );

    Some(format!(
        "# Memories\nYou remember the following:\n```\n{:#}\n```\n",
        entries
    ))
}

/// Opens the new-messages section of a summary request. Serialized messages
/// escape their newlines, so this line sequence cannot occur inside them.
pub(crate) const NEW_MESSAGES_HEADER: &str =
    "# New messages\nAnd here are the new messages we are adding:\n```\n";

fn messages_json(messages: &[crate::backend::Message]) -> String {
    let values = serde_json::Value::Array(messages.iter().map(|m| m.summary_view()).collect());
    format!("{:#}", values)
}

/// Build the single-message request asking for a summary of `window.new_context`
pub fn summary_request(window: &WindowSelection) -> Vec<ChatMessage> {
    let content = format!(
        "# Old message history\n\
         Here is the old message history, for context:\n\
         ```\n{}\n```\n\n\
         {}{}\n```\n\n\
         {}\n",
        messages_json(&window.old_context),
        NEW_MESSAGES_HEADER,
        messages_json(&window.new_context),
        SUMMARIZE_INSTRUCTION,
    );
    vec![ChatMessage::user(content)]
}
