//! Message list of one open conversation.
//!
//! Messages reach the list from two producers: the REST snapshot and
//! `message.new` deltas (socket echo of our own sends, or the REST fallback
//! response). Both go through [`ConversationMessages::add_message`], which
//! drops ids it has already seen, so a message shows up once whichever path
//! delivered it first.

use founderslib_shared::ChatMessage;

#[derive(Debug, Default, Clone, PartialEq)]
pub struct ConversationMessages {
    /// Snapshot order (oldest first) followed by appended deltas.
    messages: Vec<ChatMessage>,
    /// Whether the conversation history has been fetched from the REST API.
    is_loaded: bool,
}

impl ConversationMessages {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn is_loaded(&self) -> bool {
        self.is_loaded
    }

    pub fn contains(&self, id: &str) -> bool {
        self.messages.iter().any(|m| m.id == id)
    }

    /// Append a message.
    /// Returns false if a message with the same ID already exists (deduplication).
    pub fn add_message(&mut self, msg: ChatMessage) -> bool {
        if self.contains(&msg.id) {
            return false;
        }
        self.messages.push(msg);
        true
    }

    /// Install the REST history. The API returns newest first; the list is
    /// kept oldest first. Deltas that arrived while the history was loading
    /// are re-appended after it.
    pub fn set_history(&mut self, newest_first: Vec<ChatMessage>) {
        let pending = std::mem::take(&mut self.messages);
        for msg in newest_first.into_iter().rev() {
            self.add_message(msg);
        }
        for msg in pending {
            self.add_message(msg);
        }
        self.is_loaded = true;
    }
}
