//! Conversation Data Structure
//!
//! An append-only, insertion-ordered log of messages exchanged with one peer.

use uuid::Uuid;

use super::message::{ChatMessage, ConversationKey, DeliveryState};

/// Messages of one conversation, in the order the client observed them
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    key: ConversationKey,
    messages: Vec<ChatMessage>,
}

impl Conversation {
    pub fn new(key: ConversationKey) -> Self {
        Self {
            key,
            messages: Vec::new(),
        }
    }

    pub fn key(&self) -> &ConversationKey {
        &self.key
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Append a message at the end of the log
    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    /// Find an entry describing the same logical message
    pub fn find_same_mut(&mut self, message: &ChatMessage) -> Option<&mut ChatMessage> {
        self.messages.iter_mut().find(|m| m.same_as(message))
    }

    pub fn find_by_correlation_mut(&mut self, correlation_id: Uuid) -> Option<&mut ChatMessage> {
        self.messages
            .iter_mut()
            .find(|m| m.correlation_id == Some(correlation_id))
    }

    pub fn find_by_correlation(&self, correlation_id: Uuid) -> Option<&ChatMessage> {
        self.messages
            .iter()
            .find(|m| m.correlation_id == Some(correlation_id))
    }

    /// Replace the log with server history.
    ///
    /// Server order is authoritative. Entries the server does not know about
    /// yet (pending or failed sends, late echoes) are kept after it, in the
    /// order they were observed.
    pub fn merge_history(&mut self, history: Vec<ChatMessage>) {
        let local = std::mem::take(&mut self.messages);
        self.messages = history;
        for entry in local {
            match self.messages.iter_mut().find(|m| m.same_as(&entry)) {
                Some(known) => {
                    if known.correlation_id.is_none() {
                        known.correlation_id = entry.correlation_id;
                    }
                }
                None => self.messages.push(entry),
            }
        }
    }

    /// Count entries in the given delivery state
    pub fn count_in_state(&self, state: DeliveryState) -> usize {
        self.messages.iter().filter(|m| m.delivery == state).count()
    }
}
