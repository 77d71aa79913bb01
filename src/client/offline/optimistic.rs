//! # Outbound Registry
//!
//! Bookkeeping for items shown optimistically but not yet acknowledged by
//! the server. An item leaves the registry only when the server confirms
//! it; failed items stay, so the user can re-submit them by hand.
//!
//! ## Usage
//!
//! ```rust
//! use residence_portal::client::offline::optimistic::{OutboundItem, OutboundKind, OutboundRegistry};
//! use residence_portal::shared::messaging::ConversationKey;
//! use uuid::Uuid;
//!
//! let mut registry = OutboundRegistry::new();
//! let id = Uuid::new_v4();
//! registry.track(OutboundItem::new(
//!     id,
//!     OutboundKind::Message { conversation_key: ConversationKey::from("chat_2") },
//!     "Bonjour".to_string(),
//! ));
//! registry.fail(&id, "Network error");
//! assert_eq!(registry.count_failed(), 1);
//! ```

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use uuid::Uuid;

use crate::shared::messaging::{ConversationKey, DeliveryState, Priority};

/// What an outbound item will become on the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundKind {
    Message { conversation_key: ConversationKey },
    Alert { priority: Priority },
}

/// An optimistic item awaiting server acknowledgment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundItem {
    pub correlation_id: Uuid,
    pub kind: OutboundKind,
    /// Trimmed content as submitted
    pub content: String,
    pub state: DeliveryState,
    /// Number of network attempts made so far
    pub attempts: u32,
    pub submitted_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

impl OutboundItem {
    pub fn new(correlation_id: Uuid, kind: OutboundKind, content: String) -> Self {
        Self {
            correlation_id,
            kind,
            content,
            state: DeliveryState::Pending,
            attempts: 1,
            submitted_at: Utc::now(),
            last_error: None,
        }
    }
}

#[derive(Debug, Default)]
pub struct OutboundRegistry {
    items: HashMap<Uuid, OutboundItem>,
}

impl OutboundRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&mut self, item: OutboundItem) {
        self.items.insert(item.correlation_id, item);
    }

    pub fn get(&self, correlation_id: &Uuid) -> Option<&OutboundItem> {
        self.items.get(correlation_id)
    }

    /// Server acknowledged the item; stop tracking it
    pub fn confirm(&mut self, correlation_id: &Uuid) -> Option<OutboundItem> {
        self.items.remove(correlation_id)
    }

    pub fn fail(&mut self, correlation_id: &Uuid, error: impl Into<String>) {
        if let Some(item) = self.items.get_mut(correlation_id) {
            item.state = DeliveryState::Failed;
            item.last_error = Some(error.into());
        }
    }

    /// Move a failed item back to pending for another attempt
    pub fn restart(&mut self, correlation_id: &Uuid) -> Option<&OutboundItem> {
        let item = self
            .items
            .get_mut(correlation_id)
            .filter(|item| item.state == DeliveryState::Failed)?;
        item.state = DeliveryState::Pending;
        item.attempts += 1;
        item.last_error = None;
        Some(item)
    }

    /// Failed items, oldest first
    pub fn failed(&self) -> Vec<&OutboundItem> {
        let mut failed: Vec<_> = self
            .items
            .values()
            .filter(|item| item.state == DeliveryState::Failed)
            .collect();
        failed.sort_by_key(|item| item.submitted_at);
        failed
    }

    pub fn count_pending(&self) -> usize {
        self.count_in_state(DeliveryState::Pending)
    }

    pub fn count_failed(&self) -> usize {
        self.count_in_state(DeliveryState::Failed)
    }

    fn count_in_state(&self, state: DeliveryState) -> usize {
        self.items.values().filter(|item| item.state == state).count()
    }
}
