//! Chat Message Data Structure
//!
//! Represents a message in a pairwise conversation, together with its
//! client-side delivery state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::peer::{PeerId, RemoteId};
use crate::shared::error::{PortalError, Result};

/// Identifier grouping the messages exchanged between two participants
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "RemoteId", into = "String")]
pub struct ConversationKey(String);

impl ConversationKey {
    /// Key used when the backend has not issued a conversation id yet
    pub fn for_peer(peer_id: &PeerId) -> Self {
        Self(format!("chat_{}", peer_id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<RemoteId> for ConversationKey {
    fn from(id: RemoteId) -> Self {
        Self(id.as_str().to_string())
    }
}

impl From<&str> for ConversationKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<ConversationKey> for String {
    fn from(key: ConversationKey) -> Self {
        key.0
    }
}

/// Client-side delivery marker
///
/// Entries deserialized from the backend are `Sent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    /// Submitted locally, awaiting the server
    Pending,
    /// Acknowledged by the server
    #[default]
    Sent,
    /// The server call failed; the entry stays visible
    Failed,
}

/// Represents a chat message
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    /// Server id, absent until acknowledged
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RemoteId>,
    /// Client-generated id tying an optimistic entry to its server copy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,
    /// Message content
    pub content: String,
    /// User who sent the message
    pub sender_id: PeerId,
    /// Sender display name, when the backend includes it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    /// Creation time
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(skip)]
    pub delivery: DeliveryState,
}

impl ChatMessage {
    /// Create an optimistic local message in the `Pending` state
    pub fn local(sender_id: PeerId, content: String, correlation_id: Uuid) -> Self {
        Self {
            id: None,
            correlation_id: Some(correlation_id),
            content,
            sender_id,
            sender_name: None,
            created_at: Utc::now(),
            delivery: DeliveryState::Pending,
        }
    }

    /// Whether both entries describe the same logical message
    pub fn same_as(&self, other: &ChatMessage) -> bool {
        matches!((&self.id, &other.id), (Some(a), Some(b)) if a == b)
            || matches!(
                (self.correlation_id, other.correlation_id),
                (Some(a), Some(b)) if a == b
            )
    }

    /// Sender label for notifications
    pub fn sender_label(&self) -> &str {
        self.sender_name.as_deref().unwrap_or(self.sender_id.as_str())
    }
}

/// What the backend answers to `POST /chats/{id}/messages`
///
/// Backends differ in how much of the stored message they echo back, from
/// the full record to a bare `{"id": ..}`. Anything missing stays as the
/// local entry has it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageReceipt {
    #[serde(default)]
    pub id: Option<RemoteId>,
    #[serde(default)]
    pub correlation_id: Option<Uuid>,
    #[serde(default)]
    pub sender_name: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl From<ChatMessage> for MessageReceipt {
    fn from(message: ChatMessage) -> Self {
        Self {
            id: message.id,
            correlation_id: message.correlation_id,
            sender_name: message.sender_name,
            created_at: Some(message.created_at),
        }
    }
}

/// Body of `POST /chats/{id}/messages`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreateMessageRequest {
    pub content: String,
    pub chat_id: ConversationKey,
    pub sender_id: PeerId,
    pub correlation_id: Uuid,
}

/// Trim user input and reject it when nothing is left
pub fn validate_content(field: &str, raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(PortalError::validation(field, "Content cannot be empty"));
    }
    Ok(trimmed.to_string())
}
