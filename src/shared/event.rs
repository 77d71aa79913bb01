//! Real-time Event System
//!
//! Wire envelopes exchanged over the realtime channel, and the typed events
//! the connection manager hands to its subscribers.
//!
//! Every frame is a JSON object with a `type` discriminator:
//!
//! ```json
//! {"type": "new_message", "chatId": "chat_2", "message": {"content": "Bonjour", "sender_id": 2}}
//! ```
use serde::{Deserialize, Serialize};

use crate::shared::error::Result;
use crate::shared::messaging::{Alert, ChatMessage, ConversationKey, Peer, PeerId, Presence};

/// Frames the client sends over the realtime channel
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundEvent {
    /// Identify the session right after the socket opens
    Authenticate {
        #[serde(rename = "userId")]
        user_id: PeerId,
    },
    /// Relay a message the server already stored
    SendMessage {
        #[serde(rename = "chatId")]
        chat_id: ConversationKey,
        message: ChatMessage,
    },
    /// Relay an alert the server already stored
    SendAlert { alert: Alert },
    /// Announce a freshly invited resident
    UserInvited { user: Peer },
    /// Sent before the client closes the socket on purpose
    UserDisconnect {
        #[serde(rename = "userId")]
        user_id: PeerId,
    },
}

impl OutboundEvent {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Wire discriminator, used for logging
    pub fn kind(&self) -> &'static str {
        match self {
            OutboundEvent::Authenticate { .. } => "authenticate",
            OutboundEvent::SendMessage { .. } => "send_message",
            OutboundEvent::SendAlert { .. } => "send_alert",
            OutboundEvent::UserInvited { .. } => "user_invited",
            OutboundEvent::UserDisconnect { .. } => "user_disconnect",
        }
    }
}

/// Frames pushed by the server
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
enum InboundFrame {
    NewMessage {
        #[serde(rename = "chatId")]
        chat_id: ConversationKey,
        message: ChatMessage,
    },
    NewAlert {
        alert: Alert,
    },
    UserStatus {
        #[serde(rename = "userId")]
        user_id: PeerId,
        status: Presence,
    },
    UserJoined {
        user: Peer,
    },
    UserInvited {
        user: Peer,
    },
    #[serde(other)]
    Unknown,
}

/// Typed push event delivered to connection subscribers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RealtimeEvent {
    MessageReceived {
        conversation_key: ConversationKey,
        message: ChatMessage,
    },
    AlertReceived {
        alert: Alert,
    },
    PresenceChanged {
        peer_id: PeerId,
        presence: Presence,
    },
    PeerJoined {
        peer: Peer,
    },
    PeerInvited {
        peer: Peer,
    },
}

impl RealtimeEvent {
    /// Parse a text frame.
    ///
    /// Returns `Ok(None)` for frames whose `type` is not recognised; those
    /// are ignored rather than treated as errors.
    pub fn parse(frame: &str) -> Result<Option<Self>> {
        let event = match serde_json::from_str::<InboundFrame>(frame)? {
            InboundFrame::NewMessage { chat_id, message } => RealtimeEvent::MessageReceived {
                conversation_key: chat_id,
                message,
            },
            InboundFrame::NewAlert { alert } => RealtimeEvent::AlertReceived { alert },
            InboundFrame::UserStatus { user_id, status } => RealtimeEvent::PresenceChanged {
                peer_id: user_id,
                presence: status,
            },
            InboundFrame::UserJoined { user } => RealtimeEvent::PeerJoined { peer: user },
            InboundFrame::UserInvited { user } => RealtimeEvent::PeerInvited { peer: user },
            InboundFrame::Unknown => return Ok(None),
        };
        Ok(Some(event))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            RealtimeEvent::MessageReceived { .. } => "message_received",
            RealtimeEvent::AlertReceived { .. } => "alert_received",
            RealtimeEvent::PresenceChanged { .. } => "presence_changed",
            RealtimeEvent::PeerJoined { .. } => "peer_joined",
            RealtimeEvent::PeerInvited { .. } => "peer_invited",
        }
    }
}
