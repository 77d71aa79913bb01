//! Messaging Module
//!
//! This module contains the data structures of the portal:
//!
//! - `Peer` - Another resident reachable for direct conversation
//! - `ChatMessage` - A message in a conversation, with its delivery state
//! - `Conversation` - The ordered messages exchanged with one peer
//! - `Alert` - A priority-tagged broadcast
//!
//! # Usage
//!
//! ```rust
//! use residence_portal::shared::messaging::{Alert, ChatMessage, Conversation, Peer};
//! ```

pub mod alert;
pub mod conversation;
pub mod message;
pub mod peer;

// Re-export all types
pub use alert::{Alert, AlertReceipt, AlertStatus, AlertUpdate, CreateAlertRequest, Priority};
pub use conversation::Conversation;
pub use message::{
    validate_content, ChatMessage, ConversationKey, CreateMessageRequest, DeliveryState, MessageReceipt,
};
pub use peer::{InviteRequest, Peer, PeerId, Presence, RemoteId};
