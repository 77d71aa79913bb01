//! # State Reconciliation
//!
//! Folds the server's answer for an item into the optimistic entry already
//! on screen. The entry keeps its position, its correlation id and what the
//! author typed; the server contributes identity and timestamp, and only
//! those fields it actually sent.

use crate::shared::messaging::{Alert, AlertReceipt, ChatMessage, DeliveryState, MessageReceipt};

/// Merge the server's receipt for a message into the local entry
pub fn reconcile_message(local: &mut ChatMessage, receipt: MessageReceipt) {
    if let Some(id) = receipt.id {
        local.id = Some(id);
    }
    if local.correlation_id.is_none() {
        local.correlation_id = receipt.correlation_id;
    }
    if receipt.sender_name.is_some() {
        local.sender_name = receipt.sender_name;
    }
    if let Some(created_at) = receipt.created_at {
        local.created_at = created_at;
    }
    local.delivery = DeliveryState::Sent;
}

/// Merge the server's receipt for an alert into the local entry.
/// Priority, status and content are never taken from the receipt.
pub fn reconcile_alert(local: &mut Alert, receipt: AlertReceipt) {
    if let Some(id) = receipt.id {
        local.id = Some(id);
    }
    if local.correlation_id.is_none() {
        local.correlation_id = receipt.correlation_id;
    }
    if receipt.sender.is_some() {
        local.sender = receipt.sender;
    }
    if let Some(created_at) = receipt.created_at {
        local.created_at = created_at;
    }
    local.delivery = DeliveryState::Sent;
}
