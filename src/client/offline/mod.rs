//! # Optimistic Delivery
//!
//! Messages and alerts appear in the store the instant the user submits
//! them, marked `Pending`. The backend call then runs on its own; its
//! outcome either reconciles the entry with the server copy (and relays it
//! over the realtime channel) or marks it `Failed`, keeping the text for a
//! manual retry.
//!
//! ## Key Components
//!
//! - `optimistic.rs`: registry of unacknowledged items
//! - `reconciliation.rs`: folding server copies into local entries
//!
//! Delivery is split in three steps so the caller can keep the store on a
//! single execution context while the network call runs elsewhere:
//!
//! 1. [`DeliveryQueue::submit_message`] / [`DeliveryQueue::submit_alert`]
//!    mutate the store and return a [`Submission`]
//! 2. [`Submission::execute`] performs the REST call
//! 3. [`DeliveryQueue::complete`] applies the [`DeliveryOutcome`]
//!
//! [`DeliveryQueue::send_message`] and [`DeliveryQueue::send_alert`] chain
//! all three for callers that can simply await.

pub mod optimistic;
pub mod reconciliation;

pub use optimistic::{OutboundItem, OutboundKind, OutboundRegistry};

use chrono::Utc;
use uuid::Uuid;

use crate::client::api::PortalApi;
use crate::client::notify::Notification;
use crate::client::realtime::Publisher;
use crate::client::store::ConversationStore;
use crate::shared::error::{PortalError, Result};
use crate::shared::event::OutboundEvent;
use crate::shared::messaging::{
    validate_content, Alert, AlertReceipt, AlertStatus, ConversationKey, CreateAlertRequest,
    CreateMessageRequest, DeliveryState, MessageReceipt, Priority,
};

/// A REST call waiting to be executed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    Message(CreateMessageRequest),
    Alert(CreateAlertRequest),
}

impl Submission {
    pub fn correlation_id(&self) -> Uuid {
        match self {
            Submission::Message(request) => request.correlation_id,
            Submission::Alert(request) => request.correlation_id,
        }
    }

    /// Perform the backend call. Never touches client state.
    pub async fn execute(self, api: &dyn PortalApi) -> DeliveryOutcome {
        match self {
            Submission::Message(request) => DeliveryOutcome::Message {
                correlation_id: request.correlation_id,
                result: api.create_message(&request).await,
                conversation_key: request.chat_id,
            },
            Submission::Alert(request) => DeliveryOutcome::Alert {
                correlation_id: request.correlation_id,
                result: api.create_alert(&request).await,
            },
        }
    }
}

/// Result of an executed [`Submission`]
#[derive(Debug, Clone)]
pub enum DeliveryOutcome {
    Message {
        correlation_id: Uuid,
        conversation_key: ConversationKey,
        result: Result<MessageReceipt>,
    },
    Alert {
        correlation_id: Uuid,
        result: Result<AlertReceipt>,
    },
}

/// Optimistic send pipeline for messages and alerts
#[derive(Debug)]
pub struct DeliveryQueue {
    sender_name: Option<String>,
    outbound: OutboundRegistry,
}

impl DeliveryQueue {
    /// `sender_name` is attached to alerts as their author
    pub fn new(sender_name: Option<String>) -> Self {
        Self {
            sender_name,
            outbound: OutboundRegistry::new(),
        }
    }

    pub fn outbound(&self) -> &OutboundRegistry {
        &self.outbound
    }

    /// Show a message in the active conversation and prepare its REST call.
    ///
    /// Whitespace-only content or a missing active conversation is rejected
    /// without touching the store.
    pub fn submit_message(&mut self, store: &mut ConversationStore, content: &str) -> Result<Submission> {
        let correlation_id = Uuid::new_v4();
        let conversation_key = store.append_local_message(content, correlation_id)?;
        let content = store
            .message(&conversation_key, correlation_id)
            .map(|m| m.content.clone())
            .unwrap_or_default();

        self.outbound.track(OutboundItem::new(
            correlation_id,
            OutboundKind::Message {
                conversation_key: conversation_key.clone(),
            },
            content.clone(),
        ));
        tracing::debug!(%correlation_id, conversation = %conversation_key, "message submitted");

        Ok(Submission::Message(CreateMessageRequest {
            content,
            chat_id: conversation_key,
            sender_id: store.user_id().clone(),
            correlation_id,
        }))
    }

    /// Show an alert in the feed and prepare its REST call
    pub fn submit_alert(
        &mut self,
        store: &mut ConversationStore,
        content: &str,
        priority: Priority,
    ) -> Result<Submission> {
        let content = validate_content("content", content)?;
        let correlation_id = Uuid::new_v4();
        let alert = Alert::local(content.clone(), priority, self.sender_name.clone(), correlation_id);
        let timestamp = alert.created_at;
        store.append_local_alert(alert);

        self.outbound.track(OutboundItem::new(
            correlation_id,
            OutboundKind::Alert { priority },
            content.clone(),
        ));
        tracing::debug!(%correlation_id, %priority, "alert submitted");

        Ok(Submission::Alert(CreateAlertRequest {
            content,
            priority,
            status: AlertStatus::Active,
            sender: self.sender_name.clone(),
            timestamp,
            correlation_id,
        }))
    }

    /// Re-submit a `Failed` item with its original content
    pub fn retry(&mut self, store: &mut ConversationStore, correlation_id: Uuid) -> Result<Submission> {
        let item = self
            .outbound
            .restart(&correlation_id)
            .cloned()
            .ok_or_else(|| PortalError::validation("delivery", "Nothing to retry for this item"))?;
        tracing::info!(%correlation_id, attempt = item.attempts, "retrying delivery");

        match item.kind {
            OutboundKind::Message { conversation_key } => {
                store.update_message(&conversation_key, correlation_id, |m| {
                    m.delivery = DeliveryState::Pending
                });
                Ok(Submission::Message(CreateMessageRequest {
                    content: item.content,
                    chat_id: conversation_key,
                    sender_id: store.user_id().clone(),
                    correlation_id,
                }))
            }
            OutboundKind::Alert { priority } => {
                let mut timestamp = Utc::now();
                store.update_local_alert(correlation_id, |a| {
                    a.delivery = DeliveryState::Pending;
                    timestamp = a.created_at;
                });
                Ok(Submission::Alert(CreateAlertRequest {
                    content: item.content,
                    priority,
                    status: AlertStatus::Active,
                    sender: self.sender_name.clone(),
                    timestamp,
                    correlation_id,
                }))
            }
        }
    }

    /// Apply the outcome of an executed submission and return the final state
    /// of the entry.
    ///
    /// On success the entry is reconciled and relayed through `publisher` when
    /// the realtime channel is up. On failure it is marked `Failed` and one
    /// error notification is raised; nothing is relayed.
    pub fn complete(
        &mut self,
        store: &mut ConversationStore,
        publisher: &dyn Publisher,
        outcome: DeliveryOutcome,
    ) -> DeliveryState {
        match outcome {
            DeliveryOutcome::Message {
                correlation_id,
                conversation_key,
                result: Ok(receipt),
            } => {
                self.outbound.confirm(&correlation_id);
                store.update_message(&conversation_key, correlation_id, |m| {
                    reconciliation::reconcile_message(m, receipt)
                });
                match store.message(&conversation_key, correlation_id).cloned() {
                    Some(message) => publish(
                        publisher,
                        OutboundEvent::SendMessage {
                            chat_id: conversation_key,
                            message,
                        },
                    ),
                    None => tracing::warn!(%correlation_id, "acknowledged message no longer in store"),
                }
                DeliveryState::Sent
            }
            DeliveryOutcome::Message {
                correlation_id,
                conversation_key,
                result: Err(error),
            } => {
                tracing::warn!(%correlation_id, "message delivery failed: {}", error);
                self.outbound.fail(&correlation_id, error.to_string());
                store.update_message(&conversation_key, correlation_id, |m| {
                    m.delivery = DeliveryState::Failed
                });
                store.notify(Notification::error(format!("Message not sent: {}", error)));
                DeliveryState::Failed
            }
            DeliveryOutcome::Alert {
                correlation_id,
                result: Ok(receipt),
            } => {
                self.outbound.confirm(&correlation_id);
                store.update_local_alert(correlation_id, |a| reconciliation::reconcile_alert(a, receipt));
                match store.alert_by_correlation(correlation_id).cloned() {
                    Some(alert) => publish(publisher, OutboundEvent::SendAlert { alert }),
                    None => tracing::warn!(%correlation_id, "acknowledged alert no longer in store"),
                }
                store.notify(Notification::success("Alert sent"));
                DeliveryState::Sent
            }
            DeliveryOutcome::Alert {
                correlation_id,
                result: Err(error),
            } => {
                tracing::warn!(%correlation_id, "alert delivery failed: {}", error);
                self.outbound.fail(&correlation_id, error.to_string());
                store.update_local_alert(correlation_id, |a| a.delivery = DeliveryState::Failed);
                store.notify(Notification::error(format!("Alert not sent: {}", error)));
                DeliveryState::Failed
            }
        }
    }

    /// Submit, execute and complete a message in one go
    pub async fn send_message(
        &mut self,
        store: &mut ConversationStore,
        api: &dyn PortalApi,
        publisher: &dyn Publisher,
        content: &str,
    ) -> Result<DeliveryState> {
        let submission = self.submit_message(store, content)?;
        let outcome = submission.execute(api).await;
        Ok(self.complete(store, publisher, outcome))
    }

    /// Submit, execute and complete an alert in one go
    pub async fn send_alert(
        &mut self,
        store: &mut ConversationStore,
        api: &dyn PortalApi,
        publisher: &dyn Publisher,
        content: &str,
        priority: Priority,
    ) -> Result<DeliveryState> {
        let submission = self.submit_alert(store, content, priority)?;
        let outcome = submission.execute(api).await;
        Ok(self.complete(store, publisher, outcome))
    }
}

/// Relay to peers when the channel is up; otherwise they pick it up on reload
fn publish(publisher: &dyn Publisher, event: OutboundEvent) {
    let kind = event.kind();
    if !publisher.is_authenticated() {
        tracing::debug!(kind, "realtime channel down, relay skipped");
        return;
    }
    if let Err(e) = publisher.send(&event) {
        tracing::warn!(kind, "relay failed: {}", e);
    }
}
