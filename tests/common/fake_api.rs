//! In-memory `PortalApi` with scripted failures and latencies

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use residence_portal::client::api::PortalApi;
use residence_portal::shared::messaging::{
    Alert, AlertReceipt, AlertUpdate, ChatMessage, ConversationKey, CreateAlertRequest, CreateMessageRequest,
    DeliveryState, InviteRequest, MessageReceipt, Peer, PeerId, RemoteId,
};
use residence_portal::shared::{PortalError, Result};

#[derive(Default)]
pub struct FakeApi {
    users: Mutex<Vec<Peer>>,
    alerts: Mutex<Vec<Alert>>,
    history: Mutex<HashMap<ConversationKey, Vec<ChatMessage>>>,
    history_delay: Mutex<HashMap<ConversationKey, Duration>>,
    failing: Mutex<Vec<&'static str>>,
    calls: Mutex<Vec<String>>,
    next_id: AtomicU64,
    bare_receipts: AtomicBool,
}

impl FakeApi {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(100),
            ..Self::default()
        }
    }

    pub fn with_users(self, users: Vec<Peer>) -> Self {
        *self.users.lock().unwrap() = users;
        self
    }

    pub fn with_alerts(self, alerts: Vec<Alert>) -> Self {
        *self.alerts.lock().unwrap() = alerts;
        self
    }

    pub fn with_history(self, key: &str, messages: Vec<ChatMessage>) -> Self {
        self.history.lock().unwrap().insert(ConversationKey::from(key), messages);
        self
    }

    /// Delay the history response of `key`
    pub fn with_history_delay(self, key: &str, delay: Duration) -> Self {
        self.history_delay.lock().unwrap().insert(ConversationKey::from(key), delay);
        self
    }

    /// Answer create calls with nothing but the new id
    pub fn with_bare_receipts(self) -> Self {
        self.bare_receipts.store(true, Ordering::SeqCst);
        self
    }

    /// Make every call named `endpoint` fail with a network error
    pub fn failing(self, endpoint: &'static str) -> Self {
        self.fail(endpoint);
        self
    }

    pub fn fail(&self, endpoint: &'static str) {
        self.failing.lock().unwrap().push(endpoint);
    }

    pub fn recover(&self, endpoint: &'static str) {
        self.failing.lock().unwrap().retain(|e| *e != endpoint);
    }

    /// Every call made so far, as `name` or `name:argument`
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, endpoint: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| call.split(':').next() == Some(endpoint))
            .count()
    }

    fn record(&self, endpoint: &'static str, argument: Option<String>) -> Result<()> {
        let call = match argument {
            Some(argument) => format!("{}:{}", endpoint, argument),
            None => endpoint.to_string(),
        };
        self.calls.lock().unwrap().push(call);
        if self.failing.lock().unwrap().contains(&endpoint) {
            return Err(PortalError::network(format!("{} unreachable", endpoint)));
        }
        Ok(())
    }

    fn next_id(&self) -> RemoteId {
        RemoteId::from(self.next_id.fetch_add(1, Ordering::SeqCst))
    }
}

#[async_trait]
impl PortalApi for FakeApi {
    async fn list_users(&self) -> Result<Vec<Peer>> {
        self.record("list_users", None)?;
        Ok(self.users.lock().unwrap().clone())
    }

    async fn invite_user(&self, request: &InviteRequest) -> Result<Peer> {
        self.record("invite_user", Some(request.email.clone()))?;
        Ok(Peer::new(self.next_id(), request.username.clone()))
    }

    async fn toggle_user_status(&self, user_id: &PeerId, _active: bool) -> Result<()> {
        self.record("toggle_user_status", Some(user_id.to_string()))
    }

    async fn fetch_messages(&self, key: &ConversationKey) -> Result<Vec<ChatMessage>> {
        let delay = self.history_delay.lock().unwrap().get(key).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.record("fetch_messages", Some(key.to_string()))?;
        Ok(self.history.lock().unwrap().get(key).cloned().unwrap_or_default())
    }

    async fn create_message(&self, request: &CreateMessageRequest) -> Result<MessageReceipt> {
        self.record("create_message", Some(request.chat_id.to_string()))?;
        let mut message = ChatMessage::local(request.sender_id.clone(), request.content.clone(), request.correlation_id);
        message.id = Some(self.next_id());
        message.delivery = DeliveryState::Sent;
        self.history
            .lock()
            .unwrap()
            .entry(request.chat_id.clone())
            .or_default()
            .push(message.clone());
        if self.bare_receipts.load(Ordering::SeqCst) {
            return Ok(MessageReceipt {
                id: message.id,
                ..MessageReceipt::default()
            });
        }
        Ok(message.into())
    }

    async fn mark_read(&self, key: &ConversationKey) -> Result<()> {
        self.record("mark_read", Some(key.to_string()))
    }

    async fn list_alerts(&self) -> Result<Vec<Alert>> {
        self.record("list_alerts", None)?;
        Ok(self.alerts.lock().unwrap().clone())
    }

    async fn create_alert(&self, request: &CreateAlertRequest) -> Result<AlertReceipt> {
        self.record("create_alert", Some(request.priority.to_string()))?;
        let mut alert = Alert::local(
            request.content.clone(),
            request.priority,
            request.sender.clone(),
            request.correlation_id,
        );
        alert.id = Some(self.next_id());
        alert.delivery = DeliveryState::Sent;
        alert.status = request.status;
        self.alerts.lock().unwrap().push(alert.clone());
        if self.bare_receipts.load(Ordering::SeqCst) {
            return Ok(AlertReceipt {
                id: alert.id,
                ..AlertReceipt::default()
            });
        }
        Ok(alert.into())
    }

    async fn update_alert(&self, alert_id: &RemoteId, update: &AlertUpdate) -> Result<()> {
        self.record("update_alert", Some(alert_id.to_string()))?;
        if let Some(alert) = self
            .alerts
            .lock()
            .unwrap()
            .iter_mut()
            .find(|a| a.id.as_ref() == Some(alert_id))
        {
            alert.apply(update);
        }
        Ok(())
    }

    async fn delete_alert(&self, alert_id: &RemoteId) -> Result<()> {
        self.record("delete_alert", Some(alert_id.to_string()))?;
        self.alerts.lock().unwrap().retain(|a| a.id.as_ref() != Some(alert_id));
        Ok(())
    }
}
