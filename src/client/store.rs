//! Conversation State Store
//!
//! The single source of truth the view layer renders from. It owns the peer
//! directory, every cached conversation, the active conversation and the
//! alert feed. All mutation goes through `&mut self`; the owner is expected
//! to drive it from one execution context, so nothing here is locked.
//!
//! Each mutation publishes a [`StoreChange`] on a broadcast channel. Work the
//! store cannot do itself (fetching history, telling the backend a
//! conversation was read) is handed back to the caller as a [`Followup`].

use std::collections::HashMap;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::client::notify::Notification;
use crate::client::offline::reconciliation;
use crate::shared::error::{PortalError, Result};
use crate::shared::event::RealtimeEvent;
use crate::shared::messaging::{
    validate_content, Alert, AlertUpdate, ChatMessage, Conversation, ConversationKey, Peer, PeerId,
    Presence, RemoteId,
};

const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// Change notification published after every mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreChange {
    DirectoryChanged,
    PeerAdded(PeerId),
    PresenceChanged { peer_id: PeerId, presence: Presence },
    UnreadChanged { peer_id: PeerId, unread_count: u32 },
    ActiveConversationChanged(ConversationKey),
    MessagesChanged(ConversationKey),
    AlertsChanged,
    Notification(Notification),
}

/// Work the store's owner has to carry out against the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Followup {
    FetchHistory(ConversationKey),
    MarkRead(ConversationKey),
    ReloadDirectory,
}

#[derive(Debug, Clone)]
struct ActiveConversation {
    peer_id: PeerId,
    key: ConversationKey,
    loading: bool,
}

/// What the message pane shows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationContent<'a> {
    /// Explicit "no messages yet" placeholder
    Empty,
    Messages(&'a [ChatMessage]),
}

/// Read-only view of the active conversation
#[derive(Debug, Clone, Copy)]
pub struct ActiveView<'a> {
    pub peer: Option<&'a Peer>,
    pub key: &'a ConversationKey,
    /// A history fetch is outstanding
    pub loading: bool,
    pub content: ConversationContent<'a>,
}

/// Read-only view over the whole store
#[derive(Debug, Clone, Copy)]
pub struct StoreView<'a> {
    store: &'a ConversationStore,
}

impl<'a> StoreView<'a> {
    pub fn peers(&self) -> &'a [Peer] {
        &self.store.peers
    }

    pub fn alerts(&self) -> &'a [Alert] {
        &self.store.alerts
    }

    pub fn total_unread(&self) -> u32 {
        self.store.peers.iter().map(|p| p.unread_count).sum()
    }

    pub fn active(&self) -> Option<ActiveView<'a>> {
        let active = self.store.active.as_ref()?;
        let content = match self.store.conversations.get(&active.key) {
            Some(conversation) if !conversation.is_empty() => ConversationContent::Messages(conversation.messages()),
            _ => ConversationContent::Empty,
        };
        Some(ActiveView {
            peer: self.store.peer(&active.peer_id),
            key: &active.key,
            loading: active.loading,
            content,
        })
    }
}

#[derive(Debug)]
pub struct ConversationStore {
    user_id: PeerId,
    peers: Vec<Peer>,
    conversations: HashMap<ConversationKey, Conversation>,
    active: Option<ActiveConversation>,
    alerts: Vec<Alert>,
    changes: broadcast::Sender<StoreChange>,
}

impl ConversationStore {
    pub fn new(user_id: PeerId) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            user_id,
            peers: Vec::new(),
            conversations: HashMap::new(),
            active: None,
            alerts: Vec::new(),
            changes,
        }
    }

    /// Subscribe to change notifications
    pub fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }

    pub fn view(&self) -> StoreView<'_> {
        StoreView { store: self }
    }

    pub fn user_id(&self) -> &PeerId {
        &self.user_id
    }

    pub fn peer(&self, peer_id: &PeerId) -> Option<&Peer> {
        self.peers.iter().find(|p| &p.id == peer_id)
    }

    pub fn conversation(&self, key: &ConversationKey) -> Option<&Conversation> {
        self.conversations.get(key)
    }

    pub fn active_key(&self) -> Option<&ConversationKey> {
        self.active.as_ref().map(|a| &a.key)
    }

    pub fn is_active(&self, key: &ConversationKey) -> bool {
        self.active_key() == Some(key)
    }

    /// Publish a transient notice
    pub fn notify(&self, notification: Notification) {
        self.emit(StoreChange::Notification(notification));
    }

    fn emit(&self, change: StoreChange) {
        // No subscriber is not an error.
        let _ = self.changes.send(change);
    }

    // ---- directory -------------------------------------------------------

    /// Replace the peer directory with a fresh listing
    pub fn load_directory(&mut self, mut peers: Vec<Peer>) {
        if let Some(active) = &self.active {
            for peer in peers.iter_mut().filter(|p| p.id == active.peer_id) {
                peer.unread_count = 0;
            }
        }
        tracing::debug!(count = peers.len(), "directory loaded");
        self.peers = peers;
        self.emit(StoreChange::DirectoryChanged);
    }

    /// Insert a peer unless one with the same id is already known
    pub fn add_peer(&mut self, peer: Peer) -> bool {
        if self.peer(&peer.id).is_some() {
            tracing::debug!(peer_id = %peer.id, "peer already known");
            return false;
        }
        let peer_id = peer.id.clone();
        self.peers.push(peer);
        self.emit(StoreChange::PeerAdded(peer_id));
        true
    }

    fn set_presence(&mut self, peer_id: &PeerId, presence: Presence) {
        let Some(peer) = self.peers.iter_mut().find(|p| &p.id == peer_id) else {
            tracing::debug!(%peer_id, "presence for unknown peer ignored");
            return;
        };
        if peer.presence == presence {
            return;
        }
        peer.presence = presence;
        self.emit(StoreChange::PresenceChanged {
            peer_id: peer_id.clone(),
            presence,
        });
    }

    // ---- conversations ---------------------------------------------------

    /// Make the conversation with `peer_id` the active one.
    ///
    /// Clears the peer's unread counter. Cached messages stay visible until
    /// the requested history arrives.
    pub fn select_peer(&mut self, peer_id: &PeerId) -> Result<Vec<Followup>> {
        let peer = self
            .peers
            .iter_mut()
            .find(|p| &p.id == peer_id)
            .ok_or_else(|| PortalError::validation("peer", format!("Unknown peer '{}'", peer_id)))?;

        let key = peer.conversation_key();
        let cleared = peer.unread_count != 0;
        peer.unread_count = 0;

        self.conversations
            .entry(key.clone())
            .or_insert_with(|| Conversation::new(key.clone()));
        self.active = Some(ActiveConversation {
            peer_id: peer_id.clone(),
            key: key.clone(),
            loading: true,
        });

        tracing::debug!(%peer_id, conversation = %key, "peer selected");
        if cleared {
            self.emit(StoreChange::UnreadChanged {
                peer_id: peer_id.clone(),
                unread_count: 0,
            });
        }
        self.emit(StoreChange::ActiveConversationChanged(key.clone()));
        Ok(vec![Followup::FetchHistory(key.clone()), Followup::MarkRead(key)])
    }

    /// Apply a history response.
    ///
    /// Returns `false` when the response belongs to a conversation that is no
    /// longer active; such responses are discarded.
    pub fn apply_history(&mut self, key: &ConversationKey, history: Vec<ChatMessage>) -> bool {
        if !self.is_active(key) {
            tracing::debug!(conversation = %key, "discarding stale history");
            return false;
        }
        if let Some(active) = self.active.as_mut() {
            active.loading = false;
        }
        self.conversations
            .entry(key.clone())
            .or_insert_with(|| Conversation::new(key.clone()))
            .merge_history(history);
        self.emit(StoreChange::MessagesChanged(key.clone()));
        true
    }

    /// A history fetch failed; keep whatever is cached
    pub fn history_failed(&mut self, key: &ConversationKey) {
        if let Some(active) = self.active.as_mut().filter(|a| &a.key == key) {
            active.loading = false;
            self.emit(StoreChange::MessagesChanged(key.clone()));
        }
    }

    /// Insert a `Pending` message into the active conversation
    pub fn append_local_message(&mut self, content: &str, correlation_id: Uuid) -> Result<ConversationKey> {
        let content = validate_content("content", content)?;
        let key = self
            .active_key()
            .cloned()
            .ok_or_else(|| PortalError::validation("conversation", "No conversation selected"))?;

        let message = ChatMessage::local(self.user_id.clone(), content, correlation_id);
        self.conversations
            .entry(key.clone())
            .or_insert_with(|| Conversation::new(key.clone()))
            .push(message);
        self.emit(StoreChange::MessagesChanged(key.clone()));
        Ok(key)
    }

    pub fn message(&self, key: &ConversationKey, correlation_id: Uuid) -> Option<&ChatMessage> {
        self.conversations.get(key)?.find_by_correlation(correlation_id)
    }

    /// Mutate the local entry with `correlation_id`; `false` if it is gone
    pub fn update_message(
        &mut self,
        key: &ConversationKey,
        correlation_id: Uuid,
        update: impl FnOnce(&mut ChatMessage),
    ) -> bool {
        let Some(message) = self
            .conversations
            .get_mut(key)
            .and_then(|c| c.find_by_correlation_mut(correlation_id))
        else {
            return false;
        };
        update(message);
        self.emit(StoreChange::MessagesChanged(key.clone()));
        true
    }

    /// Clear the unread counter of the peer behind `key`
    pub fn mark_read(&mut self, key: &ConversationKey) -> bool {
        let mut changed = Vec::new();
        for peer in self.peers.iter_mut().filter(|p| &p.conversation_key() == key) {
            if peer.unread_count != 0 {
                peer.unread_count = 0;
                changed.push(peer.id.clone());
            }
        }
        for peer_id in &changed {
            self.emit(StoreChange::UnreadChanged {
                peer_id: peer_id.clone(),
                unread_count: 0,
            });
        }
        !changed.is_empty()
    }

    // ---- alerts ----------------------------------------------------------

    pub fn alerts(&self) -> &[Alert] {
        &self.alerts
    }

    pub fn alert_by_correlation(&self, correlation_id: Uuid) -> Option<&Alert> {
        self.alerts.iter().find(|a| a.correlation_id == Some(correlation_id))
    }

    /// Replace the feed with the server listing, keeping unacknowledged local alerts
    pub fn load_alerts(&mut self, alerts: Vec<Alert>) {
        let local = std::mem::replace(&mut self.alerts, alerts);
        for entry in local {
            if !self.alerts.iter().any(|a| a.same_as(&entry)) {
                self.alerts.push(entry);
            }
        }
        self.emit(StoreChange::AlertsChanged);
    }

    pub fn append_local_alert(&mut self, alert: Alert) {
        self.alerts.push(alert);
        self.emit(StoreChange::AlertsChanged);
    }

    pub fn update_local_alert(&mut self, correlation_id: Uuid, update: impl FnOnce(&mut Alert)) -> bool {
        let Some(alert) = self
            .alerts
            .iter_mut()
            .find(|a| a.correlation_id == Some(correlation_id))
        else {
            return false;
        };
        update(alert);
        self.emit(StoreChange::AlertsChanged);
        true
    }

    /// Apply an acknowledged edit to the alert with server id `alert_id`
    pub fn update_alert(&mut self, alert_id: &RemoteId, update: &AlertUpdate) -> bool {
        let Some(alert) = self.alerts.iter_mut().find(|a| a.id.as_ref() == Some(alert_id)) else {
            return false;
        };
        alert.apply(update);
        self.emit(StoreChange::AlertsChanged);
        true
    }

    pub fn remove_alert(&mut self, alert_id: &RemoteId) -> Option<Alert> {
        let index = self.alerts.iter().position(|a| a.id.as_ref() == Some(alert_id))?;
        let removed = self.alerts.remove(index);
        self.emit(StoreChange::AlertsChanged);
        Some(removed)
    }

    // ---- push events -----------------------------------------------------

    /// Fold a push event from the connection manager into the store
    pub fn apply_inbound(&mut self, event: RealtimeEvent) -> Option<Followup> {
        tracing::debug!(kind = event.kind(), "applying push event");
        match event {
            RealtimeEvent::MessageReceived {
                conversation_key,
                message,
            } => self.receive_message(conversation_key, message),
            RealtimeEvent::AlertReceived { alert } => {
                self.receive_alert(alert);
                None
            }
            RealtimeEvent::PresenceChanged { peer_id, presence } => {
                self.set_presence(&peer_id, presence);
                None
            }
            RealtimeEvent::PeerJoined { peer } => {
                let name = peer.name.clone();
                if self.add_peer(peer) {
                    self.notify(Notification::success(format!("{} joined the conversation", name)));
                }
                None
            }
            RealtimeEvent::PeerInvited { .. } => Some(Followup::ReloadDirectory),
        }
    }

    fn receive_message(&mut self, key: ConversationKey, message: ChatMessage) -> Option<Followup> {
        if self.is_active(&key) {
            let conversation = self
                .conversations
                .entry(key.clone())
                .or_insert_with(|| Conversation::new(key.clone()));
            match conversation.find_same_mut(&message) {
                Some(existing) => reconciliation::reconcile_message(existing, message.into()),
                None => conversation.push(message),
            }
            self.emit(StoreChange::MessagesChanged(key.clone()));
            return Some(Followup::MarkRead(key));
        }

        if let Some(conversation) = self.conversations.get_mut(&key) {
            if conversation.find_same_mut(&message).is_some() {
                tracing::debug!(conversation = %key, "duplicate message ignored");
                return None;
            }
            conversation.push(message.clone());
        }

        if message.sender_id == self.user_id {
            return None;
        }

        let index = self
            .peers
            .iter()
            .position(|p| p.conversation_key() == key)
            .or_else(|| self.peers.iter().position(|p| p.id == message.sender_id));
        if let Some(i) = index {
            let peer = &mut self.peers[i];
            peer.unread_count += 1;
            let change = StoreChange::UnreadChanged {
                peer_id: peer.id.clone(),
                unread_count: peer.unread_count,
            };
            self.emit(change);
        }
        self.notify(Notification::info(format!("New message from {}", message.sender_label())));
        None
    }

    fn receive_alert(&mut self, alert: Alert) {
        if let Some(existing) = self.alerts.iter_mut().find(|a| a.same_as(&alert)) {
            reconciliation::reconcile_alert(existing, alert.into());
            self.emit(StoreChange::AlertsChanged);
            return;
        }
        self.alerts.push(alert);
        self.emit(StoreChange::AlertsChanged);
        self.notify(Notification::info("New alert received"));
    }
}
