//! # Portal Client
//!
//! The session client of the residence portal. [`PortalClient`] is the one
//! place where state changes: it owns the [`ConversationStore`] and the
//! [`DeliveryQueue`], receives user commands, applies push events from the
//! [`ConnectionManager`] and folds in the results of REST calls, which run
//! as spawned tasks and report back over a channel.
//!
//! ```rust,no_run
//! use residence_portal::client::{ClientCommand, PortalClient};
//! use residence_portal::client::config::Session;
//! use residence_portal::shared::AppConfig;
//! use tokio::sync::mpsc;
//!
//! # async fn demo() -> residence_portal::shared::Result<()> {
//! let session = Session::new("7", AppConfig::default());
//! let mut client = PortalClient::from_session(session)?;
//! let (commands, rx) = mpsc::channel(32);
//! client.start();
//! commands.send(ClientCommand::SendMessage("Bonjour".into())).await.ok();
//! client.run(rx).await;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod config;
pub mod notify;
pub mod offline;
pub mod realtime;
pub mod store;

use std::future::Future;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

use crate::shared::error::{PortalError, Result};
use crate::shared::event::{OutboundEvent, RealtimeEvent};
use crate::shared::messaging::{
    Alert, AlertUpdate, ChatMessage, ConversationKey, InviteRequest, Peer, PeerId, Priority, RemoteId,
};
use api::{HttpPortalApi, PortalApi};
use config::Session;
use notify::Notification;
use offline::{DeliveryOutcome, DeliveryQueue, Submission};
use realtime::{ConnectionManager, Publisher};
use store::{ConversationStore, Followup, StoreChange};

/// What the user asked for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    SelectPeer(PeerId),
    SendMessage(String),
    SendAlert { content: String, priority: Priority },
    /// Re-submit a failed message or alert
    Retry(Uuid),
    InviteUser { username: String, email: String },
    RefreshDirectory,
    RefreshAlerts,
    UpdateAlert { alert_id: RemoteId, update: AlertUpdate },
    DeleteAlert(RemoteId),
    /// Enable or disable a resident account
    SetResidentActive { peer_id: PeerId, active: bool },
    Shutdown,
}

/// Result of a REST call, applied back on the driver
#[derive(Debug)]
enum Completion {
    Directory(Result<Vec<Peer>>),
    Alerts(Result<Vec<Alert>>),
    History {
        key: ConversationKey,
        result: Result<Vec<ChatMessage>>,
    },
    MarkedRead {
        key: ConversationKey,
        result: Result<()>,
    },
    Delivery(DeliveryOutcome),
    Invited(Result<Peer>),
    AlertUpdated {
        alert_id: RemoteId,
        update: AlertUpdate,
        result: Result<()>,
    },
    AlertDeleted {
        alert_id: RemoteId,
        result: Result<()>,
    },
    ResidentToggled {
        peer_id: PeerId,
        active: bool,
        result: Result<()>,
    },
}

pub struct PortalClient {
    session: Session,
    api: Arc<dyn PortalApi>,
    connection: ConnectionManager,
    store: ConversationStore,
    queue: DeliveryQueue,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions: mpsc::UnboundedReceiver<Completion>,
    events: mpsc::UnboundedReceiver<RealtimeEvent>,
    in_flight: usize,
}

impl PortalClient {
    pub fn new(session: Session, api: Arc<dyn PortalApi>, connection: ConnectionManager) -> Self {
        let (completions_tx, completions) = mpsc::unbounded_channel();
        let events = connection.events();
        let store = ConversationStore::new(session.user_id().clone());
        let queue = DeliveryQueue::new(session.display_name().map(str::to_string));
        Self {
            session,
            api,
            connection,
            store,
            queue,
            completions_tx,
            completions,
            events,
            in_flight: 0,
        }
    }

    /// Client over HTTP and a WebSocket
    pub fn from_session(session: Session) -> Result<Self> {
        let api = HttpPortalApi::new(session.clone())?;
        Ok(Self::new(session, Arc::new(api), ConnectionManager::websocket()))
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    pub fn queue(&self) -> &DeliveryQueue {
        &self.queue
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.store.subscribe()
    }

    /// Connect realtime and load the directory and the alert feed
    pub fn start(&mut self) {
        tracing::info!(user_id = %self.session.user_id(), "starting portal client");
        self.connection.connect(&self.session);
        self.reload_directory();
        self.reload_alerts();
    }

    /// Apply one user command.
    ///
    /// Validation failures are returned to the caller and leave every piece
    /// of state untouched.
    pub async fn handle_command(&mut self, command: ClientCommand) -> Result<()> {
        match command {
            ClientCommand::SelectPeer(peer_id) => {
                for followup in self.store.select_peer(&peer_id)? {
                    self.follow_up(followup);
                }
            }
            ClientCommand::SendMessage(content) => {
                let submission = self.queue.submit_message(&mut self.store, &content)?;
                self.deliver(submission);
            }
            ClientCommand::SendAlert { content, priority } => {
                let submission = self.queue.submit_alert(&mut self.store, &content, priority)?;
                self.deliver(submission);
            }
            ClientCommand::Retry(correlation_id) => {
                let submission = self.queue.retry(&mut self.store, correlation_id)?;
                self.deliver(submission);
            }
            ClientCommand::InviteUser { username, email } => {
                let request = InviteRequest::new(&username, &email, self.session.user_id().clone())?;
                self.spawn(|api| async move { Completion::Invited(api.invite_user(&request).await) });
            }
            ClientCommand::RefreshDirectory => self.reload_directory(),
            ClientCommand::RefreshAlerts => self.reload_alerts(),
            ClientCommand::UpdateAlert { alert_id, update } => {
                self.spawn(|api| async move {
                    let result = api.update_alert(&alert_id, &update).await;
                    Completion::AlertUpdated {
                        alert_id,
                        update,
                        result,
                    }
                });
            }
            ClientCommand::DeleteAlert(alert_id) => {
                self.spawn(|api| async move {
                    let result = api.delete_alert(&alert_id).await;
                    Completion::AlertDeleted { alert_id, result }
                });
            }
            ClientCommand::SetResidentActive { peer_id, active } => {
                if self.store.peer(&peer_id).is_none() {
                    return Err(PortalError::validation("peer", format!("Unknown resident '{}'", peer_id)));
                }
                self.spawn(|api| async move {
                    let result = api.toggle_user_status(&peer_id, active).await;
                    Completion::ResidentToggled { peer_id, active, result }
                });
            }
            ClientCommand::Shutdown => self.shutdown().await,
        }
        Ok(())
    }

    /// Fold a push event into the store
    pub fn apply_event(&mut self, event: RealtimeEvent) {
        if let Some(followup) = self.store.apply_inbound(event) {
            self.follow_up(followup);
        }
    }

    /// Apply completions and push events until no REST call is outstanding
    pub async fn settle(&mut self) {
        while self.in_flight > 0 {
            let Some(completion) = self.completions.recv().await else {
                break;
            };
            self.apply_completion(completion);
        }
        while let Ok(event) = self.events.try_recv() {
            self.apply_event(event);
        }
    }

    /// Drive the client until a `Shutdown` command or the command channel closes
    pub async fn run(mut self, mut commands: mpsc::Receiver<ClientCommand>) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(ClientCommand::Shutdown) | None => break,
                    Some(command) => {
                        if let Err(e) = self.handle_command(command).await {
                            tracing::debug!("command rejected: {}", e);
                            self.store.notify(Notification::error(e.to_string()));
                        }
                    }
                },
                _ = self.process_next() => {}
            }
        }
        self.shutdown().await;
    }

    /// Wait for one REST completion or push event and apply it
    pub async fn process_next(&mut self) {
        tokio::select! {
            Some(completion) = self.completions.recv() => self.apply_completion(completion),
            Some(event) = self.events.recv() => self.apply_event(event),
            else => std::future::pending::<()>().await,
        }
    }

    /// Announce departure and close the realtime channel
    pub async fn shutdown(&mut self) {
        tracing::info!("shutting down portal client");
        self.connection.shutdown().await;
    }

    fn deliver(&mut self, submission: Submission) {
        self.spawn(|api| async move { Completion::Delivery(submission.execute(api.as_ref()).await) });
    }

    fn reload_directory(&mut self) {
        self.spawn(|api| async move { Completion::Directory(api.list_users().await) });
    }

    fn reload_alerts(&mut self) {
        self.spawn(|api| async move { Completion::Alerts(api.list_alerts().await) });
    }

    fn follow_up(&mut self, followup: Followup) {
        match followup {
            Followup::FetchHistory(key) => self.spawn(|api| async move {
                let result = api.fetch_messages(&key).await;
                Completion::History { key, result }
            }),
            Followup::MarkRead(key) => self.spawn(|api| async move {
                let result = api.mark_read(&key).await;
                Completion::MarkedRead { key, result }
            }),
            Followup::ReloadDirectory => self.reload_directory(),
        }
    }

    fn spawn<F, Fut>(&mut self, call: F)
    where
        F: FnOnce(Arc<dyn PortalApi>) -> Fut,
        Fut: Future<Output = Completion> + Send + 'static,
    {
        let future = call(Arc::clone(&self.api));
        let completions = self.completions_tx.clone();
        self.in_flight += 1;
        tokio::spawn(async move {
            let _ = completions.send(future.await);
        });
    }

    fn apply_completion(&mut self, completion: Completion) {
        self.in_flight = self.in_flight.saturating_sub(1);
        match completion {
            Completion::Directory(Ok(peers)) => self.store.load_directory(peers),
            Completion::Directory(Err(e)) => {
                tracing::warn!("directory load failed: {}", e);
                self.store
                    .notify(Notification::error(format!("Could not load residents: {}", e)));
            }
            Completion::Alerts(Ok(alerts)) => self.store.load_alerts(alerts),
            Completion::Alerts(Err(e)) => {
                tracing::warn!("alert feed load failed: {}", e);
                self.store
                    .notify(Notification::error(format!("Could not load alerts: {}", e)));
            }
            Completion::History { key, result: Ok(history) } => {
                self.store.apply_history(&key, history);
            }
            Completion::History { key, result: Err(e) } => {
                tracing::warn!(conversation = %key, "history fetch failed: {}", e);
                self.store.history_failed(&key);
                if self.store.is_active(&key) {
                    self.store
                        .notify(Notification::error(format!("Could not load messages: {}", e)));
                }
            }
            Completion::MarkedRead { key, result } => match result {
                // Counters were cleared on selection; an ack for a conversation
                // left since then is stale.
                Ok(()) if self.store.is_active(&key) => {
                    self.store.mark_read(&key);
                }
                Ok(()) => tracing::debug!(conversation = %key, "stale mark-read ignored"),
                Err(e) => tracing::debug!(conversation = %key, "mark-read failed: {}", e),
            },
            Completion::Delivery(outcome) => {
                self.queue.complete(&mut self.store, &self.connection, outcome);
            }
            Completion::Invited(Ok(peer)) => {
                let name = peer.name.clone();
                if self.store.add_peer(peer.clone()) {
                    self.publish(OutboundEvent::UserInvited { user: peer });
                }
                self.store
                    .notify(Notification::success(format!("Invitation sent to {}", name)));
            }
            Completion::Invited(Err(e)) => {
                tracing::warn!("invite failed: {}", e);
                self.store.notify(Notification::error(format!("Invitation failed: {}", e)));
            }
            Completion::AlertUpdated {
                alert_id,
                update,
                result: Ok(()),
            } => {
                self.store.update_alert(&alert_id, &update);
            }
            Completion::AlertDeleted { alert_id, result: Ok(()) } => {
                self.store.remove_alert(&alert_id);
            }
            Completion::ResidentToggled {
                peer_id,
                active,
                result: Ok(()),
            } => {
                let name = self
                    .store
                    .peer(&peer_id)
                    .map_or_else(|| peer_id.to_string(), |p| p.name.clone());
                let verb = if active { "enabled" } else { "disabled" };
                tracing::info!(%peer_id, active, "resident account toggled");
                self.store
                    .notify(Notification::success(format!("Account of {} {}", name, verb)));
            }
            Completion::ResidentToggled {
                peer_id,
                result: Err(e),
                ..
            } => {
                tracing::warn!(%peer_id, "account toggle failed: {}", e);
                self.store
                    .notify(Notification::error(format!("Account could not be changed: {}", e)));
            }
            Completion::AlertUpdated { alert_id, result: Err(e), .. }
            | Completion::AlertDeleted { alert_id, result: Err(e) } => {
                tracing::warn!(%alert_id, "alert change failed: {}", e);
                self.store
                    .notify(Notification::error(format!("Alert could not be changed: {}", e)));
            }
        }
    }

    fn publish(&self, event: OutboundEvent) {
        if !self.connection.is_authenticated() {
            return;
        }
        if let Err(e) = Publisher::send(&self.connection, &event) {
            tracing::warn!(kind = event.kind(), "relay failed: {}", e);
        }
    }
}
