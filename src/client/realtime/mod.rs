//! # Connection Manager
//!
//! Owns the realtime socket. A background task opens the transport, sends
//! the `authenticate` frame, dispatches every inbound push to the registered
//! handlers and reconnects after a close. The manager never touches domain
//! state; subscribers receive typed [`RealtimeEvent`]s and apply them.
//!
//! ```rust,no_run
//! use residence_portal::client::config::Session;
//! use residence_portal::client::realtime::ConnectionManager;
//! use residence_portal::shared::AppConfig;
//!
//! # async fn demo() {
//! let session = Session::new("7", AppConfig::default());
//! let manager = ConnectionManager::websocket();
//! manager.on_event(|event| println!("push: {}", event.kind()));
//! manager.connect(&session);
//! # }
//! ```

pub mod machine;
pub mod retry;
pub mod transport;

pub use machine::{Action, ConnectionMachine, ConnectionState, Input};
pub use retry::ReconnectPolicy;
pub use transport::{Connector, TransportLink, WebSocketConnector};

use std::collections::VecDeque;
use std::future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Sleep;

use crate::client::config::Session;
use crate::shared::error::{PortalError, Result};
use crate::shared::event::{OutboundEvent, RealtimeEvent};
use crate::shared::messaging::PeerId;

/// Outbound side of the realtime channel, as seen by the delivery pipeline
pub trait Publisher: Send + Sync {
    fn is_authenticated(&self) -> bool;
    fn send(&self, event: &OutboundEvent) -> Result<()>;
}

pub type EventHandler = Arc<dyn Fn(&RealtimeEvent) + Send + Sync>;

enum Control {
    Shutdown(oneshot::Sender<()>),
}

struct Shared {
    state: watch::Sender<ConnectionState>,
    outgoing: Mutex<Option<mpsc::UnboundedSender<String>>>,
    handlers: Mutex<Vec<EventHandler>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    fn set_state(&self, next: ConnectionState) {
        self.state.send_if_modified(|state| {
            if *state == next {
                return false;
            }
            tracing::debug!(from = %state, to = %next, "connection state changed");
            *state = next;
            true
        });
    }

    fn write(&self, frame: String) -> Result<()> {
        let outgoing = lock(&self.outgoing);
        let sender = outgoing
            .as_ref()
            .ok_or_else(|| PortalError::transport_unavailable("No open realtime connection"))?;
        sender
            .send(frame)
            .map_err(|_| PortalError::transport_unavailable("Realtime connection closed"))
    }

    fn dispatch(&self, frame: &str) {
        match RealtimeEvent::parse(frame) {
            Ok(Some(event)) => {
                tracing::debug!(kind = event.kind(), "push event received");
                let handlers = lock(&self.handlers).clone();
                for handler in handlers {
                    handler(&event);
                }
            }
            Ok(None) => tracing::trace!("frame of unknown type ignored"),
            Err(e) => tracing::warn!("malformed realtime frame dropped: {}", e),
        }
    }
}

struct Running {
    control: mpsc::UnboundedSender<Control>,
    task: JoinHandle<()>,
}

pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    shared: Arc<Shared>,
    running: Mutex<Option<Running>>,
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            connector,
            shared: Arc::new(Shared {
                state,
                outgoing: Mutex::new(None),
                handlers: Mutex::new(Vec::new()),
            }),
            running: Mutex::new(None),
        }
    }

    /// Manager over a real WebSocket
    pub fn websocket() -> Self {
        Self::new(Arc::new(WebSocketConnector))
    }

    /// Start the connection loop for `session`.
    ///
    /// Without a socket address realtime is disabled and the manager stays
    /// `Disconnected`. Calling it again while the loop runs is a no-op.
    pub fn connect(&self, session: &Session) {
        let Some(url) = session.socket_url() else {
            tracing::info!("no socket address configured, realtime disabled");
            return;
        };

        let mut running = lock(&self.running);
        if running.as_ref().is_some_and(|r| !r.task.is_finished()) {
            tracing::debug!("connection loop already running");
            return;
        }

        let (control, control_rx) = mpsc::unbounded_channel();
        let connection = ConnectionLoop {
            connector: Arc::clone(&self.connector),
            shared: Arc::clone(&self.shared),
            url: url.to_string(),
            user_id: session.user_id().clone(),
            handshake_timeout: session.app().handshake_timeout,
            machine: ConnectionMachine::new(ReconnectPolicy::from_config(session.app())),
            control: control_rx,
        };
        let task = tokio::spawn(connection.run());
        *running = Some(Running { control, task });
    }

    /// Register a handler called for every inbound push
    pub fn on_event(&self, handler: impl Fn(&RealtimeEvent) + Send + Sync + 'static) {
        lock(&self.shared.handlers).push(Arc::new(handler));
    }

    /// Channel fed with every inbound push
    pub fn events(&self) -> mpsc::UnboundedReceiver<RealtimeEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.on_event(move |event| {
            let _ = tx.send(event.clone());
        });
        rx
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state() == ConnectionState::Authenticated
    }

    /// Send an event; fails with `TransportUnavailable` unless authenticated
    pub fn send(&self, event: &OutboundEvent) -> Result<()> {
        if !self.is_authenticated() {
            return Err(PortalError::transport_unavailable(format!(
                "Cannot send {} while {}",
                event.kind(),
                self.state()
            )));
        }
        self.shared.write(event.to_json()?)
    }

    /// Say goodbye, close the transport and cancel any pending reconnect
    pub async fn shutdown(&self) {
        let Some(running) = lock(&self.running).take() else {
            return;
        };
        let (done, acknowledged) = oneshot::channel();
        if running.control.send(Control::Shutdown(done)).is_ok() {
            let _ = acknowledged.await;
        }
        if let Err(e) = running.task.await {
            tracing::warn!("connection loop ended abnormally: {}", e);
        }
        self.shared.set_state(ConnectionState::Disconnected);
    }
}

impl Publisher for ConnectionManager {
    fn is_authenticated(&self) -> bool {
        ConnectionManager::is_authenticated(self)
    }

    fn send(&self, event: &OutboundEvent) -> Result<()> {
        ConnectionManager::send(self, event)
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(running) = lock(&self.running).take() {
            running.task.abort();
        }
    }
}

/// State owned by the background task
struct ConnectionLoop {
    connector: Arc<dyn Connector>,
    shared: Arc<Shared>,
    url: String,
    user_id: PeerId,
    handshake_timeout: Duration,
    machine: ConnectionMachine,
    control: mpsc::UnboundedReceiver<Control>,
}

impl ConnectionLoop {
    async fn run(mut self) {
        let mut pending: VecDeque<Action> = self.machine.handle(Input::Connect).into();
        let mut incoming: Option<mpsc::UnboundedReceiver<String>> = None;
        let mut timer: Option<Pin<Box<Sleep>>> = None;
        let mut acknowledge: Option<oneshot::Sender<()>> = None;

        loop {
            while let Some(action) = pending.pop_front() {
                match action {
                    Action::OpenTransport => {
                        self.shared.set_state(ConnectionState::Connecting);
                        match self.open().await {
                            Opening::Opened(link) => {
                                *lock(&self.shared.outgoing) = Some(link.outgoing);
                                incoming = Some(link.incoming);
                                pending.extend(self.machine.handle(Input::Opened));
                            }
                            Opening::Failed => pending.extend(self.machine.handle(Input::OpenFailed)),
                            Opening::Interrupted(done) => {
                                acknowledge = done;
                                pending.extend(self.machine.handle(Input::Shutdown));
                            }
                        }
                    }
                    Action::SendAuthenticate => {
                        let frame = OutboundEvent::Authenticate {
                            user_id: self.user_id.clone(),
                        };
                        match frame.to_json().and_then(|json| self.shared.write(json)) {
                            Ok(()) => tracing::info!(url = %self.url, "realtime channel authenticated"),
                            Err(e) => tracing::warn!("authenticate frame not sent: {}", e),
                        }
                    }
                    Action::ScheduleReconnect(delay) => {
                        tracing::info!(delay_ms = delay.as_millis() as u64, attempt = self.machine.attempts(), "reconnect scheduled");
                        timer = Some(Box::pin(tokio::time::sleep(delay)));
                    }
                    Action::CancelTimer => timer = None,
                    Action::CloseTransport => {
                        lock(&self.shared.outgoing).take();
                        incoming = None;
                    }
                    Action::GiveUp => {
                        tracing::warn!(attempts = self.machine.attempts(), "reconnect limit reached, realtime disabled");
                    }
                }
            }
            self.shared.set_state(self.machine.state());

            if self.machine.is_stopped() {
                break;
            }

            tokio::select! {
                frame = next_frame(&mut incoming) => match frame {
                    Some(frame) => self.shared.dispatch(&frame),
                    None => {
                        tracing::info!("realtime connection closed");
                        lock(&self.shared.outgoing).take();
                        incoming = None;
                        pending.extend(self.machine.handle(Input::Closed));
                    }
                },
                _ = expiry(&mut timer) => {
                    timer = None;
                    pending.extend(self.machine.handle(Input::TimerFired));
                }
                control = self.control.recv() => {
                    acknowledge = match control {
                        Some(Control::Shutdown(done)) => Some(done),
                        None => None,
                    };
                    self.say_goodbye();
                    pending.extend(self.machine.handle(Input::Shutdown));
                }
            }
        }

        self.shared.set_state(ConnectionState::Disconnected);
        if let Some(done) = acknowledge {
            let _ = done.send(());
        }
        tracing::debug!("connection loop stopped");
    }

    /// Open the transport within the handshake timeout, unless shut down first
    async fn open(&mut self) -> Opening {
        let attempt = tokio::time::timeout(self.handshake_timeout, self.connector.connect(&self.url));
        tokio::select! {
            result = attempt => match result {
                Ok(Ok(link)) => Opening::Opened(link),
                Ok(Err(e)) => {
                    tracing::warn!(url = %self.url, "realtime connection failed: {}", e);
                    Opening::Failed
                }
                Err(_) => {
                    tracing::warn!(url = %self.url, timeout_ms = self.handshake_timeout.as_millis() as u64, "realtime handshake timed out");
                    Opening::Failed
                }
            },
            control = self.control.recv() => match control {
                Some(Control::Shutdown(done)) => Opening::Interrupted(Some(done)),
                None => Opening::Interrupted(None),
            },
        }
    }

    fn say_goodbye(&self) {
        if self.machine.state() != ConnectionState::Authenticated {
            return;
        }
        let frame = OutboundEvent::UserDisconnect {
            user_id: self.user_id.clone(),
        };
        if let Err(e) = frame.to_json().and_then(|json| self.shared.write(json)) {
            tracing::debug!("user_disconnect not sent: {}", e);
        }
    }
}

enum Opening {
    Opened(TransportLink),
    Failed,
    Interrupted(Option<oneshot::Sender<()>>),
}

async fn next_frame(incoming: &mut Option<mpsc::UnboundedReceiver<String>>) -> Option<String> {
    match incoming {
        Some(rx) => rx.recv().await,
        None => future::pending().await,
    }
}

async fn expiry(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(sleep) => sleep.as_mut().await,
        None => future::pending().await,
    }
}
