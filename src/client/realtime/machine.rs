//! Connection state machine.
//!
//! Pure bookkeeping: inputs describe what happened to the transport, the
//! returned actions tell the manager's loop what to do about it. Keeping it
//! free of I/O makes the reconnect rules testable without a socket or a
//! clock.

use serde::Serialize;
use std::fmt;
use std::time::Duration;

use super::retry::ReconnectPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Authenticated,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Authenticated => "authenticated",
        };
        f.write_str(label)
    }
}

/// Something that happened to the connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Input {
    Connect,
    Opened,
    /// Handshake error or timeout
    OpenFailed,
    Closed,
    TimerFired,
    Shutdown,
}

/// Work the manager's loop must perform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    OpenTransport,
    SendAuthenticate,
    ScheduleReconnect(Duration),
    CancelTimer,
    CloseTransport,
    /// Reconnect cap reached; stay disconnected
    GiveUp,
}

#[derive(Debug, Clone)]
pub struct ConnectionMachine {
    state: ConnectionState,
    policy: ReconnectPolicy,
    attempts: u32,
    timer_pending: bool,
    stopped: bool,
}

impl ConnectionMachine {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            policy,
            attempts: 0,
            timer_pending: false,
            stopped: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn timer_pending(&self) -> bool {
        self.timer_pending
    }

    /// Consecutive failed attempts since the last authentication
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn handle(&mut self, input: Input) -> Vec<Action> {
        if self.stopped {
            return Vec::new();
        }
        match input {
            Input::Connect => self.on_connect(),
            Input::Opened => self.on_opened(),
            Input::OpenFailed | Input::Closed => self.on_lost(),
            Input::TimerFired => self.on_timer(),
            Input::Shutdown => self.on_shutdown(),
        }
    }

    fn on_connect(&mut self) -> Vec<Action> {
        if self.state != ConnectionState::Disconnected {
            return Vec::new();
        }
        let mut actions = Vec::new();
        if self.timer_pending {
            self.timer_pending = false;
            actions.push(Action::CancelTimer);
        }
        self.state = ConnectionState::Connecting;
        actions.push(Action::OpenTransport);
        actions
    }

    fn on_opened(&mut self) -> Vec<Action> {
        if self.state != ConnectionState::Connecting {
            return Vec::new();
        }
        self.state = ConnectionState::Authenticated;
        self.attempts = 0;
        vec![Action::SendAuthenticate]
    }

    fn on_lost(&mut self) -> Vec<Action> {
        if self.state == ConnectionState::Disconnected {
            // Duplicate close for a transport already given up on.
            return Vec::new();
        }
        self.state = ConnectionState::Disconnected;
        if self.timer_pending {
            return Vec::new();
        }
        self.attempts += 1;
        match self.policy.delay_for(self.attempts) {
            Some(delay) => {
                self.timer_pending = true;
                vec![Action::ScheduleReconnect(delay)]
            }
            None => {
                self.stopped = true;
                vec![Action::GiveUp]
            }
        }
    }

    fn on_timer(&mut self) -> Vec<Action> {
        if !self.timer_pending {
            return Vec::new();
        }
        self.timer_pending = false;
        if self.state != ConnectionState::Disconnected {
            return Vec::new();
        }
        self.state = ConnectionState::Connecting;
        vec![Action::OpenTransport]
    }

    fn on_shutdown(&mut self) -> Vec<Action> {
        let mut actions = Vec::new();
        if self.timer_pending {
            self.timer_pending = false;
            actions.push(Action::CancelTimer);
        }
        if self.state != ConnectionState::Disconnected {
            actions.push(Action::CloseTransport);
        }
        self.state = ConnectionState::Disconnected;
        self.stopped = true;
        actions
    }
}
