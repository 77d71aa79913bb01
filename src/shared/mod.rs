//! Shared Module
//!
//! Types shared by every part of the session client: the portal's data
//! model, the realtime wire envelopes, configuration, and the error
//! taxonomy. All of them are plain data and serialize to the JSON shapes
//! the backend and the realtime channel use.

/// Peers, messages, conversations and alerts
pub mod messaging;

/// Realtime wire envelopes
pub mod event;

/// Shared error types
pub mod error;

/// Application configuration
pub mod config;

/// Re-export commonly used types for convenience
pub use config::{AppConfig, AppConfigBuilder, BackoffStrategy, ConfigError};
pub use error::{PortalError, Result};
pub use event::{OutboundEvent, RealtimeEvent};
