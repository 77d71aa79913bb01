//! Shared Error Types
//!
//! This module defines the error taxonomy used across the realtime session
//! client. None of these errors is fatal: callers either surface them as a
//! transient notification, reject the input inline, or silently degrade to
//! request/response mode.
//!
//! # Error Categories
//!
//! - `NetworkFailure` - HTTP request rejected, non-2xx status, or transport error
//! - `ValidationFailure` - Input rejected before any network call
//! - `TransportUnavailable` - No realtime channel configured or it is closed
//! - `SerializationError` - JSON serialization/deserialization failures
//!
//! # Usage
//!
//! ```rust
//! use residence_portal::shared::error::PortalError;
//!
//! let error = PortalError::validation("content", "Message cannot be empty");
//! assert!(error.is_validation());
//! ```
use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, PortalError>;

/// Errors raised by the session client
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PortalError {
    /// Network call failed or returned a non-success status
    #[error("Network failure: {message}")]
    NetworkFailure {
        /// Human-readable error message
        message: String,
        /// HTTP status code when the server answered
        status: Option<u16>,
    },

    /// Input failed validation
    #[error("Validation error in field '{field}': {message}")]
    ValidationFailure {
        /// The field that failed validation
        field: String,
        /// Human-readable error message
        message: String,
    },

    /// Realtime transport is not configured or not connected
    #[error("Transport unavailable: {message}")]
    TransportUnavailable {
        /// Human-readable error message
        message: String,
    },

    /// JSON serialization or deserialization error
    #[error("Serialization error: {message}")]
    SerializationError {
        /// Human-readable error message
        message: String,
    },
}

impl PortalError {
    /// Create a network failure without an HTTP status
    pub fn network(message: impl Into<String>) -> Self {
        Self::NetworkFailure {
            message: message.into(),
            status: None,
        }
    }

    /// Create a network failure for a non-success HTTP status
    pub fn http_status(status: u16, message: impl Into<String>) -> Self {
        Self::NetworkFailure {
            message: message.into(),
            status: Some(status),
        }
    }

    /// Create a new validation error
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ValidationFailure {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a transport unavailable error
    pub fn transport_unavailable(message: impl Into<String>) -> Self {
        Self::TransportUnavailable {
            message: message.into(),
        }
    }

    /// Create a new serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }

    pub fn is_network(&self) -> bool {
        matches!(self, Self::NetworkFailure { .. })
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::ValidationFailure { .. })
    }

    pub fn is_transport_unavailable(&self) -> bool {
        matches!(self, Self::TransportUnavailable { .. })
    }

    /// HTTP status carried by a network failure, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::NetworkFailure { status, .. } => *status,
            _ => None,
        }
    }
}

impl From<serde_json::Error> for PortalError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(format!("JSON error: {}", err))
    }
}

impl From<reqwest::Error> for PortalError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return Self::serialization(format!("Failed to parse response: {}", err));
        }
        Self::NetworkFailure {
            message: format!("Network error: {}", err),
            status: err.status().map(|s| s.as_u16()),
        }
    }
}
