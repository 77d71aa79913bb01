//! Alert Data Structure
//!
//! Priority-tagged notices broadcast to every resident. The backend speaks
//! French field names (`contenu`, `priorite`, `statut`, `utilisateur`); both
//! spellings are accepted on input.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::message::DeliveryState;
use super::peer::RemoteId;
use crate::shared::error::PortalError;

/// Severity tag of an alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    #[default]
    Information,
    Important,
    Urgent,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Priority::Information => "information",
            Priority::Important => "important",
            Priority::Urgent => "urgent",
        };
        f.write_str(label)
    }
}

impl FromStr for Priority {
    type Err = PortalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "information" | "info" => Ok(Priority::Information),
            "important" => Ok(Priority::Important),
            "urgent" => Ok(Priority::Urgent),
            other => Err(PortalError::validation(
                "priority",
                format!("Unknown priority '{}'", other),
            )),
        }
    }
}

/// Lifecycle status of an alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    #[default]
    Active,
    Archived,
}

/// A broadcast alert
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Alert {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RemoteId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,
    #[serde(alias = "contenu")]
    pub content: String,
    #[serde(alias = "priorite", default)]
    pub priority: Priority,
    #[serde(alias = "statut", default)]
    pub status: AlertStatus,
    #[serde(alias = "utilisateur", default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    #[serde(alias = "timestamp", default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(skip)]
    pub delivery: DeliveryState,
}

impl Alert {
    /// Create an optimistic local alert in the `Pending` state
    pub fn local(content: String, priority: Priority, sender: Option<String>, correlation_id: Uuid) -> Self {
        Self {
            id: None,
            correlation_id: Some(correlation_id),
            content,
            priority,
            status: AlertStatus::Active,
            sender,
            created_at: Utc::now(),
            delivery: DeliveryState::Pending,
        }
    }

    /// Whether both entries describe the same logical alert
    pub fn same_as(&self, other: &Alert) -> bool {
        matches!((&self.id, &other.id), (Some(a), Some(b)) if a == b)
            || matches!(
                (self.correlation_id, other.correlation_id),
                (Some(a), Some(b)) if a == b
            )
    }

    /// Apply a partial update in place
    pub fn apply(&mut self, update: &AlertUpdate) {
        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(priority) = update.priority {
            self.priority = priority;
        }
        if let Some(content) = &update.content {
            self.content = content.clone();
        }
    }
}

/// What the backend answers to `POST /alerts`
///
/// Only identity, author and timestamp are read back. Priority and status
/// stay as the author chose them even when the answer leaves them out.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AlertReceipt {
    #[serde(default)]
    pub id: Option<RemoteId>,
    #[serde(default)]
    pub correlation_id: Option<Uuid>,
    #[serde(alias = "utilisateur", default)]
    pub sender: Option<String>,
    #[serde(alias = "timestamp", default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl From<Alert> for AlertReceipt {
    fn from(alert: Alert) -> Self {
        Self {
            id: alert.id,
            correlation_id: alert.correlation_id,
            sender: alert.sender,
            created_at: Some(alert.created_at),
        }
    }
}

/// Body of `POST /alerts`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreateAlertRequest {
    pub content: String,
    pub priority: Priority,
    pub status: AlertStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub correlation_id: Uuid,
}

/// Body of `PUT /alerts/{id}`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AlertUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<AlertStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl AlertUpdate {
    pub fn archive() -> Self {
        Self {
            status: Some(AlertStatus::Archived),
            ..Self::default()
        }
    }
}
