//! Peer Data Structure
//!
//! Represents another resident reachable for a direct conversation.

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::sync::OnceLock;

use super::message::{validate_content, ConversationKey};
use crate::shared::error::{self, PortalError};

const EMAIL_PATTERN: &str = r"^[^\s@]+@[^\s@]+\.[^\s@]+$";

/// Opaque identifier issued by the backend.
///
/// The backend hands out integer ids for some records and strings for
/// others; both are kept verbatim as strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct RemoteId(String);

/// Identifier of a peer (a user record on the backend)
pub type PeerId = RemoteId;

impl RemoteId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RemoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RemoteId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for RemoteId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<u64> for RemoteId {
    fn from(value: u64) -> Self {
        Self(value.to_string())
    }
}

impl<'de> Deserialize<'de> for RemoteId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Unsigned(u64),
            Signed(i64),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Text(s) => Self(s),
            Raw::Unsigned(n) => Self(n.to_string()),
            Raw::Signed(n) => Self(n.to_string()),
        })
    }
}

/// Online/offline status of a peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Presence {
    Online,
    #[default]
    Offline,
}

impl Presence {
    pub fn is_online(self) -> bool {
        self == Presence::Online
    }
}

impl fmt::Display for Presence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Presence::Online => f.write_str("online"),
            Presence::Offline => f.write_str("offline"),
        }
    }
}

/// The directory encodes presence as an `online` boolean.
mod presence_flag {
    use super::Presence;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(presence: &Presence, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bool(presence.is_online())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Presence, D::Error> {
        let online = Option::<bool>::deserialize(deserializer)?.unwrap_or(false);
        Ok(if online { Presence::Online } else { Presence::Offline })
    }
}

/// A resident reachable for direct conversation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Peer {
    /// Backend user id
    pub id: PeerId,
    /// Display name
    #[serde(alias = "username")]
    pub name: String,
    /// Current presence
    #[serde(rename = "online", with = "presence_flag", default)]
    pub presence: Presence,
    /// Messages received while the conversation was not active
    #[serde(default)]
    pub unread_count: u32,
    /// Server-issued conversation id, when one exists
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<RemoteId>,
}

impl Peer {
    /// Create an offline peer with no unread messages
    pub fn new(id: impl Into<PeerId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            presence: Presence::Offline,
            unread_count: 0,
            chat_id: None,
        }
    }

    pub fn with_presence(mut self, presence: Presence) -> Self {
        self.presence = presence;
        self
    }

    pub fn with_chat_id(mut self, chat_id: impl Into<RemoteId>) -> Self {
        self.chat_id = Some(chat_id.into());
        self
    }

    /// Key of the conversation with this peer
    pub fn conversation_key(&self) -> ConversationKey {
        match &self.chat_id {
            Some(chat_id) => ConversationKey::from(chat_id.clone()),
            None => ConversationKey::for_peer(&self.id),
        }
    }
}

/// Body of `POST /users/invite`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InviteRequest {
    pub username: String,
    pub email: String,
    pub invited_by: PeerId,
}

impl InviteRequest {
    /// Validated invite; both fields are trimmed
    pub fn new(username: &str, email: &str, invited_by: PeerId) -> error::Result<Self> {
        let username = validate_content("username", username)?;
        let email = email.trim();
        if !is_valid_email(email) {
            return Err(PortalError::validation("email", "Please enter a valid email address"));
        }
        Ok(Self {
            username,
            email: email.to_string(),
            invited_by,
        })
    }
}

fn is_valid_email(email: &str) -> bool {
    static EMAIL: OnceLock<Option<Regex>> = OnceLock::new();
    EMAIL
        .get_or_init(|| Regex::new(EMAIL_PATTERN).ok())
        .as_ref()
        .is_some_and(|re| re.is_match(email))
}
