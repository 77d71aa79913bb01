//! REST API Client
//!
//! Async access to the portal backend. Every request carries the bearer
//! token and the CSRF header of the session; responses may be wrapped in a
//! `{"data": ...}` envelope, which is unwrapped here so callers only ever
//! see the payload.

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::client::config::Session;
use crate::shared::error::{PortalError, Result};
use crate::shared::messaging::{
    Alert, AlertReceipt, AlertUpdate, ChatMessage, ConversationKey, CreateAlertRequest,
    CreateMessageRequest, InviteRequest, MessageReceipt, Peer, PeerId, RemoteId,
};

/// Calls the session client makes against the backend
#[async_trait]
pub trait PortalApi: Send + Sync {
    /// `GET /users`
    async fn list_users(&self) -> Result<Vec<Peer>>;
    /// `POST /users/invite`
    async fn invite_user(&self, request: &InviteRequest) -> Result<Peer>;
    /// `PATCH /users/{id}/toggle-status`
    async fn toggle_user_status(&self, user_id: &PeerId, active: bool) -> Result<()>;
    /// `GET /chats/{id}/messages`
    async fn fetch_messages(&self, key: &ConversationKey) -> Result<Vec<ChatMessage>>;
    /// `POST /chats/{id}/messages`
    async fn create_message(&self, request: &CreateMessageRequest) -> Result<MessageReceipt>;
    /// `POST /chats/{id}/mark-read`
    async fn mark_read(&self, key: &ConversationKey) -> Result<()>;
    /// `GET /alerts`
    async fn list_alerts(&self) -> Result<Vec<Alert>>;
    /// `POST /alerts`
    async fn create_alert(&self, request: &CreateAlertRequest) -> Result<AlertReceipt>;
    /// `PUT /alerts/{id}`
    async fn update_alert(&self, alert_id: &RemoteId, update: &AlertUpdate) -> Result<()>;
    /// `DELETE /alerts/{id}`
    async fn delete_alert(&self, alert_id: &RemoteId) -> Result<()>;
}

/// Payloads arrive either bare or wrapped in `{"data": ...}`
#[derive(Deserialize)]
#[serde(untagged)]
enum Envelope<T> {
    Wrapped { data: T },
    Bare(T),
}

impl<T> Envelope<T> {
    fn into_inner(self) -> T {
        match self {
            Envelope::Wrapped { data } => data,
            Envelope::Bare(value) => value,
        }
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

/// reqwest-backed implementation of [`PortalApi`]
#[derive(Debug, Clone)]
pub struct HttpPortalApi {
    session: Session,
    client: Client,
}

impl HttpPortalApi {
    pub fn new(session: Session) -> Result<Self> {
        let client = Client::builder()
            .timeout(session.app().request_timeout)
            .build()?;
        Ok(Self { session, client })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let mut request = self
            .client
            .request(method, self.session.api_url(path))
            .header("Accept", "application/json");

        if let Some(token) = self.session.auth_token() {
            request = request.bearer_auth(token);
        }
        if let Some(csrf) = self.session.csrf_token() {
            request = request.header("X-CSRF-TOKEN", csrf);
        }
        request
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&body)
            .map(|e| e.message)
            .unwrap_or_else(|_| format!("Request failed: {}", status));
        tracing::warn!(status = status.as_u16(), "portal API rejected request: {}", message);
        Err(PortalError::http_status(status.as_u16(), message))
    }

    async fn json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = self.send(request).await?;
        let envelope = response.json::<Envelope<T>>().await?;
        Ok(envelope.into_inner())
    }

    /// Decode the answer to a create call. A 2xx means the item is stored,
    /// so an empty body is an empty receipt rather than an error.
    async fn receipt<T: DeserializeOwned + Default>(&self, request: RequestBuilder) -> Result<T> {
        let body = self.send(request).await?.text().await?;
        if body.trim().is_empty() {
            return Ok(T::default());
        }
        Ok(serde_json::from_str::<Envelope<T>>(&body)?.into_inner())
    }
}

#[async_trait]
impl PortalApi for HttpPortalApi {
    async fn list_users(&self) -> Result<Vec<Peer>> {
        self.json(self.request(Method::GET, "/users")).await
    }

    async fn invite_user(&self, request: &InviteRequest) -> Result<Peer> {
        self.json(self.request(Method::POST, "/users/invite").json(request))
            .await
    }

    async fn toggle_user_status(&self, user_id: &PeerId, active: bool) -> Result<()> {
        let path = format!("/users/{}/toggle-status", user_id);
        let body = serde_json::json!({ "actif": active });
        self.send(self.request(Method::PATCH, &path).json(&body)).await?;
        Ok(())
    }

    async fn fetch_messages(&self, key: &ConversationKey) -> Result<Vec<ChatMessage>> {
        let path = format!("/chats/{}/messages", key);
        self.json(self.request(Method::GET, &path)).await
    }

    async fn create_message(&self, request: &CreateMessageRequest) -> Result<MessageReceipt> {
        let path = format!("/chats/{}/messages", request.chat_id);
        tracing::debug!(chat_id = %request.chat_id, correlation_id = %request.correlation_id, "creating message");
        self.receipt(self.request(Method::POST, &path).json(request)).await
    }

    async fn mark_read(&self, key: &ConversationKey) -> Result<()> {
        let path = format!("/chats/{}/mark-read", key);
        self.send(self.request(Method::POST, &path)).await?;
        Ok(())
    }

    async fn list_alerts(&self) -> Result<Vec<Alert>> {
        self.json(self.request(Method::GET, "/alerts")).await
    }

    async fn create_alert(&self, request: &CreateAlertRequest) -> Result<AlertReceipt> {
        tracing::debug!(priority = %request.priority, correlation_id = %request.correlation_id, "creating alert");
        self.receipt(self.request(Method::POST, "/alerts").json(request)).await
    }

    async fn update_alert(&self, alert_id: &RemoteId, update: &AlertUpdate) -> Result<()> {
        let path = format!("/alerts/{}", alert_id);
        self.send(self.request(Method::PUT, &path).json(update)).await?;
        Ok(())
    }

    async fn delete_alert(&self, alert_id: &RemoteId) -> Result<()> {
        let path = format!("/alerts/{}", alert_id);
        self.send(self.request(Method::DELETE, &path)).await?;
        Ok(())
    }
}
