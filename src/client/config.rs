use crate::shared::config::{AppConfig, AppConfigBuilder, ConfigError};
use crate::shared::messaging::PeerId;

/// Identity and addresses of the logged-in resident.
#[derive(Debug, Clone)]
pub struct Session {
    user_id: PeerId,
    display_name: Option<String>,
    auth_token: Option<String>,
    csrf_token: Option<String>,
    app: AppConfig,
}

impl Session {
    pub fn new(user_id: impl Into<PeerId>, app: AppConfig) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: None,
            auth_token: None,
            csrf_token: None,
            app,
        }
    }

    pub fn with_builder(user_id: impl Into<PeerId>, builder: AppConfigBuilder) -> Result<Self, ConfigError> {
        Ok(Self::new(user_id, builder.build()?))
    }

    /// Build a session from `PORTAL_*` environment variables.
    ///
    /// `base` supplies everything the environment leaves unset.
    pub fn from_env(base: AppConfig) -> Result<Self, ConfigError> {
        let user_id = std::env::var("PORTAL_USER_ID").map_err(|_| ConfigError::MissingValue("PORTAL_USER_ID"))?;

        let mut builder = AppConfig::builder()
            .api_base_url(std::env::var("PORTAL_API_URL").unwrap_or(base.api_base_url))
            .backoff(base.backoff)
            .handshake_timeout(base.handshake_timeout)
            .request_timeout(base.request_timeout);
        if let Some(socket_url) = std::env::var("PORTAL_SOCKET_URL").ok().or(base.socket_url) {
            builder = builder.socket_url(socket_url);
        }
        if let Some(attempts) = base.max_reconnect_attempts {
            builder = builder.max_reconnect_attempts(attempts);
        }

        let mut session = Self::new(user_id, builder.build()?);
        session.display_name = std::env::var("PORTAL_USER_NAME").ok();
        session.auth_token = std::env::var("PORTAL_TOKEN").ok();
        session.csrf_token = std::env::var("PORTAL_CSRF_TOKEN").ok();
        Ok(session)
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn with_csrf_token(mut self, token: impl Into<String>) -> Self {
        self.csrf_token = Some(token.into());
        self
    }

    pub fn user_id(&self) -> &PeerId {
        &self.user_id
    }

    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    pub fn auth_token(&self) -> Option<&str> {
        self.auth_token.as_deref()
    }

    pub fn csrf_token(&self) -> Option<&str> {
        self.csrf_token.as_deref()
    }

    pub fn app(&self) -> &AppConfig {
        &self.app
    }

    /// Get the full URL for an API endpoint
    pub fn api_url(&self, path: &str) -> String {
        self.app.api_url(path)
    }

    pub fn socket_url(&self) -> Option<&str> {
        self.app.socket_url.as_deref()
    }
}
