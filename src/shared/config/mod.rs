//! Application configuration module
//!
//! Addresses of the REST collaborator and of the optional realtime socket,
//! plus the timing knobs of the connection manager. Configuration can be
//! built in code or read from a TOML file:
//!
//! ```toml
//! api_base_url = "https://residence.example/api"
//! socket_url = "wss://residence.example/ws"
//! reconnect_delay_ms = 3000
//! max_reconnect_attempts = 20
//! ```

use reqwest::Url;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Default REST base address
pub const DEFAULT_API_BASE_URL: &str = "http://127.0.0.1:8000/api";
/// Fixed delay between a socket close and the next connection attempt
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(3000);
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// How the delay between reconnect attempts evolves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffStrategy {
    /// Same delay before every attempt
    Fixed(Duration),
    /// Delay doubles per consecutive attempt, capped at `max`
    Exponential { base: Duration, max: Duration },
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        BackoffStrategy::Fixed(DEFAULT_RECONNECT_DELAY)
    }
}

/// Application configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    /// REST base address, without trailing slash
    pub api_base_url: String,
    /// Realtime socket address; `None` disables realtime
    pub socket_url: Option<String>,
    pub backoff: BackoffStrategy,
    /// Consecutive failed reconnects tolerated; `None` retries forever
    pub max_reconnect_attempts: Option<u32>,
    pub handshake_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            socket_url: None,
            backoff: BackoffStrategy::default(),
            max_reconnect_attempts: None,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl AppConfig {
    /// Create a new AppConfigBuilder
    pub fn builder() -> AppConfigBuilder {
        AppConfigBuilder::default()
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = toml::from_str(source).map_err(|e| ConfigError::Parse(e.to_string()))?;
        file.into_builder().build()
    }

    /// Read and validate a TOML file
    pub fn from_toml_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Parse(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&source)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let api = Url::parse(&self.api_base_url)
            .map_err(|_| ConfigError::InvalidUrl(self.api_base_url.clone()))?;
        if !matches!(api.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidUrl(self.api_base_url.clone()));
        }

        if let Some(socket_url) = &self.socket_url {
            let socket = Url::parse(socket_url).map_err(|_| ConfigError::InvalidUrl(socket_url.clone()))?;
            if !matches!(socket.scheme(), "ws" | "wss") {
                return Err(ConfigError::InvalidUrl(socket_url.clone()));
            }
        }

        if self.handshake_timeout.is_zero() {
            return Err(ConfigError::InvalidValue("handshake_timeout"));
        }
        Ok(())
    }

    /// Whether a realtime socket is configured
    pub fn realtime_enabled(&self) -> bool {
        self.socket_url.is_some()
    }

    /// Full URL for an API path such as `/users`
    pub fn api_url(&self, path: &str) -> String {
        format!("{}{}", self.api_base_url, path)
    }
}

/// Builder for AppConfig
#[derive(Debug, Default)]
pub struct AppConfigBuilder {
    api_base_url: Option<String>,
    socket_url: Option<String>,
    backoff: Option<BackoffStrategy>,
    max_reconnect_attempts: Option<u32>,
    handshake_timeout: Option<Duration>,
    request_timeout: Option<Duration>,
}

impl AppConfigBuilder {
    /// Set the REST base address
    pub fn api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = Some(url.into());
        self
    }

    /// Set the realtime socket address
    pub fn socket_url(mut self, url: impl Into<String>) -> Self {
        self.socket_url = Some(url.into());
        self
    }

    /// Use a fixed reconnect delay
    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.backoff = Some(BackoffStrategy::Fixed(delay));
        self
    }

    pub fn backoff(mut self, backoff: BackoffStrategy) -> Self {
        self.backoff = Some(backoff);
        self
    }

    pub fn max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = Some(attempts);
        self
    }

    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = Some(timeout);
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<AppConfig, ConfigError> {
        let defaults = AppConfig::default();
        let config = AppConfig {
            api_base_url: self
                .api_base_url
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.api_base_url),
            socket_url: self.socket_url.filter(|url| !url.trim().is_empty()),
            backoff: self.backoff.unwrap_or(defaults.backoff),
            max_reconnect_attempts: self.max_reconnect_attempts,
            handshake_timeout: self.handshake_timeout.unwrap_or(defaults.handshake_timeout),
            request_timeout: self.request_timeout.unwrap_or(defaults.request_timeout),
        };
        config.validate()?;
        Ok(config)
    }
}

/// On-disk representation, durations in milliseconds
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    api_base_url: Option<String>,
    socket_url: Option<String>,
    reconnect_delay_ms: Option<u64>,
    max_reconnect_delay_ms: Option<u64>,
    max_reconnect_attempts: Option<u32>,
    handshake_timeout_ms: Option<u64>,
    request_timeout_ms: Option<u64>,
}

impl ConfigFile {
    fn into_builder(self) -> AppConfigBuilder {
        let mut builder = AppConfig::builder();
        if let Some(url) = self.api_base_url {
            builder = builder.api_base_url(url);
        }
        if let Some(url) = self.socket_url {
            builder = builder.socket_url(url);
        }
        let base = self.reconnect_delay_ms.map(Duration::from_millis);
        builder = match (base, self.max_reconnect_delay_ms) {
            (Some(base), Some(max)) => builder.backoff(BackoffStrategy::Exponential {
                base,
                max: Duration::from_millis(max),
            }),
            (Some(base), None) => builder.reconnect_delay(base),
            (None, Some(max)) => builder.backoff(BackoffStrategy::Exponential {
                base: DEFAULT_RECONNECT_DELAY,
                max: Duration::from_millis(max),
            }),
            (None, None) => builder,
        };
        if let Some(attempts) = self.max_reconnect_attempts {
            builder = builder.max_reconnect_attempts(attempts);
        }
        if let Some(ms) = self.handshake_timeout_ms {
            builder = builder.handshake_timeout(Duration::from_millis(ms));
        }
        if let Some(ms) = self.request_timeout_ms {
            builder = builder.request_timeout(Duration::from_millis(ms));
        }
        builder
    }
}

/// Configuration errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    #[error("missing value: {0}")]
    MissingValue(&'static str),
    #[error("invalid value: {0}")]
    InvalidValue(&'static str),
    #[error("cannot parse configuration: {0}")]
    Parse(String),
}
