//! Reconnect delays.

use std::time::Duration;

use crate::shared::config::{AppConfig, BackoffStrategy};

/// Decides how long to wait before each reconnect attempt, and when to stop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    backoff: BackoffStrategy,
    max_attempts: Option<u32>,
}

impl ReconnectPolicy {
    pub fn new(backoff: BackoffStrategy, max_attempts: Option<u32>) -> Self {
        Self { backoff, max_attempts }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.backoff, config.max_reconnect_attempts)
    }

    /// Delay before consecutive attempt number `attempt` (1-based), or
    /// `None` once the cap is exceeded.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if self.max_attempts.is_some_and(|max| attempt > max) {
            return None;
        }
        let delay = match self.backoff {
            BackoffStrategy::Fixed(delay) => delay,
            BackoffStrategy::Exponential { base, max } => {
                let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
                base.saturating_mul(factor).min(max)
            }
        };
        Some(delay)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(BackoffStrategy::default(), None)
    }
}
