//! Client configuration.
//!
//! Resolved from `TOOLHUB_*` environment variables with built-in defaults.
//! The CLI layers its own flags on top.

use std::time::Duration;

use thiserror::Error;

pub const DEFAULT_API_URL: &str = "http://localhost:3001/api";
pub const DEFAULT_WS_URL: &str = "ws://localhost:3001/ws";

const DEFAULT_RECONNECT_BASE_MS: u64 = 1_000;
const DEFAULT_RECONNECT_MAX_MS: u64 = 10_000;
const DEFAULT_RECONNECT_MAX_ATTEMPTS: u32 = 5;
const DEFAULT_PUSH_DURATION_MS: u64 = 5_000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key} must be a non-negative integer, got {value:?}")]
    InvalidNumber { key: &'static str, value: String },
}

/// Capped exponential backoff for the notification channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(DEFAULT_RECONNECT_BASE_MS),
            max_delay: Duration::from_millis(DEFAULT_RECONNECT_MAX_MS),
            max_attempts: DEFAULT_RECONNECT_MAX_ATTEMPTS,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the retry that follows `attempt` earlier retries.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        2u32.checked_pow(attempt)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Base URL of the REST API, without a trailing slash
    pub api_url: String,
    /// Notification channel endpoint
    pub ws_url: String,
    pub reconnect: ReconnectPolicy,
    /// Display time for pushed notifications that omit `duration`
    pub push_duration: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            ws_url: DEFAULT_WS_URL.to_string(),
            reconnect: ReconnectPolicy::default(),
            push_duration: Duration::from_millis(DEFAULT_PUSH_DURATION_MS),
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let mut config = Self::default();

        if let Some(url) = get("TOOLHUB_API_URL") {
            config.api_url = url.trim().trim_end_matches('/').to_string();
        }
        if let Some(url) = get("TOOLHUB_WS_URL") {
            config.ws_url = url.trim().to_string();
        }
        if let Some(ms) = parse_number(&get, "TOOLHUB_RECONNECT_BASE_MS")? {
            config.reconnect.base_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_number(&get, "TOOLHUB_RECONNECT_MAX_MS")? {
            config.reconnect.max_delay = Duration::from_millis(ms);
        }
        if let Some(attempts) = parse_number(&get, "TOOLHUB_RECONNECT_MAX_ATTEMPTS")? {
            config.reconnect.max_attempts =
                u32::try_from(attempts).map_err(|_| ConfigError::InvalidNumber {
                    key: "TOOLHUB_RECONNECT_MAX_ATTEMPTS",
                    value: attempts.to_string(),
                })?;
        }
        if let Some(ms) = parse_number(&get, "TOOLHUB_PUSH_DURATION_MS")? {
            config.push_duration = Duration::from_millis(ms);
        }

        Ok(config)
    }
}

fn parse_number<F>(get: &F, key: &'static str) -> Result<Option<u64>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    get(key)
        .map(|value| {
            value
                .trim()
                .parse::<u64>()
                .map_err(|_| ConfigError::InvalidNumber { key, value })
        })
        .transpose()
}
