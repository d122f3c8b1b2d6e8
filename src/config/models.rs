use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::upload::DEFAULT_IDENTITY_FIELD;

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub session: SessionConfig,
    /// Upload URL per form id
    #[serde(default)]
    pub endpoints: BTreeMap<String, String>,
}

/// HTTP transport configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransportConfig {
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_request_timeout_ms() -> u64 {
    300_000 // large files over slow links
}

fn default_user_agent() -> String {
    concat!("postbox/", env!("CARGO_PKG_VERSION")).to_string()
}

/// Retry policy for failed transfers
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Total attempts per item. Absent means retry forever.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
            max_attempts: None,
        }
    }
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_multiplier() -> f64 {
    2.0
}

/// Admission into the upload queue
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct QueueConfig {
    /// Quiet period before a burst of requests is dispatched; 0 dispatches immediately
    #[serde(default)]
    pub debounce_ms: u64,
}

/// Per-session settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionConfig {
    /// Control that stays enabled during every upload post
    #[serde(default = "default_identity_field")]
    pub identity_field: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            identity_field: default_identity_field(),
        }
    }
}

fn default_identity_field() -> String {
    DEFAULT_IDENTITY_FIELD.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.transport.connect_timeout_ms, 10_000);
        assert_eq!(config.retry.base_delay_ms, 500);
        assert_eq!(config.retry.max_attempts, None);
        assert_eq!(config.queue.debounce_ms, 0);
        assert_eq!(config.session.identity_field, "$uuid");
        assert!(config.endpoints.is_empty());
    }
}
