//! Configuration management for postbox
//!
//! This module provides a layered configuration system that loads settings from:
//! 1. Default values (embedded in structs)
//! 2. TOML configuration file
//! 3. Environment variables (highest priority)
//!
//! # Usage
//!
//! ```no_run
//! use postbox::config::Config;
//!
//! let config = Config::load().expect("Failed to load configuration");
//! println!("Identity control: {}", config.session.identity_field);
//! ```
//!
//! # Environment Variables
//!
//! Configuration can be overridden using environment variables with the pattern:
//! `POSTBOX__<section>__<key>`
//!
//! Examples:
//! - `POSTBOX__TRANSPORT__REQUEST_TIMEOUT_MS=60000`
//! - `POSTBOX__RETRY__MAX_ATTEMPTS=5`
//! - `POSTBOX__ENDPOINTS__ORDERS=https://forms.example.com/upload`
//!
//! # Configuration File
//!
//! By default, the configuration is loaded from `config/postbox.toml`.
//! This can be overridden using the `POSTBOX_CONFIG` environment variable.

mod models;
mod sources;
mod validation;

pub use models::{Config, QueueConfig, RetryConfig, SessionConfig, TransportConfig};
pub use validation::ValidationError;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Configuration validation failed: {0}")]
    ValidationError(#[from] ValidationError),
}

impl Config {
    /// Load configuration from all sources (file + environment)
    ///
    /// Configuration is loaded with the following priority (highest to lowest):
    /// 1. Environment variables (`POSTBOX__*`)
    /// 2. TOML file (default: `config/postbox.toml`)
    /// 3. Default values
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration file is malformed
    /// - Validation fails (zero timeouts, inverted delay bounds, bad endpoints)
    pub fn load() -> Result<Self, ConfigError> {
        let config = sources::load()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific path
    ///
    /// Useful for testing with custom configuration files.
    pub fn load_from_path(path: std::path::PathBuf) -> Result<Self, ConfigError> {
        let config = sources::load_from_sources(path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        validation::validate(self)
    }
}
