use super::models::Config;
use config::{ConfigError, Environment, File};
use std::env;
use std::path::PathBuf;

const CONFIG_ENV_VAR: &str = "POSTBOX_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config/postbox.toml";
const ENV_PREFIX: &str = "POSTBOX";
const ENV_SEPARATOR: &str = "__";

/// Load configuration from multiple sources with priority:
/// 1. Defaults (embedded in structs)
/// 2. TOML file (if exists)
/// 3. Environment variables from .env file (via dotenvy)
/// 4. System environment variables (highest priority)
pub fn load() -> Result<Config, ConfigError> {
    // A missing .env file is fine
    let _ = dotenvy::dotenv();

    let config_path = env::var(CONFIG_ENV_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));

    load_from_sources(config_path)
}

/// Load configuration from a specific path and environment
pub fn load_from_sources(config_path: PathBuf) -> Result<Config, ConfigError> {
    let mut builder = config::Config::builder();

    if config_path.exists() {
        tracing::info!("Loading configuration from: {}", config_path.display());
        builder = builder.add_source(File::from(config_path).required(false));
    } else {
        tracing::warn!(
            "Configuration file not found at {}, using defaults and environment overrides",
            config_path.display()
        );
    }

    // POSTBOX__RETRY__MAX_ATTEMPTS -> retry.max_attempts
    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator(ENV_SEPARATOR)
            .try_parsing(true),
    );

    let config = builder.build()?;
    config.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_load_defaults_only() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nonexistent.toml");

        let config = load_from_sources(config_path).unwrap();
        assert_eq!(config.transport.request_timeout_ms, 300_000);
        assert_eq!(config.session.identity_field, "$uuid");
    }

    #[test]
    fn test_load_from_toml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let toml_content = r#"
[transport]
connect_timeout_ms = 2000
user_agent = "intake/2.0"

[retry]
base_delay_ms = 250
max_attempts = 6

[queue]
debounce_ms = 50

[endpoints]
orders = "https://forms.example.com/xforms-server/upload"
        "#;

        fs::write(&config_path, toml_content).unwrap();

        let config = load_from_sources(config_path).unwrap();
        assert_eq!(config.transport.connect_timeout_ms, 2000);
        assert_eq!(config.transport.request_timeout_ms, 300_000);
        assert_eq!(config.transport.user_agent, "intake/2.0");
        assert_eq!(config.retry.base_delay_ms, 250);
        assert_eq!(config.retry.max_delay_ms, 30_000);
        assert_eq!(config.retry.max_attempts, Some(6));
        assert_eq!(config.queue.debounce_ms, 50);
        assert_eq!(
            config.endpoints["orders"],
            "https://forms.example.com/xforms-server/upload"
        );
    }
}
