use super::models::Config;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Timeout must be positive: {field} = 0")]
    ZeroTimeout { field: String },

    #[error("retry.base_delay_ms ({base}) exceeds retry.max_delay_ms ({max})")]
    DelayBoundsInverted { base: u64, max: u64 },

    #[error("retry.multiplier must be a finite value >= 1.0, got {0}")]
    InvalidMultiplier(f64),

    #[error("retry.max_attempts must be at least 1 when set")]
    ZeroMaxAttempts,

    #[error("session.identity_field must not be empty")]
    EmptyIdentityField,

    #[error("Endpoint for form '{form}' must be an http(s) URL, got '{url}'")]
    InvalidEndpoint { form: String, url: String },
}

/// Validate the entire configuration
pub fn validate(config: &Config) -> Result<(), ValidationError> {
    validate_transport(config)?;
    validate_retry(config)?;
    validate_session(config)?;
    validate_endpoints(config)?;
    Ok(())
}

fn validate_transport(config: &Config) -> Result<(), ValidationError> {
    if config.transport.connect_timeout_ms == 0 {
        return Err(ValidationError::ZeroTimeout {
            field: "transport.connect_timeout_ms".to_string(),
        });
    }

    if config.transport.request_timeout_ms == 0 {
        return Err(ValidationError::ZeroTimeout {
            field: "transport.request_timeout_ms".to_string(),
        });
    }

    Ok(())
}

/// Backoff bounds must be ordered and the growth factor must not shrink delays
fn validate_retry(config: &Config) -> Result<(), ValidationError> {
    let retry = &config.retry;

    if retry.base_delay_ms > retry.max_delay_ms {
        return Err(ValidationError::DelayBoundsInverted {
            base: retry.base_delay_ms,
            max: retry.max_delay_ms,
        });
    }

    if !retry.multiplier.is_finite() || retry.multiplier < 1.0 {
        return Err(ValidationError::InvalidMultiplier(retry.multiplier));
    }

    if retry.max_attempts == Some(0) {
        return Err(ValidationError::ZeroMaxAttempts);
    }

    Ok(())
}

fn validate_session(config: &Config) -> Result<(), ValidationError> {
    if config.session.identity_field.trim().is_empty() {
        return Err(ValidationError::EmptyIdentityField);
    }

    Ok(())
}

fn validate_endpoints(config: &Config) -> Result<(), ValidationError> {
    for (form, url) in &config.endpoints {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ValidationError::InvalidEndpoint {
                form: form.clone(),
                url: url.clone(),
            });
        }
    }

    Ok(())
}
