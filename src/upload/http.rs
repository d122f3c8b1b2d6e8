//! reqwest-backed transport posting forms as multipart data

use async_trait::async_trait;
use reqwest::multipart;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

use super::form::FormSubmission;
use super::transport::{Result, Transport, TransportError, UploadResponse};
use crate::config::TransportConfig;

/// HTTP client configuration
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(300),
            user_agent: concat!("postbox/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl From<&TransportConfig> for HttpConfig {
    fn from(config: &TransportConfig) -> Self {
        Self {
            connect_timeout: Duration::from_millis(config.connect_timeout_ms),
            request_timeout: Duration::from_millis(config.request_timeout_ms),
            user_agent: config.user_agent.clone(),
        }
    }
}

/// Multipart form poster
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(config: HttpConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| TransportError::RequestFailed(e.to_string()))?;

        Ok(Self { client })
    }

    fn build_form(submission: FormSubmission) -> Result<multipart::Form> {
        let mut form = multipart::Form::new();

        for (name, value) in submission.fields {
            form = form.text(name, value);
        }

        let payload = submission.file.payload;
        let part = multipart::Part::bytes(payload.data.to_vec())
            .file_name(payload.file_name)
            .mime_str(payload.content_type.as_ref())
            .map_err(|e| TransportError::InvalidPart(e.to_string()))?;

        Ok(form.part(submission.file.name, part))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post(&self, submission: FormSubmission) -> Result<UploadResponse> {
        let url = submission.url.clone();
        let form_id = submission.form_id.clone();
        let size = submission.file.payload.len();

        debug!(url, %form_id, size, "Posting upload form");

        let form = Self::build_form(submission)?;

        let response = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout
                } else {
                    TransportError::RequestFailed(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("Unknown").to_string(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError::RequestFailed(format!("Failed to read body: {}", e)))?;

        debug!(url, %form_id, status = status.as_u16(), size = body.len(), "Upload form accepted");

        Ok(UploadResponse {
            status: status.as_u16(),
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransportConfig;

    #[test]
    fn test_http_config_defaults() {
        let config = HttpConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.request_timeout, Duration::from_secs(300));
        assert!(config.user_agent.starts_with("postbox/"));
    }

    #[test]
    fn test_http_config_from_transport_config() {
        let transport = TransportConfig {
            connect_timeout_ms: 1500,
            request_timeout_ms: 20_000,
            user_agent: "tests/1.0".to_string(),
        };

        let config = HttpConfig::from(&transport);
        assert_eq!(config.connect_timeout, Duration::from_millis(1500));
        assert_eq!(config.request_timeout, Duration::from_secs(20));
        assert_eq!(config.user_agent, "tests/1.0");
    }
}
