//! Transport seam: how a captured form reaches the server

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

use super::form::FormSubmission;
use super::types::{FieldId, FormId};

/// Transient failure of a single transfer attempt
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Connection timeout")]
    Timeout,

    #[error("Server responded with HTTP {status}: {reason}")]
    Status { status: u16, reason: String },

    #[error("Invalid multipart part: {0}")]
    InvalidPart(String),
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// Raw server answer to a successful upload. Never interpreted here.
#[derive(Debug, Clone)]
pub struct UploadResponse {
    pub status: u16,
    pub body: Bytes,
}

/// Posts a captured form as multipart data.
///
/// Implementations do not need their own abort mechanism: the coordinator
/// aborts the task awaiting `post`, which drops the in-flight request.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn post(&self, submission: FormSubmission) -> Result<UploadResponse>;
}

/// Consumes the payload of a successful upload (e.g. applies it to document state)
pub trait ResponseHandler: Send + Sync {
    fn handle(&self, form_id: &FormId, field_id: &FieldId, response: UploadResponse);
}

/// Response handler that only traces what it receives
#[derive(Debug, Clone, Default)]
pub struct LogResponses;

impl ResponseHandler for LogResponses {
    fn handle(&self, form_id: &FormId, field_id: &FieldId, response: UploadResponse) {
        tracing::info!(
            %form_id,
            %field_id,
            status = response.status,
            size = response.body.len(),
            "Upload response received"
        );
    }
}

/// Upload URL per form
#[derive(Debug, Clone, Default)]
pub struct Endpoints {
    urls: HashMap<FormId, String>,
}

impl Endpoints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, form_id: impl Into<FormId>, url: impl Into<String>) {
        self.urls.insert(form_id.into(), url.into());
    }

    pub fn with(mut self, form_id: impl Into<FormId>, url: impl Into<String>) -> Self {
        self.insert(form_id, url);
        self
    }

    pub fn get(&self, form_id: &FormId) -> Option<&str> {
        self.urls.get(form_id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }
}

impl From<&BTreeMap<String, String>> for Endpoints {
    fn from(map: &BTreeMap<String, String>) -> Self {
        map.iter()
            .fold(Endpoints::new(), |endpoints, (form, url)| {
                endpoints.with(form.as_str(), url.as_str())
            })
    }
}
