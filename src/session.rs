//! Upload session: one queue and one coordinator per document
//!
//! A session replaces process-wide upload state. Every form created through
//! [`UploadSession::form`] carries the session identity control, and every
//! upload requested through the session goes through the same serialized queue.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::Config;
use crate::observability::{Metrics, MetricsSnapshot};
use crate::queue::{AdmissionPolicy, QueueError, SequentialQueue};
use crate::upload::{
    Collaborators, Endpoints, EventDispatcher, ExponentialBackoff, FieldId, FieldState, Form,
    FormId, ResponseHandler, RetryPolicy, Transport, UploadCoordinator, UploadError,
    UploadField, UploadRequest,
};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Field {0} is already uploading")]
    FieldBusy(FieldId),

    #[error("Field {field} does not belong to form {form}")]
    ForeignField { form: FormId, field: FieldId },

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Upload(#[from] UploadError),
}

pub type Result<T> = std::result::Result<T, SessionError>;

pub struct UploadSession {
    id: Uuid,
    identity_field: String,
    queue: SequentialQueue<UploadRequest>,
    coordinator: UploadCoordinator,
    metrics: Arc<Metrics>,
    forms: Mutex<HashMap<FormId, Arc<Form>>>,
}

#[bon::bon]
impl UploadSession {
    /// Build a session from configuration.
    ///
    /// Collaborators left unset fall back to the logging defaults and to
    /// the backoff described by `config.retry`.
    #[builder]
    pub fn new(
        config: Config,
        transport: Arc<dyn Transport>,
        events: Option<Arc<dyn EventDispatcher>>,
        responses: Option<Arc<dyn ResponseHandler>>,
        retry: Option<Arc<dyn RetryPolicy>>,
        metrics: Option<Arc<Metrics>>,
    ) -> Self {
        let id = Uuid::new_v4();
        let metrics = metrics.unwrap_or_default();
        let retry = retry.unwrap_or_else(|| Arc::new(ExponentialBackoff::from(&config.retry)));

        let mut deps = Collaborators::new(transport, Endpoints::from(&config.endpoints))
            .with_retry(retry)
            .with_identity_field(config.session.identity_field.clone())
            .with_metrics(Arc::clone(&metrics));
        if let Some(events) = events {
            deps = deps.with_events(events);
        }
        if let Some(responses) = responses {
            deps = deps.with_responses(responses);
        }

        let coordinator = UploadCoordinator::spawn(deps);
        let queue = SequentialQueue::new(
            Arc::new(coordinator.clone()),
            AdmissionPolicy::from_millis(config.queue.debounce_ms),
        );

        info!(session_id = %id, "Upload session started");

        Self {
            id,
            identity_field: config.session.identity_field,
            queue,
            coordinator,
            metrics,
            forms: Mutex::new(HashMap::new()),
        }
    }
}

impl UploadSession {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The form registered under `id`, created on first use with the
    /// identity control set to the session id.
    pub fn form(&self, id: impl Into<FormId>) -> Arc<Form> {
        let id = id.into();
        let mut forms = self.forms.lock().unwrap_or_else(PoisonError::into_inner);

        let form = forms.entry(id.clone()).or_insert_with(|| {
            let form = Form::new(id);
            form.add_text(self.identity_field.as_str(), self.id.to_string());
            Arc::new(form)
        });
        Arc::clone(form)
    }

    /// Queue an upload of `field`'s current selection.
    ///
    /// Returns `Ok(false)` without queueing anything when the field holds no
    /// payload, so repeating a request after a finished transfer is a no-op.
    pub fn request_upload(&self, form: &Arc<Form>, field: &Arc<UploadField>) -> Result<bool> {
        let registered = form
            .controls()
            .iter()
            .any(|control| control.name == field.id().as_str());
        if !registered {
            return Err(SessionError::ForeignField {
                form: form.id().clone(),
                field: field.id().clone(),
            });
        }

        if field.state() == FieldState::InProgress {
            return Err(SessionError::FieldBusy(field.id().clone()));
        }

        if !field.has_payload() {
            debug!(
                form_id = %form.id(),
                field_id = %field.id(),
                "Nothing selected, upload request ignored"
            );
            return Ok(false);
        }

        self.queue
            .enqueue(UploadRequest::new(Arc::clone(form), Arc::clone(field)))?;
        debug!(
            form_id = %form.id(),
            field_id = %field.id(),
            pending = self.queue.pending_len(),
            "Upload requested"
        );
        Ok(true)
    }

    /// Cancel whatever is uploading right now.
    /// Returns the cancelled field, or `None` if nothing was in flight.
    pub async fn cancel(&self) -> Result<Option<FieldId>> {
        Ok(self.coordinator.cancel().await?)
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn is_idle(&self) -> bool {
        self.queue.is_idle()
    }

    /// Wait until every requested upload reached a terminal outcome
    pub async fn wait_idle(&self) {
        self.queue.wait_idle().await;
    }

    /// Stop accepting requests once the running cycle completes
    pub async fn shutdown(&self) {
        self.queue.shutdown().await;
        info!(session_id = %self.id, "Upload session stopped");
    }
}
