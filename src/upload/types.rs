use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::error::UploadError;
use super::form::Form;

/// Lock a std mutex, recovering the data if a previous holder panicked
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Identifier of a form; also the key for its upload endpoint
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FormId(String);

impl FormId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FormId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FormId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for FormId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Identifier of an upload field. Doubles as the control name in the form post.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldId(String);

impl FieldId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FieldId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for FieldId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Lifecycle state of an upload field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldState {
    /// Nothing being transferred; a file may be selected
    #[default]
    Empty,
    /// Queued transfer has been dequeued and is being sent (or retried)
    InProgress,
}

impl FieldState {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldState::Empty => "empty",
            FieldState::InProgress => "in_progress",
        }
    }
}

impl fmt::Display for FieldState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// File data selected into an upload field
#[derive(Debug, Clone, PartialEq)]
pub struct Payload {
    pub file_name: String,
    pub content_type: mime::Mime,
    pub data: Bytes,
}

impl Payload {
    pub fn new(file_name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: mime::APPLICATION_OCTET_STREAM,
            data: data.into(),
        }
    }

    pub fn with_content_type(mut self, content_type: mime::Mime) -> Self {
        self.content_type = content_type;
        self
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[derive(Debug, Default)]
struct FieldInner {
    state: FieldState,
    payload: Option<Payload>,
}

/// An upload control: its state and the payload holder the user fills
#[derive(Debug)]
pub struct UploadField {
    id: FieldId,
    inner: Mutex<FieldInner>,
}

impl UploadField {
    pub fn new(id: impl Into<FieldId>) -> Self {
        Self {
            id: id.into(),
            inner: Mutex::new(FieldInner::default()),
        }
    }

    pub fn id(&self) -> &FieldId {
        &self.id
    }

    pub fn state(&self) -> FieldState {
        lock(&self.inner).state
    }

    /// Put a file into the payload holder.
    /// Refused while a transfer for this field is in progress.
    pub fn select(&self, payload: Payload) -> Result<(), UploadError> {
        let mut inner = lock(&self.inner);
        if inner.state == FieldState::InProgress {
            return Err(UploadError::FieldBusy(self.id.clone()));
        }
        inner.payload = Some(payload);
        Ok(())
    }

    pub fn payload(&self) -> Option<Payload> {
        lock(&self.inner).payload.clone()
    }

    pub fn has_payload(&self) -> bool {
        lock(&self.inner).payload.is_some()
    }

    /// Drop the current selection.
    /// Refused while a transfer for this field is in progress; cancel it instead.
    pub fn clear(&self) -> Result<(), UploadError> {
        let mut inner = lock(&self.inner);
        if inner.state == FieldState::InProgress {
            return Err(UploadError::FieldBusy(self.id.clone()));
        }
        inner.payload = None;
        Ok(())
    }

    /// Mark the field in progress and hand out its payload.
    /// Leaves the state untouched when nothing is selected.
    pub(crate) fn begin(&self) -> Option<Payload> {
        let mut inner = lock(&self.inner);
        let payload = inner.payload.clone()?;
        inner.state = FieldState::InProgress;
        Some(payload)
    }

    /// Terminal outcome: empty the payload holder and return to `Empty`
    pub(crate) fn reset(&self) {
        let mut inner = lock(&self.inner);
        inner.payload = None;
        inner.state = FieldState::Empty;
    }

    pub(crate) fn set_state(&self, state: FieldState) {
        lock(&self.inner).state = state;
    }
}

/// One pending or active transfer: which field of which form to send
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub form: Arc<Form>,
    pub field: Arc<UploadField>,
}

impl UploadRequest {
    pub fn new(form: Arc<Form>, field: Arc<UploadField>) -> Self {
        Self { form, field }
    }

    pub fn form_id(&self) -> &FormId {
        self.form.id()
    }

    pub fn field_id(&self) -> &FieldId {
        self.field.id()
    }
}
