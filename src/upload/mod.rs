//! Upload policy layer
//!
//! Turns queued upload requests into multipart form posts, one at a time.
//!
//! ## Key Components
//!
//! - [`UploadCoordinator`] - Batch runner driving the per-field state machine
//! - [`Transport`] - Seam for posting a captured form ([`HttpTransport`] uses reqwest)
//! - [`RetryPolicy`] - Delay before a failed transfer is retried
//! - [`EventDispatcher`] / [`ResponseHandler`] - Outbound notifications
//! - [`Form`] / [`UploadField`] - The controls being posted
//!
//! Field state machine:
//!
//! ```text
//! Empty --(selected & dequeued)--> InProgress
//! InProgress --(success | cancel)--> Empty
//! InProgress --(transport failure)--> InProgress   (retried)
//! ```

mod coordinator;
mod error;
mod events;
mod form;
mod http;
mod retry;
mod transport;
mod types;

pub use coordinator::{Collaborators, UploadCoordinator};
pub use error::{Result, UploadError};
pub use events::{ChannelDispatcher, EventDispatcher, LogDispatcher, UploadEvent, UploadEventKind};
pub use form::{ControlKind, FilePart, Form, FormControl, FormSubmission, DEFAULT_IDENTITY_FIELD};
pub use http::{HttpConfig, HttpTransport};
pub use retry::{ExponentialBackoff, RetryPolicy};
pub use transport::{
    Endpoints, LogResponses, ResponseHandler, Transport, TransportError, UploadResponse,
};
pub use types::{FieldId, FieldState, FormId, Payload, UploadField, UploadRequest};
