pub mod config;
pub mod observability;
pub mod queue;
pub mod session;
pub mod upload;

pub use session::{SessionError, UploadSession};
