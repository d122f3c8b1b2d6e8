use thiserror::Error;

use super::types::FieldId;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("Upload field '{0}' is busy with a transfer")]
    FieldBusy(FieldId),

    #[error("Upload coordinator has stopped")]
    CoordinatorStopped,
}

pub type Result<T> = std::result::Result<T, UploadError>;
