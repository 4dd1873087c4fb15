use thiserror::Error;

use crate::backend::{BackendError, TransferError};
use crate::orchestrator::UploadState;

pub type UploadResult<T> = Result<T, UploadError>;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("Invalid upload target: {0}")]
    InvalidTarget(String),
    #[error("An upload session is already open: {upload_id}")]
    SessionAlreadyOpen { upload_id: String },
    #[error("No active upload session with ID '{0}'")]
    NoActiveSession(String),
    #[error("Invalid part number {0}, part numbers start at 1")]
    InvalidPartNumber(u32),
    #[error("Invalid authorization TTL: {0}")]
    InvalidTtl(String),
    #[error("Invalid part plan: {0}")]
    InvalidPlan(String),
    #[error("Upload is in state {actual:?}, expected {expected:?}")]
    InvalidState {
        expected: UploadState,
        actual: UploadState,
    },
    #[error("Invalid part list: {0}")]
    InvalidPartList(String),
    #[error("Failed to start multipart upload for s3://{bucket}/{key}: {source}")]
    SessionInit {
        bucket: String,
        key: String,
        #[source]
        source: BackendError,
    },
    #[error("Failed to authorize part {part_number}: {source}")]
    Authorization {
        part_number: u32,
        #[source]
        source: BackendError,
    },
    #[error("Failed to upload part {part_number}: {source}")]
    Transmission {
        part_number: u32,
        #[source]
        source: TransferError,
    },
    #[error("Failed to complete multipart upload '{upload_id}': {source}")]
    Finalization {
        upload_id: String,
        #[source]
        source: BackendError,
    },
    #[error("Failed to abort multipart upload '{upload_id}': {source}")]
    Abort {
        upload_id: String,
        #[source]
        source: BackendError,
    },
    #[error("Failed to read source file: {0}")]
    Io(#[from] std::io::Error),
}
