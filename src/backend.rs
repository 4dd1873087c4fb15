use std::{future::Future, time::Duration};

use reqwest::StatusCode;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::session::{
    AuthorizedPart, CompletedUpload, IntegrityTag, PartList, UploadSession, UploadTarget,
};

/// Rejection reported by the storage control plane.
pub type BackendError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("endpoint responded with {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("response did not include an ETag header")]
    MissingTag,
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

/// Session lifecycle calls against the storage backend.
pub trait ControlPlane: Send + Sync {
    /// Opens a multipart upload and returns its upload ID.
    fn create_session(
        &self,
        target: &UploadTarget,
    ) -> impl Future<Output = Result<String, BackendError>> + Send;

    fn authorize_part(
        &self,
        session: &UploadSession,
        part_number: u32,
        ttl: Duration,
    ) -> impl Future<Output = Result<AuthorizedPart, BackendError>> + Send;

    fn complete(
        &self,
        session: &UploadSession,
        parts: &PartList,
    ) -> impl Future<Output = Result<CompletedUpload, BackendError>> + Send;

    fn abort(&self, session: &UploadSession)
    -> impl Future<Output = Result<(), BackendError>> + Send;
}

/// Moves part bytes to an authorized endpoint.
pub trait PartTransport: Send + Sync {
    /// Sends `data` and returns the integrity tag of the stored part. Byte
    /// counts are reported on `progress_tx` as they are handed to the wire.
    fn put_part(
        &self,
        part: &AuthorizedPart,
        data: Vec<u8>,
        progress_tx: mpsc::Sender<u64>,
    ) -> impl Future<Output = Result<IntegrityTag, TransferError>> + Send;
}
