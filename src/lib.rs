//! Multipart uploads of local files to S3-compatible object storage.
//!
//! An [`UploadOrchestrator`] opens a multipart upload through a
//! [`ControlPlane`], presigns one URL per part, PUTs each part through a
//! [`PartTransport`] and commits the collected ETags. Parts are sent one at a
//! time and the first failure aborts the whole upload.

pub mod backend;
pub mod client;
pub mod error;
pub mod orchestrator;
pub mod plan;
pub mod session;

pub use backend::{ControlPlane, PartTransport};
pub use client::{HttpTransport, S3ControlPlane, S3Settings};
pub use error::{UploadError, UploadResult};
pub use orchestrator::{UploadOrchestrator, UploadProgress, UploadState};
pub use session::{CompletedUpload, UploadTarget};
