use std::{io, path::Path, time::Duration};

use tokio::{
    fs::File,
    io::AsyncReadExt,
    sync::{mpsc, watch},
};
use tracing::{debug, info, warn};

use crate::backend::{ControlPlane, PartTransport};
use crate::error::{UploadError, UploadResult};
use crate::plan::{CHUNK_SIZE_BYTES, PartPlan, compute_part_plan};
use crate::session::{
    AuthorizedPart, CompletedPart, CompletedUpload, PartList, UploadSession, UploadTarget,
};

pub const DEFAULT_PART_URL_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    Uninitialized,
    SessionOpen,
    PartsAuthorized,
    PartsTransmitted,
    Finalized,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UploadProgress {
    pub bytes_uploaded: u64,
    pub total_bytes: u64,
    pub parts_completed: u32,
    pub total_parts: u32,
}

impl UploadProgress {
    pub fn percent(&self) -> f32 {
        if self.total_bytes > 0 {
            (self.bytes_uploaded as f32 / self.total_bytes as f32) * 100.0
        } else if self.total_parts > 0 && self.parts_completed == self.total_parts {
            100.0
        } else {
            0.0
        }
    }
}

/// Drives one multipart upload at a time through
/// begin -> authorize -> transmit -> finalize.
///
/// The orchestrator only remembers which upload ID is active; everything else
/// about the upload travels in the [`UploadSession`] handed out by `begin`.
pub struct UploadOrchestrator<C, T> {
    control_plane: C,
    transport: T,
    chunk_size: u64,
    part_url_ttl: Duration,
    state: UploadState,
    active_upload_id: Option<String>,
    issued_parts: u32,
}

impl<C: ControlPlane, T: PartTransport> UploadOrchestrator<C, T> {
    pub fn new(control_plane: C, transport: T) -> Self {
        Self {
            control_plane,
            transport,
            chunk_size: CHUNK_SIZE_BYTES,
            part_url_ttl: DEFAULT_PART_URL_TTL,
            state: UploadState::Uninitialized,
            active_upload_id: None,
            issued_parts: 0,
        }
    }

    pub fn with_part_url_ttl(mut self, ttl: Duration) -> Self {
        self.part_url_ttl = ttl;
        self
    }

    #[cfg(test)]
    fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn state(&self) -> UploadState {
        self.state
    }

    pub fn active_upload_id(&self) -> Option<&str> {
        self.active_upload_id.as_deref()
    }

    fn ensure_active(&self, session: &UploadSession) -> UploadResult<()> {
        match &self.active_upload_id {
            Some(upload_id) if upload_id == session.upload_id() => Ok(()),
            _ => Err(UploadError::NoActiveSession(
                session.upload_id().to_string(),
            )),
        }
    }

    fn ensure_state(&self, expected: UploadState) -> UploadResult<()> {
        if self.state != expected {
            return Err(UploadError::InvalidState {
                expected,
                actual: self.state,
            });
        }
        Ok(())
    }

    fn release(&mut self, session: &UploadSession, state: UploadState) {
        if self.active_upload_id.as_deref() == Some(session.upload_id()) {
            self.active_upload_id = None;
            self.state = state;
            self.issued_parts = 0;
        }
    }

    pub async fn begin(&mut self, target: UploadTarget) -> UploadResult<UploadSession> {
        target.validate()?;

        if let Some(upload_id) = &self.active_upload_id {
            return Err(UploadError::SessionAlreadyOpen {
                upload_id: upload_id.clone(),
            });
        }

        let upload_id = self
            .control_plane
            .create_session(&target)
            .await
            .map_err(|source| UploadError::SessionInit {
                bucket: target.bucket.clone(),
                key: target.key.clone(),
                source,
            })?;

        info!("Started multipart upload '{}' for {}", upload_id, target);

        self.active_upload_id = Some(upload_id.clone());
        self.state = UploadState::SessionOpen;
        self.issued_parts = 0;
        Ok(UploadSession::new(upload_id, target))
    }

    pub async fn authorize(
        &self,
        session: &UploadSession,
        part_number: u32,
        ttl: Duration,
    ) -> UploadResult<AuthorizedPart> {
        if part_number == 0 {
            return Err(UploadError::InvalidPartNumber(part_number));
        }
        if ttl.is_zero() {
            return Err(UploadError::InvalidTtl(
                "must be greater than zero".to_string(),
            ));
        }
        self.ensure_active(session)?;

        let authorized = self
            .control_plane
            .authorize_part(session, part_number, ttl)
            .await
            .map_err(|source| UploadError::Authorization {
                part_number,
                source,
            })?;

        debug!(
            "Authorized part {} of upload '{}' until {}",
            part_number,
            session.upload_id(),
            humantime::format_rfc3339_seconds(authorized.expires_at)
        );
        Ok(authorized)
    }

    /// Sends one part. Progress is not reported; see [`Self::transmit_all`].
    pub async fn transmit_part(
        &self,
        part: &AuthorizedPart,
        data: Vec<u8>,
    ) -> UploadResult<CompletedPart> {
        let (progress_tx, _progress_rx) = mpsc::channel(1);
        self.send_part(part, data, progress_tx).await
    }

    async fn send_part(
        &self,
        part: &AuthorizedPart,
        data: Vec<u8>,
        progress_tx: mpsc::Sender<u64>,
    ) -> UploadResult<CompletedPart> {
        let tag = self
            .transport
            .put_part(part, data, progress_tx)
            .await
            .map_err(|source| UploadError::Transmission {
                part_number: part.part_number,
                source,
            })?;

        Ok(CompletedPart {
            part_number: part.part_number,
            tag,
        })
    }

    pub async fn authorize_all(
        &mut self,
        session: &UploadSession,
        plan: &PartPlan,
    ) -> UploadResult<Vec<AuthorizedPart>> {
        self.ensure_active(session)?;
        self.ensure_state(UploadState::SessionOpen)?;

        let mut authorized = Vec::with_capacity(plan.part_count() as usize);
        for part_number in 1..=plan.part_count() {
            authorized.push(self.authorize(session, part_number, self.part_url_ttl).await?);
        }

        self.issued_parts = plan.part_count();
        self.state = UploadState::PartsAuthorized;
        Ok(authorized)
    }

    /// Reads `source` range by range and sends each part in order, stopping at
    /// the first failure. Later parts are never read or sent.
    pub async fn transmit_all(
        &mut self,
        session: &UploadSession,
        source: &Path,
        plan: &PartPlan,
        authorized: &[AuthorizedPart],
        progress: &watch::Sender<UploadProgress>,
    ) -> UploadResult<PartList> {
        self.ensure_active(session)?;
        self.ensure_state(UploadState::PartsAuthorized)?;

        if plan.part_count() != self.issued_parts
            || authorized.len() != self.issued_parts as usize
        {
            return Err(UploadError::InvalidPartList(format!(
                "{} parts authorized, but {} planned and {} supplied",
                self.issued_parts,
                plan.part_count(),
                authorized.len()
            )));
        }

        let mut file = File::open(source).await?;
        let mut snapshot = UploadProgress {
            bytes_uploaded: 0,
            total_bytes: plan.file_size(),
            parts_completed: 0,
            total_parts: plan.part_count(),
        };
        progress.send_replace(snapshot.clone());

        let (progress_tx, mut progress_rx) = mpsc::channel::<u64>(64);
        let mut completed = Vec::with_capacity(authorized.len());

        for (range, part) in plan.ranges().zip(authorized) {
            if part.part_number != range.part_number {
                return Err(UploadError::InvalidPartList(format!(
                    "expected authorization for part {} but got part {}",
                    range.part_number, part.part_number
                )));
            }

            let mut data = vec![0u8; range.len as usize];
            file.read_exact(&mut data).await?;
            debug!("Uploading part {} ({} bytes)", range.part_number, range.len);

            let part_start = snapshot.bytes_uploaded;
            let upload_fut = self.send_part(part, data, progress_tx.clone());
            tokio::pin!(upload_fut);

            let upload_result = loop {
                tokio::select! {
                    biased;
                    result = &mut upload_fut => {
                        break result;
                    }
                    Some(bytes) = progress_rx.recv() => {
                        snapshot.bytes_uploaded = (snapshot.bytes_uploaded + bytes)
                            .min(part_start + range.len);
                        progress.send_replace(snapshot.clone());
                    }
                }
            };

            let completed_part = upload_result?;
            while progress_rx.try_recv().is_ok() {}

            info!(
                "Uploaded part {}/{} ({} bytes, ETag {})",
                completed_part.part_number,
                plan.part_count(),
                range.len,
                completed_part.tag
            );

            snapshot.bytes_uploaded = part_start + range.len;
            snapshot.parts_completed += 1;
            progress.send_replace(snapshot.clone());
            completed.push(completed_part);
        }

        let parts = PartList::new(completed)?;
        self.state = UploadState::PartsTransmitted;
        Ok(parts)
    }

    /// Commits `parts` and consumes the session. Only valid once every part has
    /// been transmitted, and `parts` must hold exactly the parts authorized for
    /// the session. If the commit is refused, locally or by the backend, the
    /// upload is aborted because the session cannot be used again.
    pub async fn finalize(
        &mut self,
        session: UploadSession,
        parts: PartList,
    ) -> UploadResult<CompletedUpload> {
        self.ensure_active(&session)?;

        if let Err(e) = self.check_commit(&parts) {
            let _ = self.abort(session).await;
            return Err(e);
        }

        let result = self.control_plane.complete(&session, &parts).await;
        match result {
            Ok(completed) => {
                info!(
                    "Completed multipart upload '{}' for {} ({} parts)",
                    completed.upload_id, completed.target, completed.part_count
                );
                debug!("Completion response: {:?}", completed);
                self.release(&session, UploadState::Finalized);
                Ok(completed)
            }
            Err(source) => {
                let upload_id = session.upload_id().to_string();
                let _ = self.abort(session).await;
                Err(UploadError::Finalization { upload_id, source })
            }
        }
    }

    fn check_commit(&self, parts: &PartList) -> UploadResult<()> {
        self.ensure_state(UploadState::PartsTransmitted)?;
        let supplied = parts.parts().len();
        if supplied != self.issued_parts as usize {
            return Err(UploadError::InvalidPartList(format!(
                "{} parts authorized but {} supplied",
                self.issued_parts, supplied
            )));
        }
        Ok(())
    }

    /// Best-effort cancellation on the backend. The session is released
    /// locally whether or not the backend call succeeds.
    pub async fn abort(&mut self, session: UploadSession) -> UploadResult<()> {
        warn!("Aborting multipart upload '{}'", session.upload_id());
        self.release(&session, UploadState::Uninitialized);

        self.control_plane.abort(&session).await.map_err(|source| {
            warn!(
                "Failed to abort multipart upload '{}': {}",
                session.upload_id(),
                source
            );
            UploadError::Abort {
                upload_id: session.upload_id().to_string(),
                source,
            }
        })
    }

    /// Uploads `source` end to end. Any failure after the session is opened
    /// aborts it before the error is returned.
    pub async fn upload_file(
        &mut self,
        source: &Path,
        target: UploadTarget,
        progress: &watch::Sender<UploadProgress>,
    ) -> UploadResult<CompletedUpload> {
        let metadata = tokio::fs::metadata(source).await?;
        if !metadata.is_file() {
            return Err(UploadError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a regular file", source.display()),
            )));
        }

        let plan = compute_part_plan(metadata.len(), self.chunk_size)?;
        info!(
            "Uploading {} ({} bytes) to {} in {} part(s)",
            source.display(),
            plan.file_size(),
            target,
            plan.part_count()
        );

        let session = self.begin(target).await?;

        let result = self.upload_parts(&session, source, &plan, progress).await;
        let parts = match result {
            Ok(parts) => parts,
            Err(e) => {
                let _ = self.abort(session).await;
                return Err(e);
            }
        };

        self.finalize(session, parts).await
    }

    async fn upload_parts(
        &mut self,
        session: &UploadSession,
        source: &Path,
        plan: &PartPlan,
        progress: &watch::Sender<UploadProgress>,
    ) -> UploadResult<PartList> {
        let authorized = self.authorize_all(session, plan).await?;
        self.transmit_all(session, source, plan, &authorized, progress)
            .await
    }
}
