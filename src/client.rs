use std::time::{Duration, SystemTime};

use aws_config::BehaviorVersion;
use aws_sdk_s3::{
    Client,
    config::Region,
    error::DisplayErrorContext,
    presigning::PresigningConfig,
    types::{CompletedMultipartUpload, CompletedPart as S3CompletedPart},
};
use futures::StreamExt;
use reqwest::header::{CONTENT_LENGTH, ETAG};
use tokio::sync::mpsc;
use tracing::debug;
use url::Url;

use crate::backend::{BackendError, ControlPlane, PartTransport, TransferError};
use crate::session::{
    AuthorizedPart, CompletedUpload, IntegrityTag, PartList, UploadSession, UploadTarget,
};

const SUB_CHUNK_SIZE: usize = 64 * 1024;

fn sdk_error<E: std::error::Error>(err: E) -> BackendError {
    DisplayErrorContext(err).to_string().into()
}

/// Overrides applied on top of the standard AWS configuration chain.
#[derive(Debug, Clone, Default)]
pub struct S3Settings {
    pub region: Option<String>,
    pub endpoint_url: Option<Url>,
    pub profile: Option<String>,
    /// Address buckets as `endpoint/bucket` instead of `bucket.endpoint`,
    /// as most self-hosted S3 implementations expect.
    pub force_path_style: bool,
}

/// Multipart upload control plane backed by the S3 API.
pub struct S3ControlPlane {
    client: Client,
}

impl S3ControlPlane {
    pub async fn new(settings: &S3Settings) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = &settings.region {
            loader = loader.region(Region::new(region.clone()));
        }
        if let Some(profile) = &settings.profile {
            loader = loader.profile_name(profile);
        }
        let sdk_config = loader.load().await;

        let mut s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(settings.force_path_style);
        if let Some(endpoint_url) = &settings.endpoint_url {
            s3_config = s3_config.endpoint_url(endpoint_url.as_str());
        }

        Self {
            client: Client::from_conf(s3_config.build()),
        }
    }
}

impl ControlPlane for S3ControlPlane {
    async fn create_session(&self, target: &UploadTarget) -> Result<String, BackendError> {
        let output = self
            .client
            .create_multipart_upload()
            .bucket(&target.bucket)
            .key(&target.key)
            .send()
            .await
            .map_err(sdk_error)?;

        let upload_id = output
            .upload_id()
            .ok_or("CreateMultipartUpload response did not include an upload ID")?;
        Ok(upload_id.to_string())
    }

    async fn authorize_part(
        &self,
        session: &UploadSession,
        part_number: u32,
        ttl: Duration,
    ) -> Result<AuthorizedPart, BackendError> {
        let target = session.target();
        let presigning = PresigningConfig::expires_in(ttl)?;

        let request = self
            .client
            .upload_part()
            .bucket(&target.bucket)
            .key(&target.key)
            .upload_id(session.upload_id())
            .part_number(i32::try_from(part_number)?)
            .presigned(presigning)
            .await
            .map_err(sdk_error)?;

        debug!("Presigned URL for part {}: {}", part_number, request.uri());

        Ok(AuthorizedPart {
            part_number,
            url: Url::parse(request.uri())?,
            expires_at: SystemTime::now() + ttl,
        })
    }

    async fn complete(
        &self,
        session: &UploadSession,
        parts: &PartList,
    ) -> Result<CompletedUpload, BackendError> {
        let target = session.target();

        let completed_parts = parts
            .parts()
            .iter()
            .map(|part| -> Result<S3CompletedPart, BackendError> {
                Ok(S3CompletedPart::builder()
                    .part_number(i32::try_from(part.part_number)?)
                    .e_tag(&part.tag.0)
                    .build())
            })
            .collect::<Result<Vec<_>, BackendError>>()?;

        let output = self
            .client
            .complete_multipart_upload()
            .bucket(&target.bucket)
            .key(&target.key)
            .upload_id(session.upload_id())
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(completed_parts))
                    .build(),
            )
            .send()
            .await
            .map_err(sdk_error)?;

        Ok(CompletedUpload {
            upload_id: session.upload_id().to_string(),
            target: target.clone(),
            part_count: parts.parts().len() as u32,
            location: output.location().map(str::to_string),
            etag: output.e_tag().map(str::to_string),
        })
    }

    async fn abort(&self, session: &UploadSession) -> Result<(), BackendError> {
        let target = session.target();

        self.client
            .abort_multipart_upload()
            .bucket(&target.bucket)
            .key(&target.key)
            .upload_id(session.upload_id())
            .send()
            .await
            .map_err(sdk_error)?;

        Ok(())
    }
}

/// PUTs part bytes to presigned URLs.
#[derive(Default)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PartTransport for HttpTransport {
    async fn put_part(
        &self,
        part: &AuthorizedPart,
        data: Vec<u8>,
        progress_tx: mpsc::Sender<u64>,
    ) -> Result<IntegrityTag, TransferError> {
        let content_length = data.len();

        let chunks: Vec<Vec<u8>> = data
            .chunks(SUB_CHUNK_SIZE)
            .map(|chunk| chunk.to_vec())
            .collect();

        let stream = futures::stream::iter(chunks).map(move |chunk| {
            let _ = progress_tx.try_send(chunk.len() as u64);
            Ok::<_, std::io::Error>(chunk)
        });

        // Presigned PUTs are rejected without a length, so the streamed body
        // must not fall back to chunked transfer encoding.
        let response = self
            .client
            .put(part.url.clone())
            .header(CONTENT_LENGTH, content_length)
            .body(reqwest::Body::wrap_stream(stream))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransferError::Status {
                status,
                body: response.text().await.unwrap_or_default(),
            });
        }

        let tag = response
            .headers()
            .get(ETAG)
            .and_then(|value| value.to_str().ok())
            .ok_or(TransferError::MissingTag)?;

        Ok(IntegrityTag(tag.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    fn request_complete(request: &[u8]) -> bool {
        let Some(header_end) = request.windows(4).position(|w| w == b"\r\n\r\n") else {
            return false;
        };
        let headers = String::from_utf8_lossy(&request[..header_end]).to_ascii_lowercase();
        let content_length = headers
            .lines()
            .find_map(|line| line.strip_prefix("content-length:"))
            .and_then(|value| value.trim().parse::<usize>().ok())
            .unwrap_or(0);
        request.len() >= header_end + 4 + content_length
    }

    /// Accepts a single connection, captures the raw request and replies with
    /// `response` verbatim.
    async fn serve_once(response: &'static str) -> (Url, JoinHandle<Vec<u8>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 8192];
            while !request_complete(&request) {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
            request
        });

        let url = Url::parse(&format!(
            "http://{}/bucket/data.bin?partNumber=1&uploadId=abc",
            addr
        ))
        .unwrap();
        (url, handle)
    }

    fn authorized(url: Url) -> AuthorizedPart {
        AuthorizedPart {
            part_number: 1,
            url,
            expires_at: SystemTime::now() + Duration::from_secs(60),
        }
    }

    #[tokio::test]
    async fn test_put_part_returns_etag_and_sends_length() {
        let (url, server) = serve_once(
            "HTTP/1.1 200 OK\r\nETag: \"0123abcd\"\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;
        let (progress_tx, mut progress_rx) = mpsc::channel(64);

        let data = vec![7u8; SUB_CHUNK_SIZE * 2 + 10];
        let tag = HttpTransport::new()
            .put_part(&authorized(url), data.clone(), progress_tx)
            .await
            .unwrap();

        assert_eq!(tag, IntegrityTag("\"0123abcd\"".to_string()));

        let request = server.await.unwrap();
        let header_end = request.windows(4).position(|w| w == b"\r\n\r\n").unwrap();
        let head = String::from_utf8_lossy(&request[..header_end]).to_ascii_lowercase();
        assert!(head.starts_with("put /bucket/data.bin?partnumber=1&uploadid=abc"));
        assert!(head.contains(&format!("content-length: {}", data.len())));
        assert!(!head.contains("transfer-encoding"));
        assert_eq!(&request[header_end + 4..], &data[..]);

        let mut reported = 0;
        while let Ok(bytes) = progress_rx.try_recv() {
            reported += bytes;
        }
        assert_eq!(reported, data.len() as u64);
    }

    #[tokio::test]
    async fn test_put_part_non_success_status_is_an_error() {
        let (url, server) = serve_once(
            "HTTP/1.1 403 Forbidden\r\nContent-Length: 12\r\nConnection: close\r\n\r\nAccessDenied",
        )
        .await;
        let (progress_tx, _progress_rx) = mpsc::channel(64);

        let err = HttpTransport::new()
            .put_part(&authorized(url), b"hello".to_vec(), progress_tx)
            .await
            .unwrap_err();

        match err {
            TransferError::Status { status, body } => {
                assert_eq!(status, StatusCode::FORBIDDEN);
                assert_eq!(body, "AccessDenied");
            }
            other => panic!("unexpected error: {other}"),
        }
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_put_part_without_etag_is_an_error() {
        let (url, server) = serve_once(
            "HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;
        let (progress_tx, _progress_rx) = mpsc::channel(64);

        let err = HttpTransport::new()
            .put_part(&authorized(url), Vec::new(), progress_tx)
            .await
            .unwrap_err();

        assert!(matches!(err, TransferError::MissingTag));
        server.await.unwrap();
    }
}
