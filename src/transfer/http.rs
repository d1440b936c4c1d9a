//! Plain HTTP backend for transfers that do not involve a remote session.
//! Talks to the generic `/api/files/*` endpoints of a shellbridge instance.

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response, StatusCode};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::backend::{cancellable, ProgressSink, TransferBackend, TransferJob, TransferOutcome};
use super::error::TransferError;
use super::storage::LocalDownload;
use crate::utils::security::join_remote;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct HttpBackend {
    client: Client,
    base_url: String,
    chunk_size: usize,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>, chunk_size: usize) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            chunk_size: chunk_size.max(1),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

fn split_chunks(content: &Bytes, chunk_size: usize) -> Vec<Bytes> {
    (0..content.len())
        .step_by(chunk_size)
        .map(|start| content.slice(start..(start + chunk_size).min(content.len())))
        .collect()
}

/// Turn a non-2xx response into a classified error. Server-side and
/// throttling statuses are worth retrying, client errors are not.
async fn check_status(response: Response) -> Result<Response, TransferError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let detail = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(String::from))
        .unwrap_or(body);

    let retryable = status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS;
    Err(TransferError::Http {
        message: format!("{status}: {detail}"),
        retryable,
    })
}

#[async_trait]
impl TransferBackend for HttpBackend {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn upload(
        &self,
        job: &TransferJob,
        content: &Bytes,
        progress: Arc<dyn ProgressSink>,
        cancel: &CancellationToken,
    ) -> Result<TransferOutcome, TransferError> {
        let size = content.len() as u64;
        let sink = progress.clone();
        let mut sent = 0u64;

        // Progress follows the body encoder pulling chunks
        let body = futures::stream::iter(split_chunks(content, self.chunk_size)).map(
            move |chunk| {
                sent += chunk.len() as u64;
                sink.advance(sent);
                Ok::<_, std::io::Error>(chunk)
            },
        );

        let part = Part::stream_with_length(reqwest::Body::wrap_stream(body), size)
            .file_name(job.file_name.clone())
            .mime_str("application/octet-stream")?;
        let form = Form::new()
            .text("remotePath", join_remote(&job.remote_path, &job.file_name))
            .part("file", part);

        let request = self.client.post(self.url("/api/files/upload")).multipart(form);
        let response = cancellable(cancel, request.send()).await??;
        check_status(response).await?;

        progress.advance(size);
        tracing::debug!(transfer_id = %job.id, bytes = size, "http upload finished");
        Ok(TransferOutcome {
            bytes: size,
            local_path: None,
        })
    }

    async fn download(
        &self,
        job: &TransferJob,
        local_dir: &Path,
        progress: Arc<dyn ProgressSink>,
        cancel: &CancellationToken,
    ) -> Result<TransferOutcome, TransferError> {
        let request = self
            .client
            .post(self.url("/api/files/download"))
            .json(&json!({ "remotePath": job.remote_path }));
        let response = cancellable(cancel, request.send()).await??;
        let response = check_status(response).await?;

        if let Some(len) = response.content_length() {
            progress.set_size(len);
        }

        let mut local = LocalDownload::create(local_dir, &job.file_name).await?;
        let mut stream = Box::pin(response.bytes_stream());
        while let Some(chunk) = cancellable(cancel, stream.next()).await? {
            local.write_chunk(&chunk?).await?;
            progress.advance(local.written());
        }

        let bytes = local.written();
        let path = local.finish().await?;
        tracing::debug!(transfer_id = %job.id, path = %path.display(), bytes, "http download finished");
        Ok(TransferOutcome {
            bytes,
            local_path: Some(path),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_into_bounded_chunks() {
        let content = Bytes::from(vec![1u8; 10]);
        let chunks = split_chunks(&content, 4);
        assert_eq!(
            chunks.iter().map(Bytes::len).collect::<Vec<_>>(),
            vec![4, 4, 2]
        );
        assert!(split_chunks(&Bytes::new(), 4).is_empty());
    }

    #[test]
    fn trims_trailing_slash_from_base_url() {
        let backend = HttpBackend::new("http://127.0.0.1:3000/", 1024).unwrap();
        assert_eq!(
            backend.url("/api/files/upload"),
            "http://127.0.0.1:3000/api/files/upload"
        );
    }
}
