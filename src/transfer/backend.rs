//! Transport seam of the transfer queue.
//!
//! A backend moves the bytes of one job and reports cumulative progress. It
//! must observe the job's cancellation token inside every I/O await so a
//! cancelled transfer stops promptly instead of running to completion.

use async_trait::async_trait;
use bytes::Bytes;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use super::error::TransferError;
use super::storage::LocalDownload;
use crate::remote::RemoteError;
use crate::session::SessionRegistry;
use crate::utils::security::join_remote;

/// Receives cumulative byte counts from a running backend.
pub trait ProgressSink: Send + Sync {
    /// Total size, once known (downloads learn it from the remote side).
    fn set_size(&self, size: u64);

    fn advance(&self, transferred: u64);
}

#[derive(Debug, Clone)]
pub enum JobKind {
    Upload { content: Bytes },
    Download { local_dir: PathBuf },
}

/// Everything a backend needs to run one transfer.
#[derive(Debug, Clone)]
pub struct TransferJob {
    pub id: String,
    pub session_id: Option<String>,
    /// Target directory for uploads, source file for downloads
    pub remote_path: String,
    /// Uploaded file name, or the local name of a download
    pub file_name: String,
    pub kind: JobKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOutcome {
    pub bytes: u64,
    pub local_path: Option<PathBuf>,
}

#[async_trait]
pub trait TransferBackend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn upload(
        &self,
        job: &TransferJob,
        content: &Bytes,
        progress: Arc<dyn ProgressSink>,
        cancel: &CancellationToken,
    ) -> Result<TransferOutcome, TransferError>;

    async fn download(
        &self,
        job: &TransferJob,
        local_dir: &Path,
        progress: Arc<dyn ProgressSink>,
        cancel: &CancellationToken,
    ) -> Result<TransferOutcome, TransferError>;
}

/// Race `fut` against the token.
pub(crate) async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = T>,
) -> Result<T, TransferError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(TransferError::Cancelled),
        out = fut => Ok(out),
    }
}

/// Chunked transfers over a session's SFTP subsystem.
pub struct SftpBackend {
    registry: Arc<SessionRegistry>,
    chunk_size: usize,
}

impl SftpBackend {
    pub fn new(registry: Arc<SessionRegistry>, chunk_size: usize) -> Self {
        Self {
            registry,
            chunk_size: chunk_size.max(1),
        }
    }

    fn session_id<'a>(&self, job: &'a TransferJob) -> Result<&'a str, TransferError> {
        job.session_id
            .as_deref()
            .ok_or_else(|| TransferError::Validation("an SFTP transfer needs a sessionId".into()))
    }
}

#[async_trait]
impl TransferBackend for SftpBackend {
    fn name(&self) -> &'static str {
        "sftp"
    }

    async fn upload(
        &self,
        job: &TransferJob,
        content: &Bytes,
        progress: Arc<dyn ProgressSink>,
        cancel: &CancellationToken,
    ) -> Result<TransferOutcome, TransferError> {
        let session_id = self.session_id(job)?;
        let conn = self.registry.adapter(session_id)?;
        let target = join_remote(&job.remote_path, &job.file_name);

        let mut writer = cancellable(cancel, conn.open_write(&target)).await??;
        let mut sent = 0u64;
        for chunk in content.chunks(self.chunk_size) {
            cancellable(cancel, writer.write_all(chunk))
                .await?
                .map_err(RemoteError::from)?;
            sent += chunk.len() as u64;
            progress.advance(sent);
            self.registry.update_last_activity(session_id);
        }
        cancellable(cancel, writer.shutdown())
            .await?
            .map_err(RemoteError::from)?;

        tracing::debug!(transfer_id = %job.id, path = %target, bytes = sent, "sftp upload finished");
        Ok(TransferOutcome {
            bytes: sent,
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
        let session_id = self.session_id(job)?;
        let conn = self.registry.adapter(session_id)?;

        let meta = cancellable(cancel, conn.stat(&job.remote_path)).await??;
        if meta.is_dir() {
            return Err(TransferError::Validation(format!(
                "cannot download a directory: {}",
                job.remote_path
            )));
        }
        progress.set_size(meta.size);

        let mut reader = cancellable(cancel, conn.open_read(&job.remote_path)).await??;
        let mut local = LocalDownload::create(local_dir, &job.file_name).await?;
        let mut buf = vec![0u8; self.chunk_size];

        loop {
            let n = cancellable(cancel, reader.read(&mut buf))
                .await?
                .map_err(RemoteError::from)?;
            if n == 0 {
                break;
            }
            local.write_chunk(&buf[..n]).await?;
            progress.advance(local.written());
            self.registry.update_last_activity(session_id);
        }

        let bytes = local.written();
        let path = local.finish().await?;
        tracing::debug!(transfer_id = %job.id, path = %path.display(), bytes, "sftp download finished");
        Ok(TransferOutcome {
            bytes,
            local_path: Some(path),
        })
    }
}
