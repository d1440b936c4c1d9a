//! SFTP engine: listing, whole-buffer transfers and structural operations
//! against the adapter of one session.

pub mod handlers;
mod listing;
mod operations;

pub use listing::{
    apply_list_options, compare_items, DirectoryListing, FileItem, FileType, ListOptions,
    ListingMetadata, SortBy, SortOrder,
};
pub use operations::{FileOperation, FileOperationKind, OperationOutcome};

use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::remote::{
    permission_string, RemoteConnection, RemoteEntry, RemoteError, RemoteFileKind,
};
use crate::session::{SessionError, SessionRegistry};
use crate::utils::security::{
    join_remote, remote_file_name, remote_parent, validate_filename, validate_remote_path,
    PathValidationError,
};

#[derive(Debug, Error)]
pub enum SftpError {
    #[error(transparent)]
    Path(#[from] PathValidationError),

    #[error("{0}")]
    InvalidPath(String),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Remote(#[from] RemoteError),
}

pub type SftpResult<T> = Result<T, SftpError>;

pub struct SftpEngine {
    registry: Arc<SessionRegistry>,
}

impl SftpEngine {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    fn adapter(&self, session_id: &str) -> SftpResult<Arc<dyn RemoteConnection>> {
        Ok(self.registry.adapter(session_id)?)
    }

    /// List a remote directory. The path is checked before the session is
    /// even resolved, so traversal attempts never reach the remote host.
    pub async fn list_directory(&self, session_id: &str, path: &str) -> SftpResult<DirectoryListing> {
        validate_remote_path(path)?;
        let conn = self.adapter(session_id)?;

        match conn.stat(path).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => return Err(SftpError::InvalidPath(format!("not a directory: {path}"))),
            Err(RemoteError::NotFound(_)) => {
                return Err(SftpError::InvalidPath(format!("path does not exist: {path}")))
            }
            Err(err) => return Err(err.into()),
        }

        let entries = conn.list(path).await?;
        let mut items = Vec::with_capacity(entries.len());
        for entry in entries {
            items.push(self.to_item(conn.as_ref(), path, entry).await);
        }

        tracing::debug!(session_id, path, count = items.len(), "directory listed");
        Ok(DirectoryListing {
            path: path.to_string(),
            items,
            parent: remote_parent(path),
        })
    }

    async fn to_item(&self, conn: &dyn RemoteConnection, dir: &str, entry: RemoteEntry) -> FileItem {
        let path = join_remote(dir, &entry.name);
        let meta = entry.metadata;

        // Symlinks count as directories when their target is one
        let is_dir = match meta.kind {
            RemoteFileKind::Directory => true,
            RemoteFileKind::Symlink => conn
                .stat(&path)
                .await
                .map(|target| target.is_dir())
                .unwrap_or(false),
            RemoteFileKind::File | RemoteFileKind::Other => false,
        };

        FileItem {
            name: entry.name,
            path,
            file_type: if is_dir {
                FileType::Directory
            } else {
                FileType::File
            },
            size: meta.size,
            modified: meta.modified,
            permissions: permission_string(meta.kind, meta.mode),
            owner: meta.owner,
            group: meta.group,
        }
    }

    /// Write a whole buffer to `remote_dir/file_name`. Returns an id for the
    /// completed upload.
    pub async fn upload_file(
        &self,
        session_id: &str,
        data: &[u8],
        remote_dir: &str,
        file_name: &str,
    ) -> SftpResult<String> {
        validate_remote_path(remote_dir)?;
        validate_filename(file_name)?;
        let conn = self.adapter(session_id)?;

        let target = join_remote(remote_dir, file_name);
        conn.write(&target, data).await?;

        let transfer_id = Uuid::new_v4().to_string();
        tracing::info!(session_id, %transfer_id, path = %target, bytes = data.len(), "sftp upload complete");
        Ok(transfer_id)
    }

    /// Read a whole remote file. Returns the file name and its contents.
    pub async fn download_file(&self, session_id: &str, remote_path: &str) -> SftpResult<(String, Vec<u8>)> {
        validate_remote_path(remote_path)?;
        let conn = self.adapter(session_id)?;

        match conn.stat(remote_path).await {
            Ok(meta) if meta.is_dir() => {
                return Err(SftpError::InvalidPath(format!(
                    "cannot download a directory: {remote_path}"
                )))
            }
            Ok(_) => {}
            Err(RemoteError::NotFound(_)) => {
                return Err(SftpError::InvalidPath(format!(
                    "path does not exist: {remote_path}"
                )))
            }
            Err(err) => return Err(err.into()),
        }

        let data = conn.read(remote_path).await?;
        tracing::info!(session_id, path = remote_path, bytes = data.len(), "sftp download complete");
        Ok((remote_file_name(remote_path).to_string(), data))
    }

    /// Run a structural operation. Only session resolution can fail the
    /// call itself; everything else is reported in the outcome.
    pub async fn perform_file_operation(
        &self,
        session_id: &str,
        op: &FileOperation,
    ) -> SftpResult<OperationOutcome> {
        if let Err(message) = operations::validate(op) {
            return Ok(OperationOutcome::failed(message));
        }
        let conn = self.adapter(session_id)?;

        match operations::execute(conn.as_ref(), op).await {
            Ok(message) => {
                tracing::info!(session_id, kind = ?op.kind, source = %op.source, "file operation done");
                Ok(OperationOutcome::ok(message))
            }
            Err(err) => {
                tracing::warn!(session_id, kind = ?op.kind, source = %op.source, error = %err, "file operation failed");
                Ok(OperationOutcome::failed(err.to_string()))
            }
        }
    }
}
