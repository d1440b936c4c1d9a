use serde::Serialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::common::config::FileStoreSettings;
use crate::utils::security::{confine_path, validate_filename, PathValidationError};

const DEFAULT_MIME: &str = "application/octet-stream";

#[derive(Debug, Error)]
pub enum FileStoreError {
    #[error(transparent)]
    Path(#[from] PathValidationError),

    #[error("file is {size} bytes, the limit is {limit} bytes")]
    TooLarge { size: u64, limit: u64 },

    #[error("file type {0} is not allowed")]
    UnsupportedType(String),

    #[error("no such file: {0}")]
    NotFound(String),

    #[error("not a file: {0}")]
    NotAFile(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredFile {
    /// Path relative to the store root, always with '/' separators
    pub file_path: String,
    pub size: u64,
}

/// Directory-rooted store behind the plain HTTP file endpoint.
#[derive(Debug, Clone)]
pub struct LocalFileStore {
    settings: FileStoreSettings,
}

impl LocalFileStore {
    pub fn new(settings: FileStoreSettings) -> Self {
        Self { settings }
    }

    pub fn root(&self) -> &Path {
        &self.settings.root
    }

    pub fn max_upload_bytes(&self) -> u64 {
        self.settings.max_upload_bytes
    }

    /// Size and type checks, run before any byte touches the disk.
    pub fn check_upload(
        &self,
        size: u64,
        content_type: Option<&str>,
    ) -> Result<(), FileStoreError> {
        let limit = self.settings.max_upload_bytes;
        if size > limit {
            return Err(FileStoreError::TooLarge { size, limit });
        }

        let mime = essence(content_type.unwrap_or(DEFAULT_MIME));
        let allowed = self
            .settings
            .allowed_mime_prefixes
            .iter()
            .any(|prefix| mime.starts_with(&prefix.to_ascii_lowercase()));
        if !allowed {
            return Err(FileStoreError::UnsupportedType(mime));
        }
        Ok(())
    }

    /// Write an upload. `remote_path` names the destination file; when it is
    /// empty or ends in '/', `file_name` is appended.
    pub async fn store(
        &self,
        remote_path: &str,
        file_name: Option<&str>,
        content_type: Option<&str>,
        data: &[u8],
    ) -> Result<StoredFile, FileStoreError> {
        self.check_upload(data.len() as u64, content_type)?;

        let relative = destination(remote_path, file_name)?;
        let target = self.resolve(&relative)?;

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }
        if fs::metadata(&target).await.is_ok_and(|m| m.is_dir()) {
            return Err(FileStoreError::NotAFile(relative));
        }

        // Write beside the target under a name no other upload can hold,
        // then swap in
        let partial = target.with_file_name(format!(
            ".{}.{}.part",
            target
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("upload"),
            Uuid::new_v4().simple()
        ));
        if let Err(err) = write_new(&partial, data).await {
            let _ = fs::remove_file(&partial).await;
            return Err(err.into());
        }
        if let Err(err) = fs::rename(&partial, &target).await {
            let _ = fs::remove_file(&partial).await;
            return Err(err.into());
        }

        tracing::info!(path = %relative, size = data.len(), "file stored");
        Ok(StoredFile {
            file_path: relative,
            size: data.len() as u64,
        })
    }

    /// Read a stored file. Returns its name and contents.
    pub async fn read(&self, remote_path: &str) -> Result<(String, Vec<u8>), FileStoreError> {
        let relative = remote_path.trim_start_matches('/');
        let target = self.resolve(relative)?;

        let metadata = match fs::metadata(&target).await {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(FileStoreError::NotFound(relative.to_string()))
            }
            Err(err) => return Err(err.into()),
        };
        if !metadata.is_file() {
            return Err(FileStoreError::NotAFile(relative.to_string()));
        }

        let data = fs::read(&target).await?;
        let name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "download".to_string());
        tracing::debug!(path = %relative, size = data.len(), "file read");
        Ok((name, data))
    }

    fn resolve(&self, relative: &str) -> Result<PathBuf, PathValidationError> {
        confine_path(&self.settings.root, relative)
    }
}

/// Relative destination for an upload, rooted at the store.
fn destination(remote_path: &str, file_name: Option<&str>) -> Result<String, FileStoreError> {
    let base = remote_path.trim_start_matches('/');
    if !base.is_empty() && !base.ends_with('/') {
        return Ok(base.to_string());
    }

    let name = file_name.ok_or(PathValidationError::Empty)?;
    validate_filename(name)?;
    Ok(format!("{base}{name}"))
}

/// `text/plain; charset=utf-8` -> `text/plain`
fn essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

async fn write_new(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await?;
    file.write_all(data).await?;
    file.flush().await
}
