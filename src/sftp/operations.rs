//! Structural file operations. None of them are transactional: a failure
//! part way through a recursive copy or delete leaves whatever was already
//! done in place.

use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};

use crate::remote::{RemoteConnection, RemoteError, RemoteResult};
use crate::utils::security::{join_remote, remote_file_name, validate_remote_path};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileOperationKind {
    CreateDirectory,
    Delete,
    Rename,
    Copy,
    Move,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileOperation {
    #[serde(rename = "type")]
    pub kind: FileOperationKind,
    pub source: String,
    pub destination: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OperationOutcome {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            message: None,
            error: Some(error.into()),
        }
    }
}

/// Input problems caught before any remote call.
pub(crate) fn validate(op: &FileOperation) -> Result<(), String> {
    validate_remote_path(&op.source).map_err(|e| format!("invalid source: {e}"))?;

    let needs_destination = matches!(
        op.kind,
        FileOperationKind::Rename | FileOperationKind::Copy | FileOperationKind::Move
    );
    match (&op.destination, needs_destination) {
        (None, true) => Err(format!("destination is required for {:?}", op.kind).to_lowercase()),
        (Some(dest), true) => {
            validate_remote_path(dest).map_err(|e| format!("invalid destination: {e}"))
        }
        _ => Ok(()),
    }
}

pub(crate) async fn execute(
    conn: &dyn RemoteConnection,
    op: &FileOperation,
) -> RemoteResult<String> {
    let source = op.source.as_str();
    let destination = op.destination.as_deref().unwrap_or_default();

    match op.kind {
        FileOperationKind::CreateDirectory => {
            conn.mkdir(source).await?;
            Ok(format!("created directory {source}"))
        }
        FileOperationKind::Delete => {
            delete_tree(conn, source).await?;
            Ok(format!("deleted {source}"))
        }
        FileOperationKind::Rename => {
            conn.rename(source, destination).await?;
            Ok(format!("renamed {source} to {destination}"))
        }
        FileOperationKind::Move => {
            let target = resolve_target(conn, source, destination).await?;
            conn.rename(source, &target).await?;
            Ok(format!("moved {source} to {target}"))
        }
        FileOperationKind::Copy => {
            let target = resolve_target(conn, source, destination).await?;
            let prefix = format!("{}/", source.trim_end_matches('/'));
            if target == source || target.starts_with(&prefix) {
                return Err(RemoteError::Protocol(format!(
                    "cannot copy {source} into itself"
                )));
            }
            copy_tree(conn, source, &target).await?;
            Ok(format!("copied {source} to {target}"))
        }
    }
}

/// An existing directory as destination receives the source by name.
async fn resolve_target(
    conn: &dyn RemoteConnection,
    source: &str,
    destination: &str,
) -> RemoteResult<String> {
    match conn.stat(destination).await {
        Ok(meta) if meta.is_dir() => Ok(join_remote(destination, remote_file_name(source))),
        Ok(_) | Err(RemoteError::NotFound(_)) => Ok(destination.to_string()),
        Err(err) => Err(err),
    }
}

fn delete_tree<'a>(conn: &'a dyn RemoteConnection, path: &'a str) -> BoxFuture<'a, RemoteResult<()>> {
    async move {
        if !conn.stat(path).await?.is_dir() {
            return conn.remove(path).await;
        }
        for entry in conn.list(path).await? {
            let child = join_remote(path, &entry.name);
            if entry.metadata.is_dir() {
                delete_tree(conn, &child).await?;
            } else {
                conn.remove(&child).await?;
            }
        }
        conn.rmdir(path).await
    }
    .boxed()
}

fn copy_tree<'a>(
    conn: &'a dyn RemoteConnection,
    from: &'a str,
    to: &'a str,
) -> BoxFuture<'a, RemoteResult<()>> {
    async move {
        if !conn.stat(from).await?.is_dir() {
            let data = conn.read(from).await?;
            return conn.write(to, &data).await;
        }
        conn.mkdir(to).await?;
        for entry in conn.list(from).await? {
            let child_from = join_remote(from, &entry.name);
            let child_to = join_remote(to, &entry.name);
            copy_tree(conn, &child_from, &child_to).await?;
        }
        Ok(())
    }
    .boxed()
}
