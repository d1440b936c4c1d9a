//! Remote connection adapter: one authenticated SSH connection per session.
//!
//! [`Connector`] opens connections, [`RemoteConnection`] is the live adapter
//! the registry attaches to a session. The SFTP engine, the transfer backends
//! and the terminal bridge only ever talk to these traits, so the russh
//! implementation in [`ssh`] and the in-memory [`mock`] are interchangeable.

mod error;
pub mod known_hosts;
pub mod mock;
mod shell;
pub mod ssh;

pub use error::{is_transient_io, RemoteError, RemoteResult};
pub use shell::{ShellCommand, ShellEvent, ShellHandle, ShellWriter, TerminalSize};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::session::ConnectionConfig;

pub type RemoteReader = Box<dyn AsyncRead + Send + Unpin>;
pub type RemoteWriter = Box<dyn AsyncWrite + Send + Unpin>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteFileKind {
    File,
    Directory,
    Symlink,
    Other,
}

/// Attributes of one remote path as reported by `stat`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteMetadata {
    pub kind: RemoteFileKind,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
    /// Raw mode bits including the file type
    pub mode: Option<u32>,
    pub owner: Option<String>,
    pub group: Option<String>,
}

impl RemoteMetadata {
    pub fn is_dir(&self) -> bool {
        self.kind == RemoteFileKind::Directory
    }
}

/// One entry of a remote directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub name: String,
    pub metadata: RemoteMetadata,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<u32>,
}

/// Opens authenticated connections.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, config: &ConnectionConfig) -> RemoteResult<Arc<dyn RemoteConnection>>;
}

/// A live, authenticated remote connection.
///
/// Every method other than `dispose` fails with [`RemoteError::Disposed`]
/// once the adapter has been disposed.
#[async_trait]
pub trait RemoteConnection: Send + Sync {
    async fn request_shell(&self, size: TerminalSize) -> RemoteResult<ShellHandle>;

    async fn exec(&self, command: &str) -> RemoteResult<ExecOutput>;

    async fn list(&self, path: &str) -> RemoteResult<Vec<RemoteEntry>>;

    async fn stat(&self, path: &str) -> RemoteResult<RemoteMetadata>;

    async fn exists(&self, path: &str) -> RemoteResult<bool>;

    /// Read a whole file.
    async fn read(&self, path: &str) -> RemoteResult<Vec<u8>>;

    /// Create or truncate a file and write `data` to it.
    async fn write(&self, path: &str, data: &[u8]) -> RemoteResult<()>;

    async fn open_read(&self, path: &str) -> RemoteResult<RemoteReader>;

    async fn open_write(&self, path: &str) -> RemoteResult<RemoteWriter>;

    async fn mkdir(&self, path: &str) -> RemoteResult<()>;

    async fn rmdir(&self, path: &str) -> RemoteResult<()>;

    async fn remove(&self, path: &str) -> RemoteResult<()>;

    async fn rename(&self, from: &str, to: &str) -> RemoteResult<()>;

    /// Close the connection. Idempotent and tolerant of a dead peer.
    async fn dispose(&self) -> RemoteResult<()>;

    fn is_closed(&self) -> bool;
}

/// Run one remote command, failing with [`RemoteError::Timeout`] when it
/// outlives `limit`.
pub(crate) async fn bounded_exec<F>(limit: Duration, run: F) -> RemoteResult<ExecOutput>
where
    F: Future<Output = RemoteResult<ExecOutput>>,
{
    tokio::time::timeout(limit, run)
        .await
        .map_err(|_| RemoteError::Timeout(format!("exec after {limit:?}")))?
}

/// Render POSIX mode bits the way `ls -l` does, e.g. `drwxr-xr-x`.
pub fn permission_string(kind: RemoteFileKind, mode: Option<u32>) -> String {
    let type_char = match kind {
        RemoteFileKind::Directory => 'd',
        RemoteFileKind::Symlink => 'l',
        RemoteFileKind::File | RemoteFileKind::Other => '-',
    };
    let Some(mode) = mode else {
        return format!("{type_char}?????????");
    };

    let mut out = String::with_capacity(10);
    out.push(type_char);
    for shift in [6u32, 3, 0] {
        let bits = (mode >> shift) & 0o7;
        out.push(if bits & 0o4 != 0 { 'r' } else { '-' });
        out.push(if bits & 0o2 != 0 { 'w' } else { '-' });
        out.push(if bits & 0o1 != 0 { 'x' } else { '-' });
    }
    out
}

/// File type from the `S_IFMT` bits of a mode.
pub fn kind_from_mode(mode: u32) -> RemoteFileKind {
    match mode & 0o170000 {
        0o040000 => RemoteFileKind::Directory,
        0o100000 => RemoteFileKind::File,
        0o120000 => RemoteFileKind::Symlink,
        _ => RemoteFileKind::Other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_permission_strings() {
        assert_eq!(
            permission_string(RemoteFileKind::Directory, Some(0o040755)),
            "drwxr-xr-x"
        );
        assert_eq!(
            permission_string(RemoteFileKind::File, Some(0o100640)),
            "-rw-r-----"
        );
        assert_eq!(permission_string(RemoteFileKind::File, None), "-?????????");
    }

    #[test]
    fn decodes_kind_from_mode() {
        assert_eq!(kind_from_mode(0o040700), RemoteFileKind::Directory);
        assert_eq!(kind_from_mode(0o100644), RemoteFileKind::File);
        assert_eq!(kind_from_mode(0o120777), RemoteFileKind::Symlink);
    }
}
