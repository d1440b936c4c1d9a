use thiserror::Error;

/// Failures surfaced by a remote connection adapter.
///
/// `Connect` and `Auth` carry the transport's own message so callers can
/// diagnose DNS, refusal and key problems without it being rewritten.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("{0}")]
    Connect(String),

    #[error("{0}")]
    Auth(String),

    #[error("host key verification failed: {0}")]
    HostKey(String),

    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error("no such file or directory: {0}")]
    NotFound(String),

    #[error("not a directory: {0}")]
    NotADirectory(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("remote operation failed: {0}")]
    Protocol(String),

    #[error("connection closed by remote host")]
    Closed,

    #[error("connection adapter already disposed")]
    Disposed,

    #[error("cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl RemoteError {
    /// Network-layer failures that may succeed if attempted again.
    pub fn is_retryable(&self) -> bool {
        match self {
            RemoteError::Timeout(_) | RemoteError::Closed | RemoteError::Connect(_) => true,
            RemoteError::Io(err) => is_transient_io(err.kind()),
            _ => false,
        }
    }
}

/// I/O error kinds caused by the network rather than the request.
pub fn is_transient_io(kind: std::io::ErrorKind) -> bool {
    matches!(
        kind,
        std::io::ErrorKind::TimedOut
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::Interrupted
    )
}

pub type RemoteResult<T> = Result<T, RemoteError>;
