use thiserror::Error;

use crate::remote::{is_transient_io, RemoteError};
use crate::session::SessionError;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("transfer not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Validation(String),

    #[error("transfer cancelled")]
    Cancelled,

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("http transfer failed: {message}")]
    Http { message: String, retryable: bool },

    #[error("local file error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransferError {
    /// Network-layer failures are worth resubmitting; input problems never are.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransferError::Remote(err) => err.is_retryable(),
            TransferError::Session(err) => matches!(
                err,
                SessionError::NotConnected(_) | SessionError::Connection { .. }
            ),
            TransferError::Http { retryable, .. } => *retryable,
            TransferError::Io(err) => is_transient_io(err.kind()),
            TransferError::NotFound(_) | TransferError::Validation(_) | TransferError::Cancelled => {
                false
            }
        }
    }
}

impl From<reqwest::Error> for TransferError {
    fn from(err: reqwest::Error) -> Self {
        let retryable = err.is_timeout() || err.is_connect() || err.is_request() || err.is_body();
        TransferError::Http {
            message: err.to_string(),
            retryable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn classifies_retryable_failures() {
        assert!(TransferError::Io(io::Error::from(io::ErrorKind::TimedOut)).is_retryable());
        assert!(TransferError::Remote(RemoteError::Closed).is_retryable());
        assert!(TransferError::Http {
            message: "503".into(),
            retryable: true
        }
        .is_retryable());
    }

    #[test]
    fn input_failures_are_final() {
        assert!(!TransferError::Validation("file too large".into()).is_retryable());
        assert!(!TransferError::Remote(RemoteError::PermissionDenied("/x".into())).is_retryable());
        assert!(!TransferError::Cancelled.is_retryable());
        assert!(!TransferError::Session(SessionError::NotFound("s".into())).is_retryable());
    }
}
