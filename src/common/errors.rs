//! Boundary error type shared by every HTTP handler.
//!
//! Every response produced from an `AppError` carries `success: false`, a
//! human readable `error` and a machine readable `code`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::files::FileStoreError;
use crate::remote::RemoteError;
use crate::session::SessionError;
use crate::sftp::SftpError;
use crate::transfer::TransferError;
use crate::utils::security::PathValidationError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Path(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Connection(String),

    #[error("{message}")]
    Transfer { message: String, retryable: bool },

    #[error("{0}")]
    Operation(String),

    #[error("{0}")]
    PayloadTooLarge(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::Path(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Connection(_) => StatusCode::BAD_GATEWAY,
            AppError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::Transfer { .. } | AppError::Operation(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::Path(_) => "PATH_ERROR",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Connection(_) => "CONNECTION_ERROR",
            AppError::Transfer { .. } => "TRANSFER_ERROR",
            AppError::Operation(_) => "OPERATION_ERROR",
            AppError::PayloadTooLarge(_) => "PAYLOAD_TOO_LARGE",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();

        // Internal errors keep their chain in the log only
        let message = match &self {
            AppError::Internal(err) => {
                tracing::error!(error = %format!("{err:#}"), "internal error");
                "internal server error".to_string()
            }
            other => {
                tracing::debug!(code, error = %other, "request rejected");
                other.to_string()
            }
        };

        let mut body = json!({
            "success": false,
            "error": message,
            "code": code,
        });
        if let AppError::Transfer { retryable, .. } = &self {
            body["retryable"] = json!(retryable);
        }

        (status, Json(body)).into_response()
    }
}

impl From<PathValidationError> for AppError {
    fn from(err: PathValidationError) -> Self {
        AppError::Path(err.to_string())
    }
}

impl From<SessionError> for AppError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Validation(msg) => AppError::Validation(msg),
            SessionError::NotFound(id) => AppError::NotFound(format!("session not found: {id}")),
            SessionError::NotConnected(id) => {
                AppError::Connection(format!("session not connected: {id}"))
            }
            SessionError::Connection { reason } => AppError::Connection(reason),
            err @ SessionError::Terminated(_) => AppError::Validation(err.to_string()),
        }
    }
}

impl From<RemoteError> for AppError {
    fn from(err: RemoteError) -> Self {
        match &err {
            RemoteError::NotFound(path) => AppError::Path(format!("no such path: {path}")),
            RemoteError::NotADirectory(path) => AppError::Path(format!("not a directory: {path}")),
            RemoteError::Connect(reason) | RemoteError::Auth(reason) => {
                AppError::Connection(reason.clone())
            }
            RemoteError::HostKey(_) => AppError::Connection(err.to_string()),
            _ if err.is_retryable() => AppError::Transfer {
                message: err.to_string(),
                retryable: true,
            },
            _ => AppError::Operation(err.to_string()),
        }
    }
}

impl From<SftpError> for AppError {
    fn from(err: SftpError) -> Self {
        match err {
            SftpError::Path(err) => err.into(),
            SftpError::InvalidPath(msg) => AppError::Path(msg),
            SftpError::Session(err) => err.into(),
            SftpError::Remote(err) => err.into(),
        }
    }
}

impl From<FileStoreError> for AppError {
    fn from(err: FileStoreError) -> Self {
        match err {
            FileStoreError::Path(err) => err.into(),
            FileStoreError::TooLarge { .. } => AppError::PayloadTooLarge(err.to_string()),
            FileStoreError::UnsupportedType(_) => AppError::Validation(err.to_string()),
            FileStoreError::NotFound(_) => AppError::NotFound(err.to_string()),
            FileStoreError::NotAFile(_) => AppError::Path(err.to_string()),
            FileStoreError::Io(err) => {
                AppError::Internal(anyhow::Error::new(err).context("file store I/O failed"))
            }
        }
    }
}

impl From<TransferError> for AppError {
    fn from(err: TransferError) -> Self {
        match err {
            TransferError::NotFound(id) => AppError::NotFound(format!("transfer not found: {id}")),
            TransferError::Validation(msg) => AppError::Validation(msg),
            other => AppError::Transfer {
                retryable: other.is_retryable(),
                message: other.to_string(),
            },
        }
    }
}
