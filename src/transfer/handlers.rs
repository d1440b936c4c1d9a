//! HTTP handlers over the transfer queue.

use axum::{
    extract::{Path, State},
    Json,
};
use axum_typed_multipart::{FieldData, TryFromMultipart};
use bytes::Bytes;
use serde::Deserialize;
use serde_json::{json, Value};

use super::UploadFile;
use crate::common::AppError;
use crate::server::extract::{JsonBody, MultipartForm};
use crate::server::AppState;

#[derive(TryFromMultipart)]
pub struct QueueUploadRequest {
    #[form_data(limit = "unlimited")]
    pub files: Vec<FieldData<Bytes>>,
    #[form_data(field_name = "sessionId")]
    pub session_id: Option<String>,
    #[form_data(field_name = "remotePath")]
    pub remote_path: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueDownloadRequest {
    pub session_id: Option<String>,
    pub remote_path: String,
    pub local_name: Option<String>,
}

// The SFTP backend cannot do anything without a session to run through
fn require_session(state: &AppState, session_id: Option<&str>) -> Result<(), AppError> {
    if session_id.is_none() && state.transfers.backend_name() == "sftp" {
        return Err(AppError::Validation(
            "sessionId is required for SFTP transfers".into(),
        ));
    }
    Ok(())
}

/// Queue every uploaded part. Ids come back in part order while the
/// transfers are still pending.
pub async fn queue_upload(
    State(state): State<AppState>,
    MultipartForm(request): MultipartForm<QueueUploadRequest>,
) -> Result<Json<Value>, AppError> {
    require_session(&state, request.session_id.as_deref())?;
    let files = request
        .files
        .into_iter()
        .map(|field| {
            let name = field
                .metadata
                .file_name
                .ok_or_else(|| AppError::Validation("every file needs a file name".into()))?;
            Ok(UploadFile::new(name, field.contents))
        })
        .collect::<Result<Vec<_>, AppError>>()?;

    let ids = state.transfers.upload_files(
        request.session_id.as_deref(),
        files,
        &request.remote_path,
    )?;
    Ok(Json(json!({ "success": true, "transferIds": ids })))
}

pub async fn queue_download(
    State(state): State<AppState>,
    JsonBody(request): JsonBody<QueueDownloadRequest>,
) -> Result<Json<Value>, AppError> {
    require_session(&state, request.session_id.as_deref())?;
    let id = state.transfers.download_file(
        request.session_id.as_deref(),
        &request.remote_path,
        request.local_name.as_deref(),
    )?;
    Ok(Json(json!({ "success": true, "transferId": id })))
}

pub async fn active_transfers(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "success": true,
        "transfers": state.transfers.get_active_transfers(),
    }))
}

pub async fn transfer_history(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "success": true,
        "transfers": state.transfers.get_history(),
    }))
}

pub async fn transfer_stats(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "success": true,
        "stats": state.transfers.get_transfer_stats(),
    }))
}

pub async fn get_transfer(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let record = state
        .transfers
        .get_transfer(&id)
        .ok_or_else(|| AppError::NotFound(format!("transfer not found: {id}")))?;
    Ok(Json(json!({ "success": true, "transfer": record })))
}

pub async fn cancel_transfer(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let record = state.transfers.cancel_transfer(&id)?;
    Ok(Json(json!({ "success": true, "transfer": record })))
}

pub async fn retry_transfer(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let record = state.transfers.retry_transfer(&id)?;
    Ok(Json(json!({ "success": true, "transfer": record })))
}

pub async fn clear_history(State(state): State<AppState>) -> Json<Value> {
    let cleared = state.transfers.clear_history();
    Json(json!({ "success": true, "cleared": cleared }))
}
