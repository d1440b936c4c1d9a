//! HTTP handlers for the SFTP engine.

use axum::{body::Body, extract::State, http::Response, Json};
use axum_typed_multipart::{FieldData, TryFromMultipart};
use bytes::Bytes;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{apply_list_options, FileOperation, ListOptions};
use crate::common::AppError;
use crate::server::extract::{JsonBody, MultipartForm};
use crate::server::{response, AppState};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListRequest {
    pub session_id: String,
    pub path: String,
    #[serde(default)]
    pub options: ListOptions,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadRequest {
    pub session_id: String,
    pub remote_path: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationRequest {
    pub session_id: String,
    pub operation: FileOperation,
}

/// Multipart body of a single-file SFTP upload.
#[derive(TryFromMultipart)]
pub struct UploadRequest {
    #[form_data(limit = "unlimited")]
    pub file: FieldData<Bytes>,
    #[form_data(field_name = "sessionId")]
    pub session_id: String,
    #[form_data(field_name = "remotePath")]
    pub remote_path: String,
}

pub async fn list_directory(
    State(state): State<AppState>,
    JsonBody(request): JsonBody<ListRequest>,
) -> Result<Json<Value>, AppError> {
    let listing = state
        .sftp
        .list_directory(&request.session_id, &request.path)
        .await?;
    let (listing, metadata) = apply_list_options(listing, &request.options);
    Ok(Json(json!({
        "success": true,
        "listing": listing,
        "metadata": metadata,
    })))
}

pub async fn upload_file(
    State(state): State<AppState>,
    MultipartForm(upload): MultipartForm<UploadRequest>,
) -> Result<Json<Value>, AppError> {
    let file_name = upload
        .file
        .metadata
        .file_name
        .clone()
        .ok_or_else(|| AppError::Validation("upload is missing a file name".into()))?;

    let started = Utc::now();
    let transfer_id = state
        .sftp
        .upload_file(
            &upload.session_id,
            &upload.file.contents,
            &upload.remote_path,
            &file_name,
        )
        .await?;
    state.transfers.record_completed_upload(
        transfer_id.clone(),
        &upload.session_id,
        &file_name,
        &upload.remote_path,
        upload.file.contents.len() as u64,
        started,
    );
    Ok(Json(json!({ "success": true, "transferId": transfer_id })))
}

pub async fn download_file(
    State(state): State<AppState>,
    JsonBody(request): JsonBody<DownloadRequest>,
) -> Result<Response<Body>, AppError> {
    let (name, data) = state
        .sftp
        .download_file(&request.session_id, &request.remote_path)
        .await?;
    response::attachment(&name, data)
}

/// Failed operations come back as `OPERATION_ERROR` with the reason.
pub async fn file_operation(
    State(state): State<AppState>,
    JsonBody(request): JsonBody<OperationRequest>,
) -> Result<Json<Value>, AppError> {
    let outcome = state
        .sftp
        .perform_file_operation(&request.session_id, &request.operation)
        .await?;

    if !outcome.success {
        return Err(AppError::Operation(
            outcome.error.unwrap_or_else(|| "operation failed".into()),
        ));
    }
    Ok(Json(json!(outcome)))
}
