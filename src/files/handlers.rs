//! HTTP handlers for the plain file endpoints.

use axum::{body::Body, extract::State, http::Response, Json};
use axum_typed_multipart::{FieldData, TryFromMultipart};
use bytes::Bytes;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::common::AppError;
use crate::server::extract::{JsonBody, MultipartForm};
use crate::server::{response, AppState};

#[derive(TryFromMultipart)]
pub struct FileUploadRequest {
    #[form_data(limit = "unlimited")]
    pub file: FieldData<Bytes>,
    #[form_data(field_name = "remotePath")]
    pub remote_path: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDownloadRequest {
    pub remote_path: String,
}

pub async fn upload(
    State(state): State<AppState>,
    MultipartForm(upload): MultipartForm<FileUploadRequest>,
) -> Result<Json<Value>, AppError> {
    let metadata = &upload.file.metadata;
    let stored = state
        .files
        .store(
            upload.remote_path.as_deref().unwrap_or_default(),
            metadata.file_name.as_deref(),
            metadata.content_type.as_deref(),
            &upload.file.contents,
        )
        .await?;

    Ok(Json(json!({
        "success": true,
        "filePath": stored.file_path,
        "size": stored.size,
    })))
}

pub async fn download(
    State(state): State<AppState>,
    JsonBody(request): JsonBody<FileDownloadRequest>,
) -> Result<Response<Body>, AppError> {
    let (name, data) = state.files.read(&request.remote_path).await?;
    response::attachment(&name, data)
}
