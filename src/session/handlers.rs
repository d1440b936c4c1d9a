//! HTTP handlers for session lifecycle.

use axum::{extract::State, Json};
use serde::Deserialize;
use serde_json::{json, Value};

use super::{ConnectionRequest, SessionSummary};
use crate::common::AppError;
use crate::server::extract::JsonBody;
use crate::server::AppState;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionIdRequest {
    pub session_id: String,
}

/// Register a session. No network I/O happens until `connect`.
pub async fn create_session(
    State(state): State<AppState>,
    JsonBody(request): JsonBody<ConnectionRequest>,
) -> Result<Json<Value>, AppError> {
    let session = state.registry.create_session(request)?;
    Ok(Json(json!({
        "success": true,
        "sessionId": session.id,
        "session": session.summary(),
    })))
}

pub async fn connect_session(
    State(state): State<AppState>,
    JsonBody(request): JsonBody<SessionIdRequest>,
) -> Result<Json<Value>, AppError> {
    state.registry.connect(&request.session_id).await?;
    let session = state
        .registry
        .get_session(&request.session_id)
        .map(|s| s.summary());
    Ok(Json(json!({ "success": true, "session": session })))
}

/// Always succeeds, unknown ids included.
pub async fn disconnect_session(
    State(state): State<AppState>,
    JsonBody(request): JsonBody<SessionIdRequest>,
) -> Json<Value> {
    state.registry.disconnect(&request.session_id).await;
    Json(json!({ "success": true }))
}

pub async fn list_sessions(State(state): State<AppState>) -> Json<Value> {
    let sessions: Vec<SessionSummary> = state
        .registry
        .get_all_sessions()
        .iter()
        .map(|s| s.summary())
        .collect();
    Json(json!({ "success": true, "sessions": sessions }))
}
