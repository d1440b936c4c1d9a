//! Router definition for the HTTP and realtime surface.

use crate::{bridge, files, session, sftp, transfer};
use axum::{extract::DefaultBodyLimit, routing::*, Router};

use super::AppState;

// Multipart framing and form fields on top of the file itself
const BODY_OVERHEAD_BYTES: u64 = 1024 * 1024;

/// Build the full router over a shared state.
pub fn create_router(state: AppState) -> Router {
    let body_limit = state
        .config
        .files
        .max_upload_bytes
        .saturating_add(BODY_OVERHEAD_BYTES);
    let body_limit = usize::try_from(body_limit).unwrap_or(usize::MAX);

    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/ws", get(bridge::ws::ws_handler))
        // sessions
        .route("/api/session/create", post(session::handlers::create_session))
        .route("/api/session/connect", post(session::handlers::connect_session))
        .route(
            "/api/session/disconnect",
            post(session::handlers::disconnect_session),
        )
        .route("/api/session/list", get(session::handlers::list_sessions))
        // sftp
        .route("/api/sftp/list", post(sftp::handlers::list_directory))
        .route("/api/sftp/upload", post(sftp::handlers::upload_file))
        .route("/api/sftp/download", post(sftp::handlers::download_file))
        .route("/api/sftp/operation", post(sftp::handlers::file_operation))
        // plain files
        .route("/api/files/upload", post(files::handlers::upload))
        .route("/api/files/download", post(files::handlers::download))
        // transfer queue
        .route("/api/transfers", get(transfer::handlers::active_transfers))
        .route("/api/transfers/upload", post(transfer::handlers::queue_upload))
        .route(
            "/api/transfers/download",
            post(transfer::handlers::queue_download),
        )
        .route("/api/transfers/stats", get(transfer::handlers::transfer_stats))
        .route(
            "/api/transfers/history",
            get(transfer::handlers::transfer_history).delete(transfer::handlers::clear_history),
        )
        .route("/api/transfers/:id", get(transfer::handlers::get_transfer))
        .route(
            "/api/transfers/:id/cancel",
            post(transfer::handlers::cancel_transfer),
        )
        .route(
            "/api/transfers/:id/retry",
            post(transfer::handlers::retry_transfer),
        )
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
}
