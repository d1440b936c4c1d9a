//! Runtime lifecycle: bind, serve, background tasks, and shutdown.

use crate::common::AppConfig;
use crate::remote::ssh::RusshConnector;
use crate::server::{routes, AppState};
use crate::transfer::TransferEvent;
use anyhow::{Context, Result};
use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const GRACEFUL_SHUTDOWN: Duration = Duration::from_secs(10);

/// Serve until Ctrl+C, then drain and close every session.
pub async fn serve(config: AppConfig) -> Result<()> {
    let connector = Arc::new(RusshConnector::new(&config.sessions));
    let state = AppState::new(config, connector).context("Failed to initialize services")?;

    let (addr, server_handle) = start_server(&state)?;
    tracing::info!(%addr, "shellbridge listening");

    let background = CancellationToken::new();
    let cleanup = state.registry.spawn_cleanup_task(
        state.config.sessions.cleanup_interval(),
        background.child_token(),
    );
    let event_log = spawn_event_log(&state, background.child_token());

    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "Failed to listen for Ctrl+C");
    }
    tracing::info!("Ctrl+C received - initiating graceful shutdown");

    shutdown(&state, server_handle, background, [cleanup, event_log]).await;
    Ok(())
}

/// Bind the configured address and spawn the server. Returns the bound
/// address, which differs from the configured one when port 0 is used.
pub fn start_server(state: &AppState) -> Result<(SocketAddr, axum_server::Handle)> {
    let server = &state.config.server;
    let addr = format!("{}:{}", server.host, server.port);
    let listener = TcpListener::bind(&addr).with_context(|| {
        format!(
            "Failed to bind {addr} - port already in use.\n\n\
             Is another shellbridge instance running?"
        )
    })?;
    listener
        .set_nonblocking(true)
        .context("Failed to set listener to non-blocking mode")?;
    let local = listener.local_addr()?;

    let app = routes::create_router(state.clone());
    let handle = axum_server::Handle::new();
    let server_handle = handle.clone();
    tokio::spawn(async move {
        if let Err(e) = axum_server::from_tcp(listener)
            .handle(server_handle)
            .serve(app.into_make_service())
            .await
        {
            tracing::error!(error = %e, "server error");
        }
    });

    Ok((local, handle))
}

/// Log transfer lifecycle events until cancelled.
fn spawn_event_log(state: &AppState, cancel: CancellationToken) -> JoinHandle<()> {
    let mut events = state.transfers.subscribe();
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => event,
            };
            match event {
                Ok(TransferEvent::TransferCompleted(record)) => {
                    tracing::info!(
                        transfer_id = %record.id,
                        file = %record.file_name,
                        bytes = record.transferred,
                        "transfer completed"
                    );
                }
                Ok(TransferEvent::TransferError {
                    id,
                    message,
                    retryable,
                }) => {
                    tracing::warn!(transfer_id = %id, retryable, error = %message, "transfer failed");
                }
                Ok(TransferEvent::TransferUpdated(record)) => {
                    tracing::debug!(
                        transfer_id = %record.id,
                        status = ?record.status,
                        percent = record.percent(),
                        attempts = record.attempts,
                        "transfer updated"
                    );
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "transfer event log lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

//==========
// SHUTDOWN
//==========

/// Stop accepting connections, cancel transfers, and close sessions.
async fn shutdown<const N: usize>(
    state: &AppState,
    server_handle: axum_server::Handle,
    background: CancellationToken,
    tasks: [JoinHandle<()>; N],
) {
    server_handle.graceful_shutdown(Some(GRACEFUL_SHUTDOWN));
    tracing::info!("Server stopped accepting new connections");

    background.cancel();
    for task in tasks {
        let _ = task.await;
    }

    let remaining = state.transfers.get_active_transfers().len();
    if remaining > 0 {
        tracing::warn!("Cancelling {} unfinished transfer(s)", remaining);
    }
    state.shutdown().await;
    tracing::info!("Server shutdown complete");
}
