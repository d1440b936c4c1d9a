//! `/ws` endpoint: one [`TerminalBridge`] per socket.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::fmt::Display;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::{ClientMessage, ServerMessage, TerminalBridge};
use crate::common::config::TerminalSettings;
use crate::server::AppState;
use crate::session::SessionRegistry;

const OUTBOUND_CAPACITY: usize = 256;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| run_socket(socket, state))
}

async fn run_socket(socket: WebSocket, state: AppState) {
    let (sink, stream) = socket.split();
    serve_terminal(
        stream,
        sink,
        state.registry.clone(),
        state.config.terminal.clone(),
    )
    .await;
}

/// Drive one client: parse incoming text frames into bridge calls and write
/// server messages back as JSON text frames. Returns once the client closes
/// or the socket fails, after every shell the client opened is shut down.
async fn serve_terminal<I, O, E>(
    mut incoming: I,
    mut outgoing: O,
    registry: Arc<SessionRegistry>,
    settings: TerminalSettings,
) where
    I: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
    O: Sink<Message> + Send + Unpin + 'static,
{
    let (outbound, mut outbound_rx) = mpsc::channel::<ServerMessage>(OUTBOUND_CAPACITY);

    // Single writer keeps frames in the order they were produced
    let writer = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            let text = match serde_json::to_string(&message) {
                Ok(text) => text,
                Err(err) => {
                    tracing::error!(error = %err, "failed to encode server message");
                    continue;
                }
            };
            if outgoing.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let mut bridge = TerminalBridge::new(registry, settings, outbound.clone());
    tracing::debug!("terminal client connected");

    while let Some(frame) = incoming.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(err) => {
                tracing::debug!(error = %err, "terminal socket error");
                break;
            }
        };

        match serde_json::from_str::<ClientMessage>(&text) {
            Ok(message) => bridge.handle_message(message).await,
            Err(err) => {
                let _ = outbound
                    .send(ServerMessage::SshError {
                        session_id: None,
                        message: format!("Invalid message: {err}"),
                    })
                    .await;
            }
        }
    }

    bridge.shutdown().await;
    drop(bridge);
    writer.abort();
    tracing::debug!("terminal client disconnected");
}
