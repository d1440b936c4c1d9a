//! Per-connection terminal bridge.
//!
//! One `TerminalBridge` lives for each realtime client. It owns the shells
//! that client opened; a pump task per shell forwards output to the client
//! in arrival order, either immediately or coalesced by an [`OutputBatcher`].

use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::batcher::{DeliveryMode, OutputBatcher, Utf8Decoder};
use super::messages::{ClientMessage, ServerMessage};
use crate::common::config::TerminalSettings;
use crate::remote::{ShellEvent, ShellWriter, TerminalSize};
use crate::session::{ConnectionRequest, SessionRegistry};
use crate::utils::sanitize::redact;

struct AttachedShell {
    writer: ShellWriter,
    pump: JoinHandle<()>,
}

#[derive(Debug, Default, Clone, Copy)]
struct Preferences {
    low_bandwidth: bool,
    batch_updates: Option<bool>,
}

pub struct TerminalBridge {
    registry: Arc<SessionRegistry>,
    settings: TerminalSettings,
    outbound: mpsc::Sender<ServerMessage>,
    shells: HashMap<String, AttachedShell>,
    prefs: Preferences,
    mode: watch::Sender<DeliveryMode>,
}

impl TerminalBridge {
    pub fn new(
        registry: Arc<SessionRegistry>,
        settings: TerminalSettings,
        outbound: mpsc::Sender<ServerMessage>,
    ) -> Self {
        let (mode, _) = watch::channel(DeliveryMode::Immediate);
        Self {
            registry,
            settings,
            outbound,
            shells: HashMap::new(),
            prefs: Preferences::default(),
            mode,
        }
    }

    //-- Accessors

    pub fn delivery_mode(&self) -> DeliveryMode {
        *self.mode.borrow()
    }

    /// Ids of the shells this connection currently owns.
    pub fn session_ids(&self) -> Vec<String> {
        self.shells.keys().cloned().collect()
    }

    pub async fn handle_message(&mut self, message: ClientMessage) {
        match message {
            ClientMessage::SshConnect { config } => self.connect(config).await,
            ClientMessage::TerminalInput { session_id, input } => {
                self.input(session_id, input).await
            }
            ClientMessage::TerminalResize {
                session_id,
                cols,
                rows,
            } => self.resize(session_id, cols, rows).await,
            ClientMessage::SshDisconnect {
                session_id: Some(session_id),
            } => {
                if !self.shells.contains_key(&session_id) {
                    self.reject_unowned(session_id).await;
                    return;
                }
                self.close_shell(&session_id).await;
            }
            ClientMessage::SshDisconnect { session_id: None } => {
                for session_id in self.session_ids() {
                    self.close_shell(&session_id).await;
                }
            }
            ClientMessage::MobileOptimize {
                low_bandwidth,
                batch_updates,
                compression_enabled,
            } => {
                if let Some(low_bandwidth) = low_bandwidth {
                    self.prefs.low_bandwidth = low_bandwidth;
                }
                if batch_updates.is_some() {
                    self.prefs.batch_updates = batch_updates;
                }
                let mode = DeliveryMode::from_preferences(
                    self.prefs.batch_updates,
                    self.prefs.low_bandwidth,
                    &self.settings,
                );
                self.mode.send_replace(mode);
                tracing::debug!(
                    ?mode,
                    compression = compression_enabled.unwrap_or(false),
                    "terminal delivery preferences updated"
                );
            }
        }
    }

    /// Close every owned shell and disconnect its session. Called when the
    /// client goes away.
    pub async fn shutdown(&mut self) {
        let ids = self.session_ids();
        for session_id in &ids {
            self.close_shell(session_id).await;
        }
        if !ids.is_empty() {
            tracing::info!(count = ids.len(), "terminal client gone, sessions closed");
        }
    }

    async fn connect(&mut self, request: ConnectionRequest) {
        let session = match self.registry.create_session(request) {
            Ok(session) => session,
            Err(err) => {
                self.emit(ServerMessage::SshError {
                    session_id: None,
                    message: err.to_string(),
                })
                .await;
                return;
            }
        };
        let session_id = session.id;

        let shell = async {
            self.registry.connect(&session_id).await?;
            let adapter = self.registry.adapter(&session_id)?;
            let size = TerminalSize {
                cols: self.settings.default_cols,
                rows: self.settings.default_rows,
            };
            Ok::<_, anyhow::Error>(adapter.request_shell(size).await?)
        }
        .await;

        let shell = match shell {
            Ok(shell) => shell,
            Err(err) => {
                let message = err.to_string();
                tracing::warn!(session_id = %session_id, error = %redact(&message), "terminal connect failed");
                self.registry.disconnect(&session_id).await;
                self.emit(ServerMessage::SshError {
                    session_id: Some(session_id),
                    message,
                })
                .await;
                return;
            }
        };

        // Announce before the pump can forward any banner output
        self.emit(ServerMessage::SshConnected {
            session_id: session_id.clone(),
        })
        .await;

        let (writer, events) = shell.into_parts();
        let pump = tokio::spawn(pump(Pump {
            session_id: session_id.clone(),
            events,
            mode: self.mode.subscribe(),
            threshold: self.settings.batch_threshold_bytes,
            outbound: self.outbound.clone(),
            registry: self.registry.clone(),
        }));
        self.shells
            .insert(session_id.clone(), AttachedShell { writer, pump });
        tracing::info!(session_id = %session_id, "terminal attached");
    }

    async fn input(&mut self, session_id: String, input: String) {
        let Some(writer) = self.writer(&session_id) else {
            self.reject_unowned(session_id).await;
            return;
        };
        self.registry.update_last_activity(&session_id);
        if let Err(err) = writer.write(Bytes::from(input.into_bytes())).await {
            self.emit(ServerMessage::SshError {
                session_id: Some(session_id),
                message: err.to_string(),
            })
            .await;
        }
    }

    async fn resize(&mut self, session_id: String, cols: u32, rows: u32) {
        let Some(writer) = self.writer(&session_id) else {
            self.reject_unowned(session_id).await;
            return;
        };
        if cols == 0 || rows == 0 {
            self.emit(ServerMessage::SshError {
                session_id: Some(session_id),
                message: format!("Invalid terminal size {cols}x{rows}"),
            })
            .await;
            return;
        }
        if let Err(err) = writer.resize(cols, rows).await {
            self.emit(ServerMessage::SshError {
                session_id: Some(session_id),
                message: err.to_string(),
            })
            .await;
        }
    }

    /// Writer of an owned, still running shell. Shells whose pump already
    /// finished are forgotten here.
    fn writer(&mut self, session_id: &str) -> Option<ShellWriter> {
        let finished = self.shells.get(session_id)?.pump.is_finished();
        if finished {
            self.shells.remove(session_id);
            return None;
        }
        self.shells.get(session_id).map(|shell| shell.writer.clone())
    }

    async fn close_shell(&mut self, session_id: &str) {
        let Some(shell) = self.shells.remove(session_id) else {
            return;
        };
        shell.writer.close().await;
        self.registry.disconnect(session_id).await;
        if self.outbound.is_closed() {
            shell.pump.abort();
        }
    }

    async fn reject_unowned(&self, session_id: String) {
        tracing::debug!(session_id = %session_id, "message for a session this client does not own");
        let message = format!("Session {session_id} is not attached to this connection");
        self.emit(ServerMessage::SshError {
            session_id: Some(session_id),
            message,
        })
        .await;
    }

    async fn emit(&self, message: ServerMessage) {
        // The client may already be gone; nothing left to tell it
        let _ = self.outbound.send(message).await;
    }
}

struct Pump {
    session_id: String,
    events: mpsc::Receiver<ShellEvent>,
    mode: watch::Receiver<DeliveryMode>,
    threshold: usize,
    outbound: mpsc::Sender<ServerMessage>,
    registry: Arc<SessionRegistry>,
}

impl Pump {
    async fn send_data(&self, decoder: &mut Utf8Decoder, chunk: &[u8], batched: bool) {
        let data = decoder.decode(chunk);
        if data.is_empty() {
            return;
        }
        let _ = self
            .outbound
            .send(ServerMessage::TerminalData {
                session_id: self.session_id.clone(),
                data,
                batched: batched.then_some(true),
                timestamp: chrono::Utc::now().timestamp_millis(),
            })
            .await;
    }
}

async fn pump(mut pump: Pump) {
    let mut batcher = OutputBatcher::new(pump.threshold);
    let mut decoder = Utf8Decoder::default();
    let mut mode = *pump.mode.borrow_and_update();
    let mut mode_open = true;

    loop {
        let deadline = match mode {
            DeliveryMode::Batched { interval } => batcher.deadline(interval),
            DeliveryMode::Immediate => None,
        };
        let wake = deadline
            .map(tokio::time::Instant::from_std)
            .unwrap_or_else(tokio::time::Instant::now);

        tokio::select! {
            event = pump.events.recv() => match event {
                Some(ShellEvent::Data(bytes)) => {
                    pump.registry.update_last_activity(&pump.session_id);
                    match mode {
                        DeliveryMode::Immediate => pump.send_data(&mut decoder, &bytes, false).await,
                        DeliveryMode::Batched { .. } => {
                            if let Some(chunk) = batcher.push(&bytes, Instant::now()) {
                                pump.send_data(&mut decoder, &chunk, true).await;
                            }
                        }
                    }
                }
                Some(ShellEvent::Exit(code)) => {
                    tracing::debug!(session_id = %pump.session_id, code, "shell exited");
                }
                Some(ShellEvent::Error(message)) => {
                    tracing::warn!(session_id = %pump.session_id, error = %redact(&message), "shell error");
                    if let Some(chunk) = batcher.take() {
                        pump.send_data(&mut decoder, &chunk, true).await;
                    }
                    let _ = pump
                        .outbound
                        .send(ServerMessage::SshError {
                            session_id: Some(pump.session_id.clone()),
                            message,
                        })
                        .await;
                    break;
                }
                Some(ShellEvent::Closed) | None => break,
            },
            _ = tokio::time::sleep_until(wake), if deadline.is_some() => {
                if let Some(chunk) = batcher.take() {
                    pump.send_data(&mut decoder, &chunk, true).await;
                }
            }
            changed = pump.mode.changed(), if mode_open => {
                if changed.is_err() {
                    mode_open = false;
                    continue;
                }
                // Switching modes must not reorder what is already buffered
                if let Some(chunk) = batcher.take() {
                    pump.send_data(&mut decoder, &chunk, true).await;
                }
                mode = *pump.mode.borrow_and_update();
            }
        }
    }

    if let Some(chunk) = batcher.take() {
        pump.send_data(&mut decoder, &chunk, true).await;
    }
    let rest = decoder.finish();
    if !rest.is_empty() {
        let _ = pump
            .outbound
            .send(ServerMessage::TerminalData {
                session_id: pump.session_id.clone(),
                data: rest,
                batched: None,
                timestamp: chrono::Utc::now().timestamp_millis(),
            })
            .await;
    }

    pump.registry.disconnect(&pump.session_id).await;
    let _ = pump
        .outbound
        .send(ServerMessage::SshDisconnected {
            session_id: pump.session_id.clone(),
        })
        .await;
    tracing::debug!(session_id = %pump.session_id, "terminal pump stopped");
}
