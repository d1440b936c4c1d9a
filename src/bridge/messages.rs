//! Wire format of the realtime channel: JSON text frames shaped
//! `{"event": <name>, "data": {...}}`.

use serde::{Deserialize, Serialize};

use crate::session::ConnectionRequest;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientMessage {
    SshConnect {
        config: ConnectionRequest,
    },
    #[serde(rename_all = "camelCase")]
    TerminalInput { session_id: String, input: String },
    #[serde(rename_all = "camelCase")]
    TerminalResize {
        session_id: String,
        cols: u32,
        rows: u32,
    },
    /// Without a session id every shell of the connection is closed
    #[serde(rename_all = "camelCase")]
    SshDisconnect {
        #[serde(default)]
        session_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    MobileOptimize {
        #[serde(default)]
        low_bandwidth: Option<bool>,
        #[serde(default)]
        batch_updates: Option<bool>,
        #[serde(default)]
        compression_enabled: Option<bool>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerMessage {
    #[serde(rename_all = "camelCase")]
    SshConnected { session_id: String },
    #[serde(rename_all = "camelCase")]
    TerminalData {
        session_id: String,
        data: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        batched: Option<bool>,
        /// Unix milliseconds
        timestamp: i64,
    },
    #[serde(rename_all = "camelCase")]
    SshDisconnected { session_id: String },
    #[serde(rename_all = "camelCase")]
    SshError {
        #[serde(skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        message: String,
    },
}
