use serde::Serialize;

use super::record::TransferRecord;

/// Notifications published on the manager's broadcast channel.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum TransferEvent {
    TransferAdded(TransferRecord),
    #[serde(rename_all = "camelCase")]
    TransferProgress {
        id: String,
        transferred: u64,
        size: u64,
        speed: f64,
        estimated_time_remaining: Option<f64>,
    },
    /// Status changed
    TransferUpdated(TransferRecord),
    #[serde(rename_all = "camelCase")]
    TransferError {
        id: String,
        message: String,
        retryable: bool,
    },
    TransferCompleted(TransferRecord),
}
