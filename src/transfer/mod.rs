//! File transfer orchestrator: a bounded, cancellable queue over a pluggable
//! backend (SFTP through a session, or plain HTTP).

mod backend;
mod error;
mod events;
pub mod handlers;
mod http;
mod manager;
mod progress;
mod record;
mod storage;

pub use backend::{
    JobKind, ProgressSink, SftpBackend, TransferBackend, TransferJob, TransferOutcome,
};
pub use error::TransferError;
pub use events::TransferEvent;
pub use http::HttpBackend;
pub use manager::{TransferManager, EVENT_CHANNEL_CAPACITY, HISTORY_LIMIT};
pub use progress::{ProgressSample, SpeedMeter};
pub use record::{
    TransferDirection, TransferRecord, TransferStats, TransferStatus, UploadFile,
};
pub use storage::LocalDownload;
