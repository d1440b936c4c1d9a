//! Session registry and the data it owns.

pub mod handlers;
mod registry;
mod types;

pub use registry::SessionRegistry;
pub use types::{
    ConnectionConfig, ConnectionRequest, Credential, Session, SessionError, SessionState,
    SessionSummary, DEFAULT_SSH_PORT,
};
