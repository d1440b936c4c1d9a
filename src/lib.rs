pub mod bridge;
pub mod common;
pub mod files;
pub mod remote;
pub mod server;
pub mod session;
pub mod sftp;
pub mod transfer;
pub mod utils;

pub use common::{AppConfig, AppError};
