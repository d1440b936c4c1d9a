//! Realtime terminal bridge between WebSocket clients and remote shells.

mod batcher;
mod messages;
mod terminal;
pub mod ws;

pub use batcher::{DeliveryMode, OutputBatcher, Utf8Decoder};
pub use messages::{ClientMessage, ServerMessage};
pub use terminal::TerminalBridge;
