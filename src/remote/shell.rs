//! Interactive shell handle shared by the SSH adapter and the mock.
//!
//! All writes and resizes travel over a single mpsc channel to the task that
//! owns the underlying channel, so writes reach the remote shell in exactly
//! the order they were submitted.

use bytes::Bytes;
use tokio::sync::mpsc;

use super::error::{RemoteError, RemoteResult};

pub const SHELL_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminalSize {
    pub cols: u32,
    pub rows: u32,
}

impl Default for TerminalSize {
    fn default() -> Self {
        Self { cols: 80, rows: 24 }
    }
}

/// Requests sent from the bridge to the shell owner task.
#[derive(Debug)]
pub enum ShellCommand {
    Write(Bytes),
    Resize(TerminalSize),
    Close,
}

/// Events produced by the shell owner task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellEvent {
    Data(Bytes),
    Exit(u32),
    Error(String),
    Closed,
}

/// Write half of a shell, cheap to clone.
#[derive(Debug, Clone)]
pub struct ShellWriter {
    commands: mpsc::Sender<ShellCommand>,
}

impl ShellWriter {
    pub async fn write(&self, data: impl Into<Bytes>) -> RemoteResult<()> {
        self.send(ShellCommand::Write(data.into())).await
    }

    pub async fn resize(&self, cols: u32, rows: u32) -> RemoteResult<()> {
        self.send(ShellCommand::Resize(TerminalSize { cols, rows }))
            .await
    }

    /// Ask the owner task to end the shell. Succeeds if it is already gone.
    pub async fn close(&self) {
        let _ = self.commands.send(ShellCommand::Close).await;
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    async fn send(&self, command: ShellCommand) -> RemoteResult<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| RemoteError::Closed)
    }
}

/// Live interactive shell: a writer plus the stream of output events.
#[derive(Debug)]
pub struct ShellHandle {
    writer: ShellWriter,
    events: mpsc::Receiver<ShellEvent>,
}

impl ShellHandle {
    pub fn new(commands: mpsc::Sender<ShellCommand>, events: mpsc::Receiver<ShellEvent>) -> Self {
        Self {
            writer: ShellWriter { commands },
            events,
        }
    }

    /// Create the channel pairs for a shell owner task.
    /// Returns the handle plus the ends the owner task keeps.
    pub fn channel() -> (Self, mpsc::Receiver<ShellCommand>, mpsc::Sender<ShellEvent>) {
        let (command_tx, command_rx) = mpsc::channel(SHELL_CHANNEL_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel(SHELL_CHANNEL_CAPACITY);
        (Self::new(command_tx, event_rx), command_rx, event_tx)
    }

    pub fn writer(&self) -> ShellWriter {
        self.writer.clone()
    }

    pub fn into_parts(self) -> (ShellWriter, mpsc::Receiver<ShellEvent>) {
        (self.writer, self.events)
    }
}
