//! russh-backed connector.
//!
//! One `client::Handle` per session. The SFTP subsystem is opened lazily on
//! the first file call and reused afterwards; every interactive shell gets its
//! own channel driven by a dedicated owner task.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::DateTime;
use russh::client::{self, Handle};
use russh::{ChannelMsg, Disconnect};
use russh_keys::key::PublicKey;
use russh_keys::PublicKeyBase64;
use russh_sftp::client::error::Error as SftpError;
use russh_sftp::client::fs::Metadata;
use russh_sftp::client::SftpSession;
use russh_sftp::protocol::StatusCode;
use secrecy::ExposeSecret;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::OnceCell;

use super::known_hosts::HostKeyVerifier;
use super::{
    bounded_exec, kind_from_mode, Connector, ExecOutput, RemoteConnection, RemoteEntry, RemoteError,
    RemoteFileKind, RemoteMetadata, RemoteReader, RemoteResult, RemoteWriter, ShellCommand,
    ShellEvent, ShellHandle, TerminalSize,
};
use crate::common::config::SessionSettings;
use crate::session::{ConnectionConfig, Credential};

const TERM: &str = "xterm-256color";

/// Handshake failures: the transport's own, or a refused server key.
#[derive(Debug, thiserror::Error)]
enum HandshakeError {
    #[error(transparent)]
    Transport(#[from] russh::Error),
    #[error("{0}")]
    HostKey(String),
}

struct ClientHandler {
    host: String,
    port: u16,
    verifier: Arc<HostKeyVerifier>,
}

#[async_trait]
impl client::Handler for ClientHandler {
    type Error = HandshakeError;

    async fn check_server_key(&mut self, key: &PublicKey) -> Result<bool, Self::Error> {
        self.verifier
            .verify(&self.host, self.port, key.name(), &key.public_key_base64())
            .await
            .map_err(HandshakeError::HostKey)?;
        Ok(true)
    }
}

fn transport_error(err: russh::Error) -> RemoteError {
    match err {
        russh::Error::IO(io) => RemoteError::Io(io),
        russh::Error::Disconnect => RemoteError::Closed,
        russh::Error::ConnectionTimeout
        | russh::Error::KeepaliveTimeout
        | russh::Error::InactivityTimeout => RemoteError::Timeout("ssh transport".to_string()),
        other => RemoteError::Protocol(other.to_string()),
    }
}

fn sftp_error(err: SftpError, path: &str) -> RemoteError {
    match err {
        SftpError::Status(status) => match status.status_code {
            StatusCode::NoSuchFile => RemoteError::NotFound(path.to_string()),
            StatusCode::PermissionDenied => RemoteError::PermissionDenied(path.to_string()),
            StatusCode::NoConnection | StatusCode::ConnectionLost => RemoteError::Closed,
            _ => RemoteError::Protocol(format!("{path}: {}", status.error_message)),
        },
        SftpError::Timeout => RemoteError::Timeout(path.to_string()),
        other => RemoteError::Protocol(format!("{path}: {other}")),
    }
}

fn convert_metadata(attrs: &Metadata) -> RemoteMetadata {
    let kind = match attrs.permissions {
        Some(mode) => kind_from_mode(mode),
        None if attrs.is_dir() => RemoteFileKind::Directory,
        None => RemoteFileKind::File,
    };
    RemoteMetadata {
        kind,
        size: attrs.size.unwrap_or(0),
        modified: attrs
            .mtime
            .and_then(|secs| DateTime::from_timestamp(i64::from(secs), 0)),
        mode: attrs.permissions,
        owner: attrs
            .user
            .clone()
            .or_else(|| attrs.uid.map(|uid| uid.to_string())),
        group: attrs
            .group
            .clone()
            .or_else(|| attrs.gid.map(|gid| gid.to_string())),
    }
}

/// Opens SSH connections with russh.
pub struct RusshConnector {
    config: Arc<client::Config>,
    exec_timeout: Duration,
    verifier: Arc<HostKeyVerifier>,
}

impl RusshConnector {
    pub fn new(settings: &SessionSettings) -> Self {
        let keepalive = Duration::from_secs(settings.keepalive_secs);
        let config = client::Config {
            keepalive_interval: (!keepalive.is_zero()).then_some(keepalive),
            ..Default::default()
        };
        let verifier = HostKeyVerifier::new(settings.known_hosts_file(), settings.host_key_policy);
        tracing::debug!(
            known_hosts = %verifier.path().display(),
            policy = ?settings.host_key_policy,
            "host key verification configured"
        );
        Self {
            config: Arc::new(config),
            exec_timeout: settings.exec_timeout(),
            verifier: Arc::new(verifier),
        }
    }
}

#[async_trait]
impl Connector for RusshConnector {
    async fn connect(&self, config: &ConnectionConfig) -> RemoteResult<Arc<dyn RemoteConnection>> {
        let mut handle = client::connect(
            self.config.clone(),
            (config.hostname.as_str(), config.port),
            ClientHandler {
                host: config.hostname.clone(),
                port: config.port,
                verifier: self.verifier.clone(),
            },
        )
        .await
        .map_err(|err| match err {
            HandshakeError::HostKey(reason) => RemoteError::HostKey(reason),
            HandshakeError::Transport(err) => RemoteError::Connect(err.to_string()),
        })?;

        let authenticated = match &config.credential {
            Credential::Password(password) => handle
                .authenticate_password(&config.username, password.expose_secret())
                .await
                .map_err(|err| RemoteError::Auth(err.to_string()))?,
            Credential::PrivateKey { key, passphrase } => {
                let key_pair = russh_keys::decode_secret_key(
                    key.expose_secret(),
                    passphrase.as_ref().map(|p| p.expose_secret()),
                )
                .map_err(|err| RemoteError::Auth(format!("invalid private key: {err}")))?;
                handle
                    .authenticate_publickey(&config.username, Arc::new(key_pair))
                    .await
                    .map_err(|err| RemoteError::Auth(err.to_string()))?
            }
        };

        if !authenticated {
            let _ = handle
                .disconnect(Disconnect::ByApplication, "", "English")
                .await;
            return Err(RemoteError::Auth(format!(
                "authentication failed for {}@{}",
                config.username, config.hostname
            )));
        }

        tracing::debug!(address = %config.address(), user = %config.username, "ssh authenticated");

        Ok(Arc::new(RusshConnection {
            handle,
            sftp: OnceCell::new(),
            disposed: AtomicBool::new(false),
            exec_timeout: self.exec_timeout,
        }))
    }
}

/// Live russh connection.
pub struct RusshConnection {
    handle: Handle<ClientHandler>,
    sftp: OnceCell<SftpSession>,
    disposed: AtomicBool,
    exec_timeout: Duration,
}

impl RusshConnection {
    fn ensure_live(&self) -> RemoteResult<()> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(RemoteError::Disposed);
        }
        if self.handle.is_closed() {
            return Err(RemoteError::Closed);
        }
        Ok(())
    }

    async fn sftp(&self) -> RemoteResult<&SftpSession> {
        self.ensure_live()?;
        self.sftp
            .get_or_try_init(|| async {
                let channel = self
                    .handle
                    .channel_open_session()
                    .await
                    .map_err(transport_error)?;
                channel
                    .request_subsystem(true, "sftp")
                    .await
                    .map_err(transport_error)?;
                SftpSession::new(channel.into_stream())
                    .await
                    .map_err(|err| sftp_error(err, "sftp subsystem"))
            })
            .await
    }

    async fn run_exec(&self, command: &str) -> RemoteResult<ExecOutput> {
        let mut channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(transport_error)?;
        channel.exec(true, command).await.map_err(transport_error)?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut exit_code = None;

        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { data } => stdout.extend_from_slice(&data),
                ChannelMsg::ExtendedData { data, ext: 1 } => stderr.extend_from_slice(&data),
                ChannelMsg::ExitStatus { exit_status } => exit_code = Some(exit_status),
                ChannelMsg::Close => break,
                _ => {}
            }
        }

        Ok(ExecOutput {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            exit_code,
        })
    }
}

#[async_trait]
impl RemoteConnection for RusshConnection {
    async fn request_shell(&self, size: TerminalSize) -> RemoteResult<ShellHandle> {
        self.ensure_live()?;
        let mut channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(transport_error)?;
        channel
            .request_pty(false, TERM, size.cols, size.rows, 0, 0, &[])
            .await
            .map_err(transport_error)?;
        channel
            .request_shell(false)
            .await
            .map_err(transport_error)?;

        let (handle, mut commands, events) = ShellHandle::channel();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    command = commands.recv() => match command {
                        Some(ShellCommand::Write(bytes)) => {
                            if let Err(err) = channel.data(&bytes[..]).await {
                                let _ = events.send(ShellEvent::Error(err.to_string())).await;
                                break;
                            }
                        }
                        Some(ShellCommand::Resize(size)) => {
                            if let Err(err) = channel.window_change(size.cols, size.rows, 0, 0).await {
                                tracing::debug!(error = %err, "window change rejected");
                            }
                        }
                        Some(ShellCommand::Close) | None => {
                            let _ = channel.eof().await;
                            let _ = channel.close().await;
                            break;
                        }
                    },
                    msg = channel.wait() => match msg {
                        Some(ChannelMsg::Data { data }) | Some(ChannelMsg::ExtendedData { data, .. }) => {
                            let chunk = Bytes::copy_from_slice(&data);
                            if events.send(ShellEvent::Data(chunk)).await.is_err() {
                                let _ = channel.close().await;
                                break;
                            }
                        }
                        Some(ChannelMsg::ExitStatus { exit_status }) => {
                            let _ = events.send(ShellEvent::Exit(exit_status)).await;
                        }
                        Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None => break,
                        Some(_) => {}
                    },
                }
            }
            let _ = events.send(ShellEvent::Closed).await;
            tracing::debug!("shell channel closed");
        });

        Ok(handle)
    }

    async fn exec(&self, command: &str) -> RemoteResult<ExecOutput> {
        self.ensure_live()?;
        bounded_exec(self.exec_timeout, self.run_exec(command)).await
    }

    async fn list(&self, path: &str) -> RemoteResult<Vec<RemoteEntry>> {
        let sftp = self.sftp().await?;
        let entries = sftp.read_dir(path).await.map_err(|e| sftp_error(e, path))?;
        Ok(entries
            .filter(|entry| {
                let name = entry.file_name();
                name != "." && name != ".."
            })
            .map(|entry| RemoteEntry {
                name: entry.file_name(),
                metadata: convert_metadata(&entry.metadata()),
            })
            .collect())
    }

    async fn stat(&self, path: &str) -> RemoteResult<RemoteMetadata> {
        let sftp = self.sftp().await?;
        let attrs = sftp.metadata(path).await.map_err(|e| sftp_error(e, path))?;
        Ok(convert_metadata(&attrs))
    }

    async fn exists(&self, path: &str) -> RemoteResult<bool> {
        let sftp = self.sftp().await?;
        sftp.try_exists(path).await.map_err(|e| sftp_error(e, path))
    }

    async fn read(&self, path: &str) -> RemoteResult<Vec<u8>> {
        let sftp = self.sftp().await?;
        sftp.read(path).await.map_err(|e| sftp_error(e, path))
    }

    async fn write(&self, path: &str, data: &[u8]) -> RemoteResult<()> {
        let sftp = self.sftp().await?;
        let mut file = sftp.create(path).await.map_err(|e| sftp_error(e, path))?;
        file.write_all(data).await?;
        file.shutdown().await?;
        Ok(())
    }

    async fn open_read(&self, path: &str) -> RemoteResult<RemoteReader> {
        let sftp = self.sftp().await?;
        let file = sftp.open(path).await.map_err(|e| sftp_error(e, path))?;
        Ok(Box::new(file))
    }

    async fn open_write(&self, path: &str) -> RemoteResult<RemoteWriter> {
        let sftp = self.sftp().await?;
        let file = sftp.create(path).await.map_err(|e| sftp_error(e, path))?;
        Ok(Box::new(file))
    }

    async fn mkdir(&self, path: &str) -> RemoteResult<()> {
        let sftp = self.sftp().await?;
        sftp.create_dir(path).await.map_err(|e| sftp_error(e, path))
    }

    async fn rmdir(&self, path: &str) -> RemoteResult<()> {
        let sftp = self.sftp().await?;
        sftp.remove_dir(path).await.map_err(|e| sftp_error(e, path))
    }

    async fn remove(&self, path: &str) -> RemoteResult<()> {
        let sftp = self.sftp().await?;
        sftp.remove_file(path).await.map_err(|e| sftp_error(e, path))
    }

    async fn rename(&self, from: &str, to: &str) -> RemoteResult<()> {
        let sftp = self.sftp().await?;
        sftp.rename(from, to).await.map_err(|e| sftp_error(e, from))
    }

    async fn dispose(&self) -> RemoteResult<()> {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(sftp) = self.sftp.get() {
            let _ = sftp.close().await;
        }
        if !self.handle.is_closed() {
            if let Err(err) = self
                .handle
                .disconnect(Disconnect::ByApplication, "", "English")
                .await
            {
                tracing::debug!(error = %err, "ssh disconnect on closed transport");
            }
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst) || self.handle.is_closed()
    }
}
