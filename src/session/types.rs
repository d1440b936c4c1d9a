use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

pub const DEFAULT_SSH_PORT: u16 = 22;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("{0}")]
    Validation(String),

    #[error("session not found: {0}")]
    NotFound(String),

    #[error("session not connected: {0}")]
    NotConnected(String),

    #[error("connection failed: {reason}")]
    Connection { reason: String },

    #[error("session {0} is disconnected; create a new session to reconnect")]
    Terminated(String),
}

/// Connection parameters as they arrive from a client.
///
/// `Debug` is written by hand so credential fields never reach logs.
#[derive(Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionRequest {
    #[serde(default)]
    pub hostname: String,
    pub port: Option<u16>,
    #[serde(default)]
    pub username: String,
    pub password: Option<String>,
    pub private_key: Option<String>,
    pub passphrase: Option<String>,
    pub name: Option<String>,
}

impl fmt::Debug for ConnectionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRequest")
            .field("hostname", &self.hostname)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("has_password", &self.password.is_some())
            .field("has_private_key", &self.private_key.is_some())
            .field("name", &self.name)
            .finish()
    }
}

/// How the session authenticates. Secret material stays wrapped.
#[derive(Debug)]
pub enum Credential {
    Password(SecretString),
    PrivateKey {
        key: SecretString,
        passphrase: Option<SecretString>,
    },
}

/// Validated, immutable connection parameters of one session.
#[derive(Debug)]
pub struct ConnectionConfig {
    pub id: String,
    pub hostname: String,
    pub port: u16,
    pub username: String,
    pub credential: Credential,
    pub name: String,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl ConnectionConfig {
    /// Validate a client request. A private key wins over a password when
    /// both are supplied.
    pub fn from_request(request: ConnectionRequest) -> Result<Self, SessionError> {
        let hostname = request.hostname.trim().to_string();
        let username = request.username.trim().to_string();

        if hostname.is_empty() {
            return Err(SessionError::Validation("hostname is required".to_string()));
        }
        if username.is_empty() {
            return Err(SessionError::Validation("username is required".to_string()));
        }
        if request.port == Some(0) {
            return Err(SessionError::Validation("port must be > 0".to_string()));
        }

        let credential = match (non_empty(request.private_key), non_empty(request.password)) {
            (Some(key), _) => Credential::PrivateKey {
                key: SecretString::from(key),
                passphrase: non_empty(request.passphrase).map(SecretString::from),
            },
            (None, Some(password)) => Credential::Password(SecretString::from(password)),
            (None, None) => {
                return Err(SessionError::Validation(
                    "either password or privateKey is required".to_string(),
                ))
            }
        };

        let port = request.port.unwrap_or(DEFAULT_SSH_PORT);
        let name = non_empty(request.name).unwrap_or_else(|| format!("{username}@{hostname}"));

        Ok(Self {
            id: Uuid::new_v4().to_string(),
            hostname,
            port,
            username,
            credential,
            name,
        })
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.hostname, self.port)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Created,
    Connecting,
    Connected,
    Disconnected,
}

/// Snapshot of one registry entry.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub config: Arc<ConnectionConfig>,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl Session {
    pub(crate) fn new(config: ConnectionConfig) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            config: Arc::new(config),
            state: SessionState::Created,
            created_at: now,
            last_activity: now,
        }
    }

    pub fn connected(&self) -> bool {
        self.state == SessionState::Connected
    }

    /// Advance `last_activity`, never moving it backwards.
    pub(crate) fn touch(&mut self, now: DateTime<Utc>) {
        if now > self.last_activity {
            self.last_activity = now;
        }
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id.clone(),
            name: self.config.name.clone(),
            hostname: self.config.hostname.clone(),
            port: self.config.port,
            username: self.config.username.clone(),
            connected: self.connected(),
            state: self.state,
            last_activity: self.last_activity,
            created_at: self.created_at,
        }
    }
}

/// Wire shape of a session in list/create responses.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: String,
    pub name: String,
    pub hostname: String,
    pub port: u16,
    pub username: String,
    pub connected: bool,
    pub state: SessionState,
    pub last_activity: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}
