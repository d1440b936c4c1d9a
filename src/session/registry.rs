//! Session registry: the one map shared by every request path.
//!
//! Entries live in a `DashMap`; no shard guard is ever held across an await
//! point, so network I/O in `connect`/`disconnect` never blocks readers.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::types::{
    ConnectionConfig, ConnectionRequest, Session, SessionError, SessionState,
};
use crate::common::config::SessionSettings;
use crate::remote::{Connector, RemoteConnection};
use crate::utils::sanitize::redact;

struct SessionEntry {
    session: Session,
    adapter: Option<Arc<dyn RemoteConnection>>,
}

pub struct SessionRegistry {
    sessions: DashMap<String, SessionEntry>,
    connector: Arc<dyn Connector>,
    idle_timeout: Duration,
    connect_timeout: Duration,
}

impl SessionRegistry {
    pub fn new(connector: Arc<dyn Connector>, settings: &SessionSettings) -> Self {
        Self {
            sessions: DashMap::new(),
            connector,
            idle_timeout: settings.idle_timeout(),
            connect_timeout: settings.connect_timeout(),
        }
    }

    /// Register a session in `created` state. No network I/O happens here.
    pub fn create_session(&self, request: ConnectionRequest) -> Result<Session, SessionError> {
        let config = ConnectionConfig::from_request(request)?;
        let session = Session::new(config);

        tracing::info!(
            session_id = %session.id,
            host = %session.config.hostname,
            port = session.config.port,
            user = %session.config.username,
            "session created"
        );

        self.sessions.insert(
            session.id.clone(),
            SessionEntry {
                session: session.clone(),
                adapter: None,
            },
        );
        Ok(session)
    }

    /// Perform the handshake and authentication for a session. A session
    /// that has reached `disconnected` never connects again.
    pub async fn connect(&self, session_id: &str) -> Result<(), SessionError> {
        let config = {
            let mut entry = self
                .sessions
                .get_mut(session_id)
                .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;

            match entry.session.state {
                SessionState::Connected => return Ok(()),
                SessionState::Connecting => {
                    return Err(SessionError::Connection {
                        reason: "connection already in progress".to_string(),
                    })
                }
                SessionState::Disconnected => {
                    return Err(SessionError::Terminated(session_id.to_string()))
                }
                SessionState::Created => {}
            }
            entry.session.state = SessionState::Connecting;
            entry.session.touch(Utc::now());
            entry.session.config.clone()
        };

        tracing::debug!(session_id, address = %config.address(), "connecting");

        let adapter =
            match tokio::time::timeout(self.connect_timeout, self.connector.connect(&config)).await
            {
                Ok(Ok(adapter)) => adapter,
                Ok(Err(err)) => {
                    let reason = err.to_string();
                    tracing::warn!(session_id, error = %redact(&reason), "connect failed");
                    self.set_state(session_id, SessionState::Disconnected);
                    return Err(SessionError::Connection { reason });
                }
                Err(_) => {
                    let reason = format!(
                        "connection to {} timed out after {}s",
                        config.address(),
                        self.connect_timeout.as_secs()
                    );
                    tracing::warn!(session_id, "{reason}");
                    self.set_state(session_id, SessionState::Disconnected);
                    return Err(SessionError::Connection { reason });
                }
            };

        let attached = match self.sessions.get_mut(session_id) {
            Some(mut entry) => {
                entry.adapter = Some(adapter.clone());
                entry.session.state = SessionState::Connected;
                entry.session.touch(Utc::now());
                true
            }
            None => false,
        };

        if !attached {
            // Disconnected while the handshake was in flight
            tracing::debug!(session_id, "session removed during connect, closing adapter");
            if let Err(err) = adapter.dispose().await {
                tracing::warn!(session_id, error = %err, "dispose after removal failed");
            }
            return Err(SessionError::NotFound(session_id.to_string()));
        }

        tracing::info!(session_id, address = %config.address(), "session connected");
        Ok(())
    }

    /// Remove a session and close its adapter. Idempotent, never fails.
    pub async fn disconnect(&self, session_id: &str) {
        let Some((_, entry)) = self.sessions.remove(session_id) else {
            tracing::debug!(session_id, "disconnect for unknown session ignored");
            return;
        };

        if let Some(adapter) = entry.adapter {
            if let Err(err) = adapter.dispose().await {
                tracing::warn!(session_id, error = %err, "error closing remote connection");
            }
        }
        tracing::info!(session_id, "session disconnected");
    }

    /// The remote side went away: detach the adapter but keep the entry so
    /// the client can still see it until it disconnects or is swept.
    pub async fn mark_remote_closed(&self, session_id: &str) {
        let adapter = self.sessions.get_mut(session_id).and_then(|mut entry| {
            entry.session.state = SessionState::Disconnected;
            entry.session.touch(Utc::now());
            entry.adapter.take()
        });

        if let Some(adapter) = adapter {
            if let Err(err) = adapter.dispose().await {
                tracing::warn!(session_id, error = %err, "error closing remote connection");
            }
            tracing::info!(session_id, "remote closed the connection");
        }
    }

    pub fn get_session(&self, session_id: &str) -> Option<Session> {
        self.sessions
            .get(session_id)
            .map(|entry| entry.session.clone())
    }

    /// All sessions, oldest first.
    pub fn get_all_sessions(&self) -> Vec<Session> {
        let mut sessions: Vec<Session> = self
            .sessions
            .iter()
            .map(|entry| entry.session.clone())
            .collect();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        sessions
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Stamp activity on a session. Returns false for unknown ids.
    pub fn update_last_activity(&self, session_id: &str) -> bool {
        match self.sessions.get_mut(session_id) {
            Some(mut entry) => {
                entry.session.touch(Utc::now());
                true
            }
            None => false,
        }
    }

    /// Resolve the live adapter of a connected session and record the touch.
    pub fn adapter(&self, session_id: &str) -> Result<Arc<dyn RemoteConnection>, SessionError> {
        let mut entry = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;

        let adapter = match (&entry.session.state, &entry.adapter) {
            (SessionState::Connected, Some(adapter)) => adapter.clone(),
            _ => return Err(SessionError::NotConnected(session_id.to_string())),
        };
        entry.session.touch(Utc::now());
        Ok(adapter)
    }

    /// Sweep sessions that are not connected and have been idle past the
    /// threshold. Returns how many were removed.
    pub async fn cleanup(&self) -> usize {
        self.cleanup_at(Utc::now()).await
    }

    async fn cleanup_at(&self, now: DateTime<Utc>) -> usize {
        let idle = chrono::Duration::from_std(self.idle_timeout)
            .unwrap_or_else(|_| chrono::Duration::days(365));
        let is_stale = |entry: &SessionEntry| {
            !entry.session.connected() && now - entry.session.last_activity > idle
        };

        let candidates: Vec<String> = self
            .sessions
            .iter()
            .filter(|entry| is_stale(entry.value()))
            .map(|entry| entry.key().clone())
            .collect();

        let mut removed = 0;
        for id in candidates {
            // Re-check under the shard lock; the session may have reconnected
            if let Some((_, entry)) = self.sessions.remove_if(&id, |_, entry| is_stale(entry)) {
                if let Some(adapter) = entry.adapter {
                    if let Err(err) = adapter.dispose().await {
                        tracing::warn!(session_id = %id, error = %err, "error closing idle connection");
                    }
                }
                tracing::info!(session_id = %id, "idle session removed");
                removed += 1;
            }
        }

        if removed > 0 {
            tracing::debug!(removed, remaining = self.sessions.len(), "session cleanup pass");
        }
        removed
    }

    /// Run `cleanup` every `interval` until `cancel` fires.
    pub fn spawn_cleanup_task(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        registry.cleanup().await;
                    }
                }
            }
            tracing::debug!("session cleanup task stopped");
        })
    }

    /// Disconnect every session, used on process shutdown.
    pub async fn shutdown(&self) {
        let ids: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        let count = ids.len();
        futures::future::join_all(ids.iter().map(|id| self.disconnect(id))).await;
        if count > 0 {
            tracing::info!(count, "all sessions disconnected");
        }
    }

    fn set_state(&self, session_id: &str, state: SessionState) {
        if let Some(mut entry) = self.sessions.get_mut(session_id) {
            entry.session.state = state;
            entry.session.touch(Utc::now());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::mock::MockConnector;

    fn registry_with(connector: MockConnector) -> SessionRegistry {
        SessionRegistry::new(Arc::new(connector), &SessionSettings::default())
    }

    fn request() -> ConnectionRequest {
        ConnectionRequest {
            hostname: "h".into(),
            username: "u".into(),
            password: Some("p".into()),
            ..Default::default()
        }
    }

    fn backdate(registry: &SessionRegistry, id: &str, age: chrono::Duration) {
        let mut entry = registry.sessions.get_mut(id).unwrap();
        entry.session.last_activity = Utc::now() - age;
        entry.session.created_at = entry.session.last_activity;
    }

    #[tokio::test]
    async fn create_does_not_connect() {
        let connector = MockConnector::new();
        let registry = registry_with(connector.clone());

        let session = registry.create_session(request()).unwrap();
        assert_eq!(session.state, SessionState::Created);
        assert!(!session.connected());
        assert_eq!(connector.connect_count(), 0);
    }

    #[tokio::test]
    async fn connect_marks_session_connected() {
        let registry = registry_with(MockConnector::new());
        let session = registry.create_session(request()).unwrap();

        registry.connect(&session.id).await.unwrap();

        let stored = registry.get_session(&session.id).unwrap();
        assert!(stored.connected());
        assert!(stored.last_activity >= stored.created_at);
        assert!(registry.adapter(&session.id).is_ok());
    }

    #[tokio::test]
    async fn connect_failure_surfaces_transport_message() {
        let registry =
            registry_with(MockConnector::new().fail_connect("Connection refused (os error 111)"));
        let session = registry.create_session(request()).unwrap();

        let err = registry.connect(&session.id).await.unwrap_err();
        match err {
            SessionError::Connection { reason } => {
                assert_eq!(reason, "Connection refused (os error 111)")
            }
            other => panic!("unexpected error: {other:?}"),
        }
        let stored = registry.get_session(&session.id).unwrap();
        assert_eq!(stored.state, SessionState::Disconnected);
    }

    #[tokio::test]
    async fn connect_unknown_session_is_not_found() {
        let registry = registry_with(MockConnector::new());
        assert!(matches!(
            registry.connect("nope").await,
            Err(SessionError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn disconnect_is_idempotent_and_removes_entry() {
        let connector = MockConnector::new();
        let registry = registry_with(connector.clone());
        let session = registry.create_session(request()).unwrap();
        registry.connect(&session.id).await.unwrap();

        registry.disconnect(&session.id).await;
        registry.disconnect(&session.id).await;

        assert!(registry.get_session(&session.id).is_none());
        assert_eq!(connector.dispose_count(), 1);
    }

    #[tokio::test]
    async fn adapter_requires_connected_state() {
        let registry = registry_with(MockConnector::new());
        let session = registry.create_session(request()).unwrap();

        assert!(matches!(
            registry.adapter(&session.id),
            Err(SessionError::NotConnected(_))
        ));
        assert!(matches!(
            registry.adapter("missing"),
            Err(SessionError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn cleanup_removes_only_idle_disconnected_sessions() {
        let registry = registry_with(MockConnector::new());

        let idle = registry.create_session(request()).unwrap();
        let idle_connected = registry.create_session(request()).unwrap();
        let fresh = registry.create_session(request()).unwrap();
        registry.connect(&idle_connected.id).await.unwrap();

        backdate(&registry, &idle.id, chrono::Duration::hours(2));
        backdate(&registry, &idle_connected.id, chrono::Duration::hours(2));

        let removed = registry.cleanup().await;

        assert_eq!(removed, 1);
        assert!(registry.get_session(&idle.id).is_none());
        assert!(registry.get_session(&idle_connected.id).is_some());
        assert!(registry.get_session(&fresh.id).is_some());
    }

    #[tokio::test]
    async fn remote_close_detaches_adapter() {
        let connector = MockConnector::new();
        let registry = registry_with(connector.clone());
        let session = registry.create_session(request()).unwrap();
        registry.connect(&session.id).await.unwrap();

        registry.mark_remote_closed(&session.id).await;

        let stored = registry.get_session(&session.id).unwrap();
        assert_eq!(stored.state, SessionState::Disconnected);
        assert!(registry.adapter(&session.id).is_err());
        assert_eq!(connector.dispose_count(), 1);
    }

    #[tokio::test]
    async fn disconnected_session_cannot_reconnect() {
        let connector = MockConnector::new();
        let registry = registry_with(connector.clone());
        let session = registry.create_session(request()).unwrap();
        registry.connect(&session.id).await.unwrap();
        registry.mark_remote_closed(&session.id).await;

        let err = registry.connect(&session.id).await.unwrap_err();
        assert!(matches!(err, SessionError::Terminated(_)));
        assert_eq!(connector.connect_count(), 1);
        let stored = registry.get_session(&session.id).unwrap();
        assert_eq!(stored.state, SessionState::Disconnected);
    }

    #[tokio::test]
    async fn failed_connect_is_final() {
        let connector = MockConnector::new().fail_connect("Connection refused");
        let registry = registry_with(connector.clone());
        let session = registry.create_session(request()).unwrap();

        assert!(registry.connect(&session.id).await.is_err());
        assert!(matches!(
            registry.connect(&session.id).await,
            Err(SessionError::Terminated(_))
        ));
        assert_eq!(connector.connect_count(), 1);
    }

    #[tokio::test]
    async fn failed_dispose_still_closes_the_session() {
        let connector = MockConnector::new().fail_dispose("broken pipe");
        let registry = registry_with(connector.clone());
        let dropped = registry.create_session(request()).unwrap();
        let closed = registry.create_session(request()).unwrap();
        registry.connect(&dropped.id).await.unwrap();
        registry.connect(&closed.id).await.unwrap();

        registry.mark_remote_closed(&dropped.id).await;
        registry.disconnect(&closed.id).await;

        let stored = registry.get_session(&dropped.id).unwrap();
        assert_eq!(stored.state, SessionState::Disconnected);
        assert!(registry.adapter(&dropped.id).is_err());
        assert!(registry.get_session(&closed.id).is_none());
        assert_eq!(connector.dispose_count(), 2);
    }

    #[tokio::test]
    async fn update_last_activity_reports_unknown_sessions() {
        let registry = registry_with(MockConnector::new());
        let session = registry.create_session(request()).unwrap();
        assert!(registry.update_last_activity(&session.id));
        assert!(!registry.update_last_activity("missing"));
    }

    #[tokio::test]
    async fn shutdown_disconnects_everything() {
        let registry = registry_with(MockConnector::new());
        for _ in 0..3 {
            let session = registry.create_session(request()).unwrap();
            registry.connect(&session.id).await.unwrap();
        }
        registry.shutdown().await;
        assert!(registry.is_empty());
    }
}
