use anyhow::Result;
use std::sync::Arc;

use crate::common::AppConfig;
use crate::files::LocalFileStore;
use crate::remote::Connector;
use crate::session::SessionRegistry;
use crate::sftp::SftpEngine;
use crate::transfer::{HttpBackend, SftpBackend, TransferBackend, TransferManager};

// Every handler shares the same service objects; cloning only bumps Arcs
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub sftp: Arc<SftpEngine>,
    pub transfers: Arc<TransferManager>,
    pub files: Arc<LocalFileStore>,
    pub config: Arc<AppConfig>,
}

impl AppState {
    /// Wire the services together. Must run inside a tokio runtime since the
    /// transfer manager starts its admission loop here.
    pub fn new(config: AppConfig, connector: Arc<dyn Connector>) -> Result<Self> {
        let registry = Arc::new(SessionRegistry::new(connector, &config.sessions));
        let sftp = Arc::new(SftpEngine::new(registry.clone()));

        let backend: Arc<dyn TransferBackend> = match &config.transfers.http_base_url {
            Some(base_url) => Arc::new(HttpBackend::new(
                base_url.clone(),
                config.transfers.chunk_size,
            )?),
            None => Arc::new(SftpBackend::new(
                registry.clone(),
                config.transfers.chunk_size,
            )),
        };
        let transfers = Arc::new(TransferManager::new(backend, config.transfers.clone()));
        let files = Arc::new(LocalFileStore::new(config.files.clone()));

        Ok(Self {
            registry,
            sftp,
            transfers,
            files,
            config: Arc::new(config),
        })
    }

    /// Stop background work and close every remote connection.
    pub async fn shutdown(&self) {
        self.transfers.shutdown();
        self.registry.shutdown().await;
    }
}
