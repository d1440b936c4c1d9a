#![allow(dead_code)]

pub mod config_test_utils;
pub mod http;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use shellbridge::common::AppConfig;
use shellbridge::remote::mock::MockConnector;
use shellbridge::server::{create_router, AppState};
use shellbridge::transfer::TransferRecord;
use tempfile::TempDir;

pub const MAX_UPLOAD_BYTES: u64 = 64;

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub connector: MockConnector,
    // Keeps the file store and download directories alive
    pub temp_dir: TempDir,
}

pub fn setup_temp_dir() -> TempDir {
    TempDir::new().expect("Failed to create temp directory")
}

/// Config rooted in `temp_dir` with a small upload ceiling.
pub fn test_config(temp_dir: &TempDir) -> AppConfig {
    let mut config = AppConfig::default();
    config.server.port = 0;
    config.files.root = temp_dir.path().join("files");
    config.files.max_upload_bytes = MAX_UPLOAD_BYTES;
    config.transfers.download_dir = temp_dir.path().join("downloads");
    config.transfers.retry.initial_backoff_ms = 10;
    config
}

pub fn create_test_app() -> TestApp {
    create_test_app_with(default_connector(), |_| {})
}

/// A remote filesystem with a few entries to list and move around.
pub fn default_connector() -> MockConnector {
    MockConnector::new()
        .with_dir("/home/u")
        .with_dir("/home/u/docs")
        .with_file("/home/u/notes.txt", b"remember the milk".to_vec())
        .with_file("/home/u/.bashrc", b"export PS1='$ '".to_vec())
}

pub fn create_test_app_with(connector: MockConnector, tweak: impl FnOnce(&mut AppConfig)) -> TestApp {
    let temp_dir = setup_temp_dir();
    let mut config = test_config(&temp_dir);
    tweak(&mut config);

    let state =
        AppState::new(config, Arc::new(connector.clone())).expect("Failed to build app state");
    let router = create_router(state.clone());
    TestApp {
        router,
        state,
        connector,
        temp_dir,
    }
}

/// Poll the transfer queue until `id` reaches a terminal status.
pub async fn wait_for_terminal(state: &AppState, id: &str) -> TransferRecord {
    for _ in 0..200 {
        if let Some(record) = state.transfers.get_transfer(id) {
            if record.status.is_terminal() {
                return record;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("transfer {id} did not finish in time");
}
