//! Configuration schema, defaults, and layered loading.
//!
//! Precedence: defaults < config file < environment < CLI
use anyhow::{ensure, Context, Result};
use directories::ProjectDirs;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const MAX_CHUNK_SIZE_BYTES: usize = 4 * 1024 * 1024;
const MAX_CONCURRENT_TRANSFERS: usize = 64;
const ENV_PREFIX: &str = "SHELLBRIDGE_";

pub fn config_path() -> PathBuf {
    ProjectDirs::from("", "", "shellbridge")
        .map(|p| p.config_dir().join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("shellbridge.toml"))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
        }
    }
}

/// What to do with a server key that is not in the known_hosts file.
/// A key that differs from a recorded one is always rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostKeyPolicy {
    /// Unknown hosts are refused
    Strict,
    /// Unknown hosts are trusted and recorded
    AcceptNew,
}

/// Session lifetime and remote call bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Disconnected sessions idle longer than this are swept
    pub idle_timeout_secs: u64,
    pub cleanup_interval_secs: u64,
    pub connect_timeout_secs: u64,
    pub exec_timeout_secs: u64,
    pub keepalive_secs: u64,
    pub host_key_policy: HostKeyPolicy,
    /// OpenSSH-format known_hosts file; defaults to the data directory
    #[serde(skip_serializing_if = "Option::is_none")]
    pub known_hosts_path: Option<PathBuf>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 60 * 60,
            cleanup_interval_secs: 5 * 60,
            connect_timeout_secs: 20,
            exec_timeout_secs: 30,
            keepalive_secs: 30,
            host_key_policy: HostKeyPolicy::AcceptNew,
            known_hosts_path: None,
        }
    }
}

impl SessionSettings {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn exec_timeout(&self) -> Duration {
        Duration::from_secs(self.exec_timeout_secs)
    }

    pub fn known_hosts_file(&self) -> PathBuf {
        self.known_hosts_path.clone().unwrap_or_else(|| {
            ProjectDirs::from("", "", "shellbridge")
                .map(|p| p.data_dir().join("known_hosts"))
                .unwrap_or_else(|| PathBuf::from("shellbridge_known_hosts"))
        })
    }
}

/// Backoff applied when a caller asks to retry a failed transfer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 10_000,
        }
    }
}

impl RetrySettings {
    /// Delay before attempt number `attempt` (1-based), doubling each time.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let delay = self
            .initial_backoff_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_backoff_ms);
        Duration::from_millis(delay)
    }
}

/// Transfer queue tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferSettings {
    pub max_concurrent_transfers: usize,
    /// Chunk size in bytes
    pub chunk_size: usize,
    pub download_dir: PathBuf,
    pub retry: RetrySettings,
    /// Base URL of the plain HTTP file endpoint, when that backend is used
    pub http_base_url: Option<String>,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            max_concurrent_transfers: 3,
            chunk_size: 64 * 1024,
            download_dir: std::env::temp_dir().join("shellbridge-downloads"),
            retry: RetrySettings::default(),
            http_base_url: None,
        }
    }
}

/// Limits for the plain HTTP file endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FileStoreSettings {
    pub root: PathBuf,
    pub max_upload_bytes: u64,
    pub allowed_mime_prefixes: Vec<String>,
}

impl Default for FileStoreSettings {
    fn default() -> Self {
        Self {
            root: std::env::temp_dir().join("shellbridge-files"),
            max_upload_bytes: 100 * 1024 * 1024,
            allowed_mime_prefixes: [
                "text/",
                "image/",
                "application/pdf",
                "application/json",
                "application/zip",
                "application/x-tar",
                "application/gzip",
                "application/octet-stream",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

/// Output batching for constrained terminal clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminalSettings {
    pub batch_interval_ms: u64,
    pub low_bandwidth_interval_ms: u64,
    pub batch_threshold_bytes: usize,
    pub default_cols: u32,
    pub default_rows: u32,
}

impl Default for TerminalSettings {
    fn default() -> Self {
        Self {
            batch_interval_ms: 16,
            low_bandwidth_interval_ms: 50,
            batch_threshold_bytes: 1024,
            default_cols: 80,
            default_rows: 24,
        }
    }
}

/// Fully resolved application configuration after all layers merge.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerSettings,
    pub sessions: SessionSettings,
    pub transfers: TransferSettings,
    pub files: FileStoreSettings,
    pub terminal: TerminalSettings,
}

impl AppConfig {
    /// Rejects values that would stall or overload the process.
    pub fn validate(&self) -> Result<()> {
        let transfers = &self.transfers;
        ensure!(
            transfers.max_concurrent_transfers >= 1,
            "Invalid config: transfers.max_concurrent_transfers must be >= 1"
        );
        ensure!(
            transfers.max_concurrent_transfers <= MAX_CONCURRENT_TRANSFERS,
            "Invalid config: transfers.max_concurrent_transfers must be <= {MAX_CONCURRENT_TRANSFERS}"
        );
        ensure!(
            transfers.chunk_size > 0,
            "Invalid config: transfers.chunk_size must be > 0"
        );
        ensure!(
            transfers.chunk_size <= MAX_CHUNK_SIZE_BYTES,
            "Invalid config: transfers.chunk_size must be <= {MAX_CHUNK_SIZE_BYTES}"
        );
        ensure!(
            transfers.retry.max_attempts >= 1,
            "Invalid config: transfers.retry.max_attempts must be >= 1"
        );
        ensure!(
            self.sessions.connect_timeout_secs > 0,
            "Invalid config: sessions.connect_timeout_secs must be > 0"
        );
        ensure!(
            self.sessions.cleanup_interval_secs > 0,
            "Invalid config: sessions.cleanup_interval_secs must be > 0"
        );
        ensure!(
            self.files.max_upload_bytes > 0,
            "Invalid config: files.max_upload_bytes must be > 0"
        );
        ensure!(
            self.terminal.batch_threshold_bytes > 0,
            "Invalid config: terminal.batch_threshold_bytes must be > 0"
        );
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConfigOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

/// Loads config from defaults/file/env.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(config_path);

    let config: AppConfig = Figment::new()
        .merge(Serialized::defaults(AppConfig::default()))
        .merge(Toml::file(&path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .extract()
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;

    config.validate()?;

    Ok(config)
}

/// Applies runtime overrides to a loaded config.
pub fn apply_overrides(mut config: AppConfig, overrides: &ConfigOverrides) -> AppConfig {
    if let Some(host) = &overrides.host {
        config.server.host = host.clone();
    }
    if let Some(port) = overrides.port {
        config.server.port = port;
    }

    config
}
