//! Server key verification against an OpenSSH-format known_hosts file.
//!
//! Supported host fields: plain names, `[host]:port`, comma separated lists,
//! `*`/`?` wildcards and `!` negation. Hashed (`|1|`) and marker
//! (`@cert-authority`, `@revoked`) lines are skipped.

use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::common::config::HostKeyPolicy;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostKeyStatus {
    Known,
    /// The host is recorded with a different key on this (1-based) line
    Changed { line: usize },
    Unknown,
}

#[derive(Debug, Clone)]
struct Entry {
    hosts: String,
    key_type: String,
    key: String,
    line: usize,
}

/// Parsed contents of a known_hosts file.
#[derive(Debug, Clone, Default)]
pub struct KnownHosts {
    entries: Vec<Entry>,
}

impl KnownHosts {
    pub fn parse(content: &str) -> Self {
        let entries = content
            .lines()
            .enumerate()
            .filter_map(|(idx, line)| {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') || line.starts_with('@') {
                    return None;
                }
                let mut fields = line.split_whitespace();
                let (hosts, key_type, key) = (fields.next()?, fields.next()?, fields.next()?);
                if hosts.starts_with("|1|") {
                    return None;
                }
                Some(Entry {
                    hosts: hosts.to_string(),
                    key_type: key_type.to_string(),
                    key: key.to_string(),
                    line: idx + 1,
                })
            })
            .collect();
        Self { entries }
    }

    /// Missing file reads as empty.
    pub async fn load(path: &Path) -> std::io::Result<Self> {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => Ok(Self::parse(&content)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(err),
        }
    }

    /// `key` is the base64 body as it appears in the file.
    pub fn check(&self, host: &str, port: u16, key_type: &str, key: &str) -> HostKeyStatus {
        let name = host_field(host, port);
        let mut changed = None;
        for entry in self.entries.iter().filter(|e| hosts_match(&e.hosts, &name)) {
            if entry.key_type == key_type && entry.key == key {
                return HostKeyStatus::Known;
            }
            changed.get_or_insert(entry.line);
        }
        match changed {
            Some(line) => HostKeyStatus::Changed { line },
            None => HostKeyStatus::Unknown,
        }
    }
}

/// Host field the way OpenSSH writes it: bare for port 22.
fn host_field(host: &str, port: u16) -> String {
    if port == 22 {
        host.to_string()
    } else {
        format!("[{host}]:{port}")
    }
}

fn hosts_match(patterns: &str, name: &str) -> bool {
    let mut matched = false;
    for pattern in patterns.split(',') {
        if let Some(negated) = pattern.strip_prefix('!') {
            if wildcard_match(negated.as_bytes(), name.as_bytes()) {
                return false;
            }
        } else if wildcard_match(pattern.as_bytes(), name.as_bytes()) {
            matched = true;
        }
    }
    matched
}

fn wildcard_match(pattern: &[u8], text: &[u8]) -> bool {
    match (pattern.first(), text.first()) {
        (None, None) => true,
        (Some(b'*'), _) => {
            wildcard_match(&pattern[1..], text)
                || (!text.is_empty() && wildcard_match(pattern, &text[1..]))
        }
        (Some(b'?'), Some(_)) => wildcard_match(&pattern[1..], &text[1..]),
        (Some(p), Some(t)) if p.eq_ignore_ascii_case(t) => {
            wildcard_match(&pattern[1..], &text[1..])
        }
        _ => false,
    }
}

/// Applies the configured policy to server keys presented at handshake.
pub struct HostKeyVerifier {
    path: PathBuf,
    policy: HostKeyPolicy,
    // Serializes read-check-append so concurrent first connects record once
    lock: Mutex<()>,
}

impl HostKeyVerifier {
    pub fn new(path: PathBuf, policy: HostKeyPolicy) -> Self {
        Self {
            path,
            policy,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Ok when the key may be trusted; Err carries the reason for the client.
    pub async fn verify(&self, host: &str, port: u16, key_type: &str, key: &str) -> Result<(), String> {
        let _guard = self.lock.lock().await;
        let known = KnownHosts::load(&self.path)
            .await
            .map_err(|err| format!("cannot read {}: {err}", self.path.display()))?;

        match known.check(host, port, key_type, key) {
            HostKeyStatus::Known => Ok(()),
            HostKeyStatus::Changed { line } => {
                tracing::warn!(host, port, key_type, line, "server key does not match known_hosts");
                Err(format!(
                    "the {key_type} key offered by {} differs from the one recorded at {}:{line}",
                    host_field(host, port),
                    self.path.display()
                ))
            }
            HostKeyStatus::Unknown => match self.policy {
                HostKeyPolicy::Strict => Err(format!(
                    "{} is not listed in {}",
                    host_field(host, port),
                    self.path.display()
                )),
                HostKeyPolicy::AcceptNew => {
                    self.record(host, port, key_type, key)
                        .await
                        .map_err(|err| format!("cannot update {}: {err}", self.path.display()))?;
                    tracing::info!(host, port, key_type, "new host key recorded");
                    Ok(())
                }
            },
        }
    }

    async fn record(&self, host: &str, port: u16, key_type: &str, key: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        let line = format!("{} {key_type} {key}\n", host_field(host, port));
        file.write_all(line.as_bytes()).await?;
        file.flush().await
    }
}
