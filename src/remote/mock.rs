//! In-memory connector for tests and local demos.
//!
//! Holds a tiny POSIX-ish filesystem shared by every connection the connector
//! hands out, an echoing shell, and knobs for injecting connect failures,
//! slow I/O and mid-transfer timeouts.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{ready, Context, Poll};
use std::time::Duration;
use tokio::io::AsyncWrite;
use tokio_util::io::StreamReader;

use super::{
    bounded_exec, Connector, ExecOutput, RemoteConnection, RemoteEntry, RemoteError, RemoteFileKind,
    RemoteMetadata, RemoteReader, RemoteResult, RemoteWriter, ShellCommand, ShellEvent,
    ShellHandle, TerminalSize,
};
use crate::common::config::SessionSettings;
use crate::session::ConnectionConfig;
use crate::utils::security::{remote_file_name, remote_parent};

const READ_CHUNK: usize = 4096;

#[derive(Debug, Clone)]
enum MockNode {
    Dir,
    File(Vec<u8>),
}

#[derive(Debug)]
struct MockFs {
    nodes: BTreeMap<String, MockNode>,
}

fn normalize(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

impl MockFs {
    fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert("/".to_string(), MockNode::Dir);
        Self { nodes }
    }

    fn metadata(node: &MockNode) -> RemoteMetadata {
        let (kind, size, mode) = match node {
            MockNode::Dir => (RemoteFileKind::Directory, 4096, 0o040755),
            MockNode::File(data) => (RemoteFileKind::File, data.len() as u64, 0o100644),
        };
        RemoteMetadata {
            kind,
            size,
            modified: Some(Utc::now()),
            mode: Some(mode),
            owner: Some("mock".to_string()),
            group: Some("mock".to_string()),
        }
    }

    fn require_parent_dir(&self, path: &str) -> RemoteResult<()> {
        let parent = remote_parent(path).unwrap_or_else(|| "/".to_string());
        match self.nodes.get(&parent) {
            Some(MockNode::Dir) => Ok(()),
            Some(MockNode::File(_)) => Err(RemoteError::NotADirectory(parent)),
            None => Err(RemoteError::NotFound(parent)),
        }
    }

    fn mkdir_all(&mut self, path: &str) {
        let path = normalize(path);
        let mut current = String::new();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            current.push('/');
            current.push_str(segment);
            self.nodes.entry(current.clone()).or_insert(MockNode::Dir);
        }
    }

    fn children(&self, dir: &str) -> Vec<(String, MockNode)> {
        let prefix = if dir == "/" {
            "/".to_string()
        } else {
            format!("{dir}/")
        };
        self.nodes
            .range(prefix.clone()..)
            .take_while(|(path, _)| path.starts_with(&prefix))
            .filter(|(path, _)| {
                let rest = &path[prefix.len()..];
                !rest.is_empty() && !rest.contains('/')
            })
            .map(|(path, node)| (path.clone(), node.clone()))
            .collect()
    }
}

struct MockState {
    fs: Mutex<MockFs>,
    connects: AtomicUsize,
    disposes: AtomicUsize,
    fail_connect: Mutex<Option<String>>,
    fail_dispose: Mutex<Option<String>>,
    io_delay: Mutex<Option<Duration>>,
    fail_after: Mutex<Option<u64>>,
    exec: Mutex<HashMap<String, ExecOutput>>,
    exec_timeout: Mutex<Duration>,
    last_resize: Mutex<Option<TerminalSize>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Connector backed by an in-memory filesystem.
#[derive(Clone)]
pub struct MockConnector {
    state: Arc<MockState>,
}

impl Default for MockConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl MockConnector {
    pub fn new() -> Self {
        Self {
            state: Arc::new(MockState {
                fs: Mutex::new(MockFs::new()),
                connects: AtomicUsize::new(0),
                disposes: AtomicUsize::new(0),
                fail_connect: Mutex::new(None),
                fail_dispose: Mutex::new(None),
                io_delay: Mutex::new(None),
                fail_after: Mutex::new(None),
                exec: Mutex::new(HashMap::new()),
                exec_timeout: Mutex::new(SessionSettings::default().exec_timeout()),
                last_resize: Mutex::new(None),
            }),
        }
    }

    /// Every connect attempt fails with this transport message.
    pub fn fail_connect(self, message: &str) -> Self {
        *lock(&self.state.fail_connect) = Some(message.to_string());
        self
    }

    /// Closing a connection still takes effect but reports this error.
    pub fn fail_dispose(self, message: &str) -> Self {
        *lock(&self.state.fail_dispose) = Some(message.to_string());
        self
    }

    /// Sleep this long before each streamed chunk.
    pub fn with_io_delay(self, delay: Duration) -> Self {
        *lock(&self.state.io_delay) = Some(delay);
        self
    }

    /// Streamed reads and writes time out after this many bytes.
    pub fn fail_transfers_after(self, bytes: u64) -> Self {
        *lock(&self.state.fail_after) = Some(bytes);
        self
    }

    pub fn with_dir(self, path: &str) -> Self {
        lock(&self.state.fs).mkdir_all(path);
        self
    }

    pub fn with_file(self, path: &str, contents: impl Into<Vec<u8>>) -> Self {
        let path = normalize(path);
        {
            let mut fs = lock(&self.state.fs);
            if let Some(parent) = remote_parent(&path) {
                fs.mkdir_all(&parent);
            }
            fs.nodes.insert(path, MockNode::File(contents.into()));
        }
        self
    }

    pub fn with_exec(self, command: &str, stdout: &str, exit_code: u32) -> Self {
        lock(&self.state.exec).insert(
            command.to_string(),
            ExecOutput {
                stdout: stdout.to_string(),
                stderr: String::new(),
                exit_code: Some(exit_code),
            },
        );
        self
    }

    /// Bound for `exec`; commands also sleep the I/O delay before answering.
    pub fn with_exec_timeout(self, limit: Duration) -> Self {
        *lock(&self.state.exec_timeout) = limit;
        self
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        match lock(&self.state.fs).nodes.get(&normalize(path)) {
            Some(MockNode::File(data)) => Some(data.clone()),
            _ => None,
        }
    }

    pub fn is_dir(&self, path: &str) -> bool {
        matches!(
            lock(&self.state.fs).nodes.get(&normalize(path)),
            Some(MockNode::Dir)
        )
    }

    pub fn path_exists(&self, path: &str) -> bool {
        lock(&self.state.fs).nodes.contains_key(&normalize(path))
    }

    pub fn connect_count(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn dispose_count(&self) -> usize {
        self.state.disposes.load(Ordering::SeqCst)
    }

    pub fn last_resize(&self) -> Option<TerminalSize> {
        *lock(&self.state.last_resize)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, _config: &ConnectionConfig) -> RemoteResult<Arc<dyn RemoteConnection>> {
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = lock(&self.state.fail_connect).clone() {
            return Err(RemoteError::Connect(message));
        }
        Ok(Arc::new(MockConnection {
            state: self.state.clone(),
            disposed: AtomicBool::new(false),
        }))
    }
}

pub struct MockConnection {
    state: Arc<MockState>,
    disposed: AtomicBool,
}

impl MockConnection {
    fn ensure_live(&self) -> RemoteResult<()> {
        if self.disposed.load(Ordering::SeqCst) {
            Err(RemoteError::Disposed)
        } else {
            Ok(())
        }
    }

    fn fs(&self) -> MutexGuard<'_, MockFs> {
        lock(&self.state.fs)
    }
}

#[async_trait]
impl RemoteConnection for MockConnection {
    async fn request_shell(&self, size: TerminalSize) -> RemoteResult<ShellHandle> {
        self.ensure_live()?;
        let (handle, mut commands, events) = ShellHandle::channel();
        *lock(&self.state.last_resize) = Some(size);
        let state = self.state.clone();

        tokio::spawn(async move {
            while let Some(command) = commands.recv().await {
                match command {
                    ShellCommand::Write(bytes) if bytes.as_ref() == b"exit\n" => {
                        let _ = events.send(ShellEvent::Exit(0)).await;
                        break;
                    }
                    ShellCommand::Write(bytes) => {
                        if events.send(ShellEvent::Data(bytes)).await.is_err() {
                            return;
                        }
                    }
                    ShellCommand::Resize(size) => *lock(&state.last_resize) = Some(size),
                    ShellCommand::Close => break,
                }
            }
            let _ = events.send(ShellEvent::Closed).await;
        });

        Ok(handle)
    }

    async fn exec(&self, command: &str) -> RemoteResult<ExecOutput> {
        self.ensure_live()?;
        let delay = *lock(&self.state.io_delay);
        let limit = *lock(&self.state.exec_timeout);
        let output = lock(&self.state.exec)
            .get(command)
            .cloned()
            .unwrap_or_else(|| ExecOutput {
                stdout: String::new(),
                stderr: format!("{command}: command not found\n"),
                exit_code: Some(127),
            });

        bounded_exec(limit, async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            Ok(output)
        })
        .await
    }

    async fn list(&self, path: &str) -> RemoteResult<Vec<RemoteEntry>> {
        self.ensure_live()?;
        let path = normalize(path);
        let fs = self.fs();
        match fs.nodes.get(&path) {
            Some(MockNode::Dir) => {}
            Some(MockNode::File(_)) => return Err(RemoteError::NotADirectory(path)),
            None => return Err(RemoteError::NotFound(path)),
        }
        Ok(fs
            .children(&path)
            .into_iter()
            .map(|(child, node)| RemoteEntry {
                name: remote_file_name(&child).to_string(),
                metadata: MockFs::metadata(&node),
            })
            .collect())
    }

    async fn stat(&self, path: &str) -> RemoteResult<RemoteMetadata> {
        self.ensure_live()?;
        let path = normalize(path);
        self.fs()
            .nodes
            .get(&path)
            .map(MockFs::metadata)
            .ok_or(RemoteError::NotFound(path))
    }

    async fn exists(&self, path: &str) -> RemoteResult<bool> {
        self.ensure_live()?;
        Ok(self.fs().nodes.contains_key(&normalize(path)))
    }

    async fn read(&self, path: &str) -> RemoteResult<Vec<u8>> {
        self.ensure_live()?;
        let path = normalize(path);
        match self.fs().nodes.get(&path) {
            Some(MockNode::File(data)) => Ok(data.clone()),
            Some(MockNode::Dir) => Err(RemoteError::Protocol(format!("{path} is a directory"))),
            None => Err(RemoteError::NotFound(path)),
        }
    }

    async fn write(&self, path: &str, data: &[u8]) -> RemoteResult<()> {
        self.ensure_live()?;
        let path = normalize(path);
        let mut fs = self.fs();
        fs.require_parent_dir(&path)?;
        if matches!(fs.nodes.get(&path), Some(MockNode::Dir)) {
            return Err(RemoteError::Protocol(format!("{path} is a directory")));
        }
        fs.nodes.insert(path, MockNode::File(data.to_vec()));
        Ok(())
    }

    async fn open_read(&self, path: &str) -> RemoteResult<RemoteReader> {
        let data = Bytes::from(self.read(path).await?);
        let delay = *lock(&self.state.io_delay);
        let fail_after = *lock(&self.state.fail_after);

        let stream = futures::stream::unfold(0usize, move |offset| {
            let data = data.clone();
            async move {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                if let Some(limit) = fail_after {
                    if offset as u64 >= limit {
                        let err = io::Error::new(io::ErrorKind::TimedOut, "mock read timed out");
                        // usize::MAX ends the stream after the error
                        return (offset != usize::MAX).then_some((Err(err), usize::MAX));
                    }
                }
                if offset >= data.len() {
                    return None;
                }
                let mut end = (offset + READ_CHUNK).min(data.len());
                if let Some(limit) = fail_after {
                    end = end.min((limit as usize).max(offset + 1));
                }
                Some((Ok(data.slice(offset..end)), end))
            }
        });

        Ok(Box::new(StreamReader::new(Box::pin(stream))))
    }

    async fn open_write(&self, path: &str) -> RemoteResult<RemoteWriter> {
        self.write(path, &[]).await?;
        Ok(Box::new(MockFileWriter {
            state: self.state.clone(),
            path: normalize(path),
            delay: *lock(&self.state.io_delay),
            fail_after: *lock(&self.state.fail_after),
            sleep: None,
            written: 0,
        }))
    }

    async fn mkdir(&self, path: &str) -> RemoteResult<()> {
        self.ensure_live()?;
        let path = normalize(path);
        let mut fs = self.fs();
        fs.require_parent_dir(&path)?;
        if fs.nodes.contains_key(&path) {
            return Err(RemoteError::Protocol(format!("{path} already exists")));
        }
        fs.nodes.insert(path, MockNode::Dir);
        Ok(())
    }

    async fn rmdir(&self, path: &str) -> RemoteResult<()> {
        self.ensure_live()?;
        let path = normalize(path);
        let mut fs = self.fs();
        match fs.nodes.get(&path) {
            Some(MockNode::Dir) if !fs.children(&path).is_empty() => {
                Err(RemoteError::Protocol(format!("{path} is not empty")))
            }
            Some(MockNode::Dir) => {
                fs.nodes.remove(&path);
                Ok(())
            }
            Some(MockNode::File(_)) => Err(RemoteError::NotADirectory(path)),
            None => Err(RemoteError::NotFound(path)),
        }
    }

    async fn remove(&self, path: &str) -> RemoteResult<()> {
        self.ensure_live()?;
        let path = normalize(path);
        let mut fs = self.fs();
        match fs.nodes.get(&path) {
            Some(MockNode::File(_)) => {
                fs.nodes.remove(&path);
                Ok(())
            }
            Some(MockNode::Dir) => Err(RemoteError::Protocol(format!("{path} is a directory"))),
            None => Err(RemoteError::NotFound(path)),
        }
    }

    async fn rename(&self, from: &str, to: &str) -> RemoteResult<()> {
        self.ensure_live()?;
        let (from, to) = (normalize(from), normalize(to));
        let mut fs = self.fs();
        if !fs.nodes.contains_key(&from) {
            return Err(RemoteError::NotFound(from));
        }
        fs.require_parent_dir(&to)?;
        if fs.nodes.contains_key(&to) {
            return Err(RemoteError::Protocol(format!("{to} already exists")));
        }

        // Move the node and everything beneath it
        let prefix = format!("{from}/");
        let moved: Vec<String> = fs
            .nodes
            .keys()
            .filter(|key| **key == from || key.starts_with(&prefix))
            .cloned()
            .collect();
        for key in moved {
            if let Some(node) = fs.nodes.remove(&key) {
                let new_key = format!("{to}{}", &key[from.len()..]);
                fs.nodes.insert(new_key, node);
            }
        }
        Ok(())
    }

    async fn dispose(&self) -> RemoteResult<()> {
        if !self.disposed.swap(true, Ordering::SeqCst) {
            self.state.disposes.fetch_add(1, Ordering::SeqCst);
            if let Some(message) = lock(&self.state.fail_dispose).clone() {
                return Err(RemoteError::Protocol(message));
            }
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}

struct MockFileWriter {
    state: Arc<MockState>,
    path: String,
    delay: Option<Duration>,
    fail_after: Option<u64>,
    sleep: Option<Pin<Box<tokio::time::Sleep>>>,
    written: u64,
}

impl AsyncWrite for MockFileWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();

        if let Some(delay) = this.delay {
            let sleep = this
                .sleep
                .get_or_insert_with(|| Box::pin(tokio::time::sleep(delay)));
            ready!(sleep.as_mut().poll(cx));
            this.sleep = None;
        }

        if let Some(limit) = this.fail_after {
            if this.written >= limit {
                return Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "mock write timed out",
                )));
            }
        }

        let mut fs = lock(&this.state.fs);
        match fs.nodes.get_mut(&this.path) {
            Some(MockNode::File(data)) => data.extend_from_slice(buf),
            _ => {
                return Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::NotFound,
                    "mock file removed during write",
                )))
            }
        }
        this.written += buf.len() as u64;
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}
