//! Client-visible transfer queue.
//!
//! Submissions create `pending` records synchronously and push their ids onto
//! a FIFO queue. A single admission loop takes a semaphore permit per id
//! before spawning the transfer task, so at most `max_concurrent_transfers`
//! records are ever in flight and waiting records start in submission order.
//! The permit is released only after the record reached a terminal state.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Instant;
use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::backend::{JobKind, ProgressSink, TransferBackend, TransferJob, TransferOutcome};
use super::error::TransferError;
use super::events::TransferEvent;
use super::progress::SpeedMeter;
use super::record::{
    TransferDirection, TransferRecord, TransferStats, TransferStatus, UploadFile,
};
use crate::common::config::TransferSettings;
use crate::utils::security::{remote_file_name, validate_filename, validate_remote_path};

pub const EVENT_CHANNEL_CAPACITY: usize = 256;
/// Finished records kept for `get_transfer` and stats
pub const HISTORY_LIMIT: usize = 1000;

struct ManagerInner {
    active: DashMap<String, TransferRecord>,
    history: Mutex<VecDeque<TransferRecord>>,
    jobs: DashMap<String, TransferJob>,
    tokens: DashMap<String, CancellationToken>,
    order: DashMap<String, u64>,
    next_seq: AtomicU64,
    queue: mpsc::UnboundedSender<String>,
    events: broadcast::Sender<TransferEvent>,
    backend: Arc<dyn TransferBackend>,
    settings: TransferSettings,
}

pub struct TransferManager {
    inner: Arc<ManagerInner>,
}

impl TransferManager {
    /// Build the manager and start its admission loop on the current runtime.
    pub fn new(backend: Arc<dyn TransferBackend>, settings: TransferSettings) -> Self {
        let (queue, queue_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let slots = Arc::new(Semaphore::new(settings.max_concurrent_transfers.max(1)));

        let inner = Arc::new(ManagerInner {
            active: DashMap::new(),
            history: Mutex::new(VecDeque::new()),
            jobs: DashMap::new(),
            tokens: DashMap::new(),
            order: DashMap::new(),
            next_seq: AtomicU64::new(0),
            queue,
            events,
            backend,
            settings,
        });

        tokio::spawn(admission_loop(Arc::downgrade(&inner), queue_rx, slots));

        tracing::debug!(
            backend = inner.backend.name(),
            max_concurrent = inner.settings.max_concurrent_transfers,
            "transfer manager started"
        );
        Self { inner }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TransferEvent> {
        self.inner.events.subscribe()
    }

    pub fn backend_name(&self) -> &'static str {
        self.inner.backend.name()
    }

    /// Queue uploads of `files` into `remote_dir`. Every file is validated
    /// before any record is created; the ids come back in submission order.
    pub fn upload_files(
        &self,
        session_id: Option<&str>,
        files: Vec<UploadFile>,
        remote_dir: &str,
    ) -> Result<Vec<String>, TransferError> {
        if files.is_empty() {
            return Err(TransferError::Validation("no files to upload".into()));
        }
        validate_remote_path(remote_dir)
            .map_err(|e| TransferError::Validation(format!("invalid remote path: {e}")))?;
        for file in &files {
            validate_filename(&file.name)
                .map_err(|e| TransferError::Validation(format!("invalid file name {:?}: {e}", file.name)))?;
            if file.size != file.content.len() as u64 {
                return Err(TransferError::Validation(format!(
                    "declared size of {} does not match its content",
                    file.name
                )));
            }
        }

        let ids = files
            .into_iter()
            .map(|file| {
                let id = Uuid::new_v4().to_string();
                let record = TransferRecord::pending(
                    id.clone(),
                    TransferDirection::Upload,
                    file.name.clone(),
                    file.size,
                    remote_dir.to_string(),
                    session_id.map(String::from),
                );
                let job = TransferJob {
                    id: id.clone(),
                    session_id: session_id.map(String::from),
                    remote_path: remote_dir.to_string(),
                    file_name: file.name,
                    kind: JobKind::Upload {
                        content: file.content,
                    },
                };
                self.inner.submit(record, job);
                id
            })
            .collect();
        Ok(ids)
    }

    /// Queue a download of `remote_path` into the configured download
    /// directory, named `local_name` or after the remote file.
    pub fn download_file(
        &self,
        session_id: Option<&str>,
        remote_path: &str,
        local_name: Option<&str>,
    ) -> Result<String, TransferError> {
        validate_remote_path(remote_path)
            .map_err(|e| TransferError::Validation(format!("invalid remote path: {e}")))?;
        let name = local_name.unwrap_or_else(|| remote_file_name(remote_path));
        validate_filename(name)
            .map_err(|e| TransferError::Validation(format!("invalid local name {name:?}: {e}")))?;

        let id = Uuid::new_v4().to_string();
        let record = TransferRecord::pending(
            id.clone(),
            TransferDirection::Download,
            name.to_string(),
            0,
            remote_path.to_string(),
            session_id.map(String::from),
        );
        let job = TransferJob {
            id: id.clone(),
            session_id: session_id.map(String::from),
            remote_path: remote_path.to_string(),
            file_name: name.to_string(),
            kind: JobKind::Download {
                local_dir: self.inner.settings.download_dir.clone(),
            },
        };
        self.inner.submit(record, job);
        Ok(id)
    }

    /// Record an upload that was written outside the queue (the direct SFTP
    /// upload route) so its id resolves like any queued transfer.
    pub fn record_completed_upload(
        &self,
        id: String,
        session_id: &str,
        file_name: &str,
        remote_dir: &str,
        bytes: u64,
        started: DateTime<Utc>,
    ) -> TransferRecord {
        let mut record = TransferRecord::pending(
            id.clone(),
            TransferDirection::Upload,
            file_name.to_string(),
            bytes,
            remote_dir.to_string(),
            Some(session_id.to_string()),
        );
        record.created_at = started;
        record.start_time = Some(started);
        record.transferred = bytes;
        record.finish(TransferStatus::Completed);

        let inner = &self.inner;
        inner
            .order
            .insert(id, inner.next_seq.fetch_add(1, Ordering::SeqCst));
        inner.archive(record.clone());
        inner.emit(TransferEvent::TransferAdded(record.clone()));
        inner.emit(TransferEvent::TransferCompleted(record.clone()));
        record
    }

    /// Abort a pending or in-flight transfer. The backend sees the token
    /// fire inside its current I/O call.
    pub fn cancel_transfer(&self, id: &str) -> Result<TransferRecord, TransferError> {
        let inner = &self.inner;
        let Some((_, mut record)) = inner.active.remove(id) else {
            return Err(if inner.history_contains(id) {
                TransferError::Validation(format!("transfer {id} already finished"))
            } else {
                TransferError::NotFound(id.to_string())
            });
        };

        if let Some((_, token)) = inner.tokens.remove(id) {
            token.cancel();
        }
        inner.jobs.remove(id);
        record.finish(TransferStatus::Cancelled);

        tracing::info!(transfer_id = id, file = %record.file_name, "transfer cancelled");
        inner.archive(record.clone());
        inner.emit(TransferEvent::TransferUpdated(record.clone()));
        Ok(record)
    }

    /// Resubmit a failed transfer whose error was retryable, after the
    /// configured exponential backoff.
    pub fn retry_transfer(&self, id: &str) -> Result<TransferRecord, TransferError> {
        let inner = &self.inner;
        let retry = inner.settings.retry;

        let mut record = {
            let mut history = inner.history();
            let Some(pos) = history.iter().position(|r| r.id == id) else {
                return Err(if inner.active.contains_key(id) {
                    TransferError::Validation(format!("transfer {id} is still active"))
                } else {
                    TransferError::NotFound(id.to_string())
                });
            };

            let candidate = &history[pos];
            if candidate.status != TransferStatus::Error || !candidate.retryable {
                return Err(TransferError::Validation(format!(
                    "transfer {id} did not fail with a retryable error"
                )));
            }
            if candidate.attempts >= retry.max_attempts {
                return Err(TransferError::Validation(format!(
                    "transfer {id} reached the limit of {} attempts",
                    retry.max_attempts
                )));
            }
            if !inner.jobs.contains_key(id) {
                return Err(TransferError::Validation(format!(
                    "transfer {id} can no longer be retried"
                )));
            }
            match history.remove(pos) {
                Some(record) => record,
                None => return Err(TransferError::NotFound(id.to_string())),
            }
        };

        let delay = retry.backoff_for(record.attempts);
        record.attempts += 1;
        record.status = TransferStatus::Pending;
        record.transferred = 0;
        record.speed = 0.0;
        record.estimated_time_remaining = None;
        record.error = None;
        record.retryable = false;
        record.start_time = None;
        record.end_time = None;

        let token = CancellationToken::new();
        inner.tokens.insert(id.to_string(), token.clone());
        inner
            .order
            .insert(id.to_string(), inner.next_seq.fetch_add(1, Ordering::SeqCst));
        inner.active.insert(id.to_string(), record.clone());
        inner.emit(TransferEvent::TransferUpdated(record.clone()));

        tracing::info!(
            transfer_id = id,
            attempt = record.attempts,
            delay_ms = delay.as_millis() as u64,
            "transfer retry scheduled"
        );

        let queue = inner.queue.clone();
        let id = id.to_string();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let _ = queue.send(id);
                }
            }
        });

        Ok(record)
    }

    /// Pending and in-flight records in submission order.
    pub fn get_active_transfers(&self) -> Vec<TransferRecord> {
        let mut records: Vec<(u64, TransferRecord)> = self
            .inner
            .active
            .iter()
            .map(|entry| (self.inner.seq_of(entry.key()), entry.value().clone()))
            .collect();
        records.sort_by_key(|(seq, _)| *seq);
        records.into_iter().map(|(_, record)| record).collect()
    }

    pub fn get_history(&self) -> Vec<TransferRecord> {
        self.inner.history().iter().cloned().collect()
    }

    pub fn get_transfer(&self, id: &str) -> Option<TransferRecord> {
        if let Some(record) = self.inner.active.get(id) {
            return Some(record.clone());
        }
        self.inner.history().iter().find(|r| r.id == id).cloned()
    }

    pub fn get_transfer_stats(&self) -> TransferStats {
        let mut records: Vec<TransferRecord> = self
            .inner
            .active
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        records.extend(self.inner.history().iter().cloned());
        TransferStats::from_records(&records)
    }

    /// Forget finished records. Returns how many were dropped.
    pub fn clear_history(&self) -> usize {
        let drained: Vec<TransferRecord> = self.inner.history().drain(..).collect();
        for record in &drained {
            self.inner.forget(&record.id);
        }
        drained.len()
    }

    /// Cancel everything still running, used on process shutdown.
    pub fn shutdown(&self) {
        let ids: Vec<String> = self.inner.active.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            let _ = self.cancel_transfer(&id);
        }
    }
}

async fn admission_loop(
    manager: Weak<ManagerInner>,
    mut queue: mpsc::UnboundedReceiver<String>,
    slots: Arc<Semaphore>,
) {
    while let Some(id) = queue.recv().await {
        let Ok(permit) = slots.clone().acquire_owned().await else {
            break;
        };
        let Some(inner) = manager.upgrade() else {
            break;
        };
        // Cancelled while waiting in the queue
        if !inner.start(&id) {
            continue;
        }
        tokio::spawn(async move {
            inner.run(id).await;
            drop(permit);
        });
    }
    tracing::debug!("transfer admission loop stopped");
}

impl ManagerInner {
    fn history(&self) -> MutexGuard<'_, VecDeque<TransferRecord>> {
        match self.history.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn history_contains(&self, id: &str) -> bool {
        self.history().iter().any(|r| r.id == id)
    }

    fn seq_of(&self, id: &str) -> u64 {
        self.order.get(id).map(|seq| *seq).unwrap_or(u64::MAX)
    }

    fn emit(&self, event: TransferEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn submit(&self, record: TransferRecord, job: TransferJob) {
        let id = record.id.clone();
        self.order
            .insert(id.clone(), self.next_seq.fetch_add(1, Ordering::SeqCst));
        self.tokens.insert(id.clone(), CancellationToken::new());
        self.jobs.insert(id.clone(), job);
        self.active.insert(id.clone(), record.clone());

        tracing::info!(
            transfer_id = %id,
            direction = ?record.direction,
            file = %record.file_name,
            size = record.size,
            "transfer queued"
        );
        self.emit(TransferEvent::TransferAdded(record));
        if self.queue.send(id).is_err() {
            tracing::error!("transfer admission loop is gone");
        }
    }

    /// pending -> uploading/downloading. False if the record is gone.
    fn start(&self, id: &str) -> bool {
        let record = match self.active.get_mut(id) {
            Some(mut record) if record.status == TransferStatus::Pending => {
                record.status = TransferStatus::in_flight_for(record.direction);
                record.start_time = Some(Utc::now());
                record.clone()
            }
            _ => return false,
        };
        tracing::debug!(transfer_id = id, "transfer started");
        self.emit(TransferEvent::TransferUpdated(record));
        true
    }

    async fn run(self: Arc<Self>, id: String) {
        let Some(job) = self.jobs.get(&id).map(|job| job.value().clone()) else {
            return;
        };
        let cancel = self
            .tokens
            .get(&id)
            .map(|token| token.clone())
            .unwrap_or_default();
        let progress: Arc<dyn ProgressSink> = Arc::new(RecordProgress {
            manager: self.clone(),
            id: id.clone(),
            meter: Mutex::new(SpeedMeter::new(Instant::now())),
        });

        let result = match &job.kind {
            JobKind::Upload { content } => {
                self.backend.upload(&job, content, progress, &cancel).await
            }
            JobKind::Download { local_dir } => {
                self.backend
                    .download(&job, local_dir, progress, &cancel)
                    .await
            }
        };

        match result {
            Ok(outcome) => self.complete(&id, outcome),
            Err(TransferError::Cancelled) => {
                tracing::debug!(transfer_id = %id, "backend observed cancellation");
            }
            Err(err) => self.fail(&id, err),
        }
    }

    fn complete(&self, id: &str, outcome: TransferOutcome) {
        let Some((_, mut record)) = self
            .active
            .remove_if(id, |_, record| record.status.is_in_flight())
        else {
            return;
        };

        record.size = outcome.bytes;
        record.transferred = outcome.bytes;
        record.local_path = outcome.local_path.map(|p| p.display().to_string());
        record.finish(TransferStatus::Completed);
        self.tokens.remove(id);
        self.jobs.remove(id);

        tracing::info!(transfer_id = id, file = %record.file_name, bytes = record.size, "transfer completed");
        self.archive(record.clone());
        self.emit(TransferEvent::TransferCompleted(record));
    }

    fn fail(&self, id: &str, err: TransferError) {
        let Some((_, mut record)) = self
            .active
            .remove_if(id, |_, record| record.status.is_in_flight())
        else {
            return;
        };

        // A record that used up its attempts can never run again, so its
        // payload goes now rather than when it leaves the history
        let retryable = err.is_retryable() && record.attempts < self.settings.retry.max_attempts;
        let message = err.to_string();
        record.error = Some(message.clone());
        record.retryable = retryable;
        record.finish(TransferStatus::Error);
        self.tokens.remove(id);
        if !retryable {
            self.jobs.remove(id);
        }

        tracing::warn!(transfer_id = id, file = %record.file_name, retryable, error = %message, "transfer failed");
        self.archive(record.clone());
        self.emit(TransferEvent::TransferError {
            id: id.to_string(),
            message,
            retryable,
        });
        self.emit(TransferEvent::TransferUpdated(record));
    }

    fn archive(&self, record: TransferRecord) {
        let evicted = {
            let mut history = self.history();
            history.push_back(record);
            if history.len() > HISTORY_LIMIT {
                history.pop_front()
            } else {
                None
            }
        };
        if let Some(old) = evicted {
            self.forget(&old.id);
        }
    }

    fn forget(&self, id: &str) {
        self.jobs.remove(id);
        self.order.remove(id);
    }
}

/// Writes backend progress into the live record.
struct RecordProgress {
    manager: Arc<ManagerInner>,
    id: String,
    meter: Mutex<SpeedMeter>,
}

impl ProgressSink for RecordProgress {
    fn set_size(&self, size: u64) {
        if let Some(mut record) = self.manager.active.get_mut(&self.id) {
            record.size = size;
        }
    }

    fn advance(&self, transferred: u64) {
        let now = Instant::now();
        let event = {
            let Some(mut record) = self.manager.active.get_mut(&self.id) else {
                return;
            };
            if !record.status.is_in_flight() {
                return;
            }
            let sample = match self.meter.lock() {
                Ok(mut meter) => meter.sample(transferred, record.size, now),
                Err(poisoned) => poisoned.into_inner().sample(transferred, record.size, now),
            };
            record.transferred = if record.size > 0 {
                sample.transferred
            } else {
                transferred
            };
            record.speed = sample.speed;
            record.estimated_time_remaining = sample.eta;

            sample.emit.then(|| TransferEvent::TransferProgress {
                id: self.id.clone(),
                transferred: record.transferred,
                size: record.size,
                speed: record.speed,
                estimated_time_remaining: record.estimated_time_remaining,
            })
        };
        if let Some(event) = event {
            self.manager.emit(event);
        }
    }
}
