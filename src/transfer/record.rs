use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferDirection {
    Upload,
    Download,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    Pending,
    Uploading,
    Downloading,
    Completed,
    Error,
    Cancelled,
}

impl TransferStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error | Self::Cancelled)
    }

    pub fn is_in_flight(self) -> bool {
        matches!(self, Self::Uploading | Self::Downloading)
    }

    pub(crate) fn in_flight_for(direction: TransferDirection) -> Self {
        match direction {
            TransferDirection::Upload => Self::Uploading,
            TransferDirection::Download => Self::Downloading,
        }
    }
}

/// One file handed to the transfer queue for upload.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub name: String,
    pub size: u64,
    pub content: Bytes,
}

impl UploadFile {
    pub fn new(name: impl Into<String>, content: impl Into<Bytes>) -> Self {
        let content = content.into();
        Self {
            name: name.into(),
            size: content.len() as u64,
            content,
        }
    }
}

/// Client-visible state of one upload or download.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRecord {
    pub id: String,
    pub direction: TransferDirection,
    pub file_name: String,
    pub size: u64,
    pub remote_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_path: Option<String>,
    pub status: TransferStatus,
    pub transferred: u64,
    /// Bytes per second
    pub speed: f64,
    pub created_at: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    /// Seconds
    pub estimated_time_remaining: Option<f64>,
    pub error: Option<String>,
    pub retryable: bool,
    pub attempts: u32,
}

impl TransferRecord {
    pub(crate) fn pending(
        id: String,
        direction: TransferDirection,
        file_name: String,
        size: u64,
        remote_path: String,
        session_id: Option<String>,
    ) -> Self {
        Self {
            id,
            direction,
            file_name,
            size,
            remote_path,
            session_id,
            local_path: None,
            status: TransferStatus::Pending,
            transferred: 0,
            speed: 0.0,
            created_at: Utc::now(),
            start_time: None,
            end_time: None,
            estimated_time_remaining: None,
            error: None,
            retryable: false,
            attempts: 1,
        }
    }

    /// Percentage in `0..=100`.
    pub fn percent(&self) -> f64 {
        if self.size == 0 {
            return if self.status == TransferStatus::Completed { 100.0 } else { 0.0 };
        }
        (self.transferred as f64 / self.size as f64 * 100.0).min(100.0)
    }

    pub(crate) fn finish(&mut self, status: TransferStatus) {
        self.status = status;
        self.end_time = Some(Utc::now());
        self.speed = 0.0;
        self.estimated_time_remaining = None;
    }
}

/// Aggregate counts over active and historical records.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferStats {
    pub total: usize,
    pub pending: usize,
    pub active: usize,
    pub completed: usize,
    pub errors: usize,
    pub cancelled: usize,
    pub total_bytes: u64,
    pub completed_bytes: u64,
    /// Completed share of all records, `0.0..=1.0`
    pub completion_rate: f64,
}

impl TransferStats {
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a TransferRecord>) -> Self {
        let mut stats = Self::default();
        for record in records {
            stats.total += 1;
            stats.total_bytes += record.size;
            stats.completed_bytes += record.transferred.min(record.size);
            match record.status {
                TransferStatus::Pending => stats.pending += 1,
                TransferStatus::Uploading | TransferStatus::Downloading => stats.active += 1,
                TransferStatus::Completed => stats.completed += 1,
                TransferStatus::Error => stats.errors += 1,
                TransferStatus::Cancelled => stats.cancelled += 1,
            }
        }
        if stats.total > 0 {
            stats.completion_rate = stats.completed as f64 / stats.total as f64;
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(status: TransferStatus, size: u64, transferred: u64) -> TransferRecord {
        let mut r = TransferRecord::pending(
            "id".into(),
            TransferDirection::Upload,
            "f".into(),
            size,
            "/r".into(),
            None,
        );
        r.status = status;
        r.transferred = transferred;
        r
    }

    #[test]
    fn stats_partition_records_by_status() {
        let records = vec![
            record(TransferStatus::Pending, 10, 0),
            record(TransferStatus::Uploading, 10, 4),
            record(TransferStatus::Completed, 10, 10),
            record(TransferStatus::Error, 10, 3),
            record(TransferStatus::Cancelled, 10, 1),
        ];
        let stats = TransferStats::from_records(&records);

        assert_eq!(stats.total, 5);
        assert_eq!(stats.active, 1);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.errors, 1);
        assert!(stats.completed + stats.active + stats.errors <= stats.total);
        assert_eq!(stats.total_bytes, 50);
        assert_eq!(stats.completed_bytes, 18);
        assert!((stats.completion_rate - 0.2).abs() < f64::EPSILON);
    }

    #[test]
    fn empty_stats_have_zero_rate() {
        let stats = TransferStats::from_records(Vec::<TransferRecord>::new().iter());
        assert_eq!(stats.total, 0);
        assert_eq!(stats.completion_rate, 0.0);
    }

    #[test]
    fn percent_is_capped() {
        assert_eq!(record(TransferStatus::Uploading, 10, 5).percent(), 50.0);
        assert_eq!(record(TransferStatus::Completed, 0, 0).percent(), 100.0);
    }

    #[test]
    fn serializes_camel_case() {
        let json = serde_json::to_value(record(TransferStatus::Pending, 1, 0)).unwrap();
        assert_eq!(json["fileName"], "f");
        assert_eq!(json["status"], "pending");
        assert!(json.get("estimatedTimeRemaining").is_some());
    }
}
