use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TransitionError;

/// Flat status tag, as stored and reported.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of one transfer, carrying the timestamps each state implies.
///
/// Legal moves: `Queued -> Running -> {Completed, Failed}`,
/// `Queued -> Cancelled`, `Running -> Cancelled`. Terminal states never move.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running {
        started_at: DateTime<Utc>,
    },
    Completed {
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    },
    Failed {
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
        error: String,
    },
    Cancelled {
        started_at: Option<DateTime<Utc>>,
        completed_at: DateTime<Utc>,
    },
}

impl JobState {
    pub fn status(&self) -> JobStatus {
        match self {
            JobState::Queued => JobStatus::Queued,
            JobState::Running { .. } => JobStatus::Running,
            JobState::Completed { .. } => JobStatus::Completed,
            JobState::Failed { .. } => JobStatus::Failed,
            JobState::Cancelled { .. } => JobStatus::Cancelled,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        match self {
            JobState::Queued => None,
            JobState::Running { started_at }
            | JobState::Completed { started_at, .. }
            | JobState::Failed { started_at, .. } => Some(*started_at),
            JobState::Cancelled { started_at, .. } => *started_at,
        }
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        match self {
            JobState::Queued | JobState::Running { .. } => None,
            JobState::Completed { completed_at, .. }
            | JobState::Failed { completed_at, .. }
            | JobState::Cancelled { completed_at, .. } => Some(*completed_at),
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            JobState::Failed { error, .. } => Some(error),
            _ => None,
        }
    }

    pub fn start(&self, at: DateTime<Utc>) -> Result<JobState, TransitionError> {
        match self {
            JobState::Queued => Ok(JobState::Running { started_at: at }),
            _ => Err(self.illegal(JobStatus::Running)),
        }
    }

    pub fn complete(&self, at: DateTime<Utc>) -> Result<JobState, TransitionError> {
        match self {
            JobState::Running { started_at } => Ok(JobState::Completed {
                started_at: *started_at,
                completed_at: at,
            }),
            _ => Err(self.illegal(JobStatus::Completed)),
        }
    }

    pub fn fail(&self, error: impl Into<String>, at: DateTime<Utc>) -> Result<JobState, TransitionError> {
        match self {
            JobState::Running { started_at } => Ok(JobState::Failed {
                started_at: *started_at,
                completed_at: at,
                error: error.into(),
            }),
            _ => Err(self.illegal(JobStatus::Failed)),
        }
    }

    pub fn cancel(&self, at: DateTime<Utc>) -> Result<JobState, TransitionError> {
        match self {
            JobState::Queued | JobState::Running { .. } => Ok(JobState::Cancelled {
                started_at: self.started_at(),
                completed_at: at,
            }),
            _ => Err(self.illegal(JobStatus::Cancelled)),
        }
    }

    fn illegal(&self, to: JobStatus) -> TransitionError {
        TransitionError { from: self.status(), to }
    }
}

/// What the API layer submits to enqueue a transfer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransferRequest {
    pub user_id: String,
    pub source_account_id: String,
    pub destination_account_id: String,
    pub source_path: String,
    pub destination_path: String,
    /// Defaults to the last component of `source_path`.
    pub file_name: Option<String>,
}

impl TransferRequest {
    pub fn resolved_file_name(&self) -> String {
        if let Some(name) = self.file_name.as_deref().filter(|n| !n.is_empty()) {
            return name.to_string();
        }
        self.source_path
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .filter(|n| !n.is_empty())
            .unwrap_or(&self.source_path)
            .to_string()
    }
}

/// Returned by `create_transfer`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransferTicket {
    pub transfer_id: String,
    pub status: JobStatus,
}

/// Durable row for one transfer.
///
/// `priority`, `retry_count` and `max_retries` are stored but never read by
/// the engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransferRecord {
    pub id: String,
    pub user_id: String,
    pub source_account_id: String,
    pub destination_account_id: String,
    pub source_path: String,
    pub destination_path: String,
    pub file_name: String,
    pub status: JobStatus,
    pub progress: u8,
    pub file_size: u64,
    pub transferred_bytes: u64,
    pub transfer_speed: f64,
    pub error: Option<String>,
    pub priority: i64,
    pub retry_count: i64,
    pub max_retries: i64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Engine-side mutation counter of the last snapshot written.
    #[serde(default)]
    pub version: u64,
}

pub const DEFAULT_MAX_RETRIES: i64 = 3;

/// Partial update of a [`TransferRecord`]; `None` leaves the column as is.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TransferUpdate {
    pub status: Option<JobStatus>,
    pub progress: Option<u8>,
    pub file_size: Option<u64>,
    pub transferred_bytes: Option<u64>,
    pub transfer_speed: Option<f64>,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Job version the patch was taken at. Unversioned patches always apply.
    pub version: Option<u64>,
}

impl TransferUpdate {
    pub fn cancelled(at: DateTime<Utc>) -> Self {
        TransferUpdate {
            status: Some(JobStatus::Cancelled),
            completed_at: Some(at),
            ..Default::default()
        }
    }

    /// Whether this patch is newer than what `record` already holds.
    pub fn supersedes(&self, record: &TransferRecord) -> bool {
        self.version.map_or(true, |v| v > record.version)
    }

    pub fn apply(&self, record: &mut TransferRecord) {
        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some(progress) = self.progress {
            record.progress = progress;
        }
        if let Some(size) = self.file_size {
            record.file_size = size;
        }
        if let Some(bytes) = self.transferred_bytes {
            record.transferred_bytes = bytes;
        }
        if let Some(speed) = self.transfer_speed {
            record.transfer_speed = speed;
        }
        if let Some(error) = &self.error {
            record.error = Some(error.clone());
        }
        if let Some(at) = self.started_at {
            record.started_at = Some(at);
        }
        if let Some(at) = self.completed_at {
            record.completed_at = Some(at);
        }
        if let Some(version) = self.version {
            record.version = version;
        }
    }
}

/// Point-in-time view of a transfer, with derived timing fields.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransferStats {
    pub id: String,
    pub user_id: String,
    pub source_account_id: String,
    pub destination_account_id: String,
    pub source_path: String,
    pub destination_path: String,
    pub file_name: String,
    pub status: JobStatus,
    pub progress: u8,
    pub file_size: u64,
    pub transferred_bytes: u64,
    pub transfer_speed: f64,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// `(completed_at or now) - started_at`, absent before the job starts.
    pub elapsed_ms: Option<i64>,
    /// `(file_size - transferred_bytes) / speed`, absent when speed is zero.
    pub eta_secs: Option<f64>,
    pub version: u64,
}

impl TransferStats {
    pub fn from_record(record: &TransferRecord, now: DateTime<Utc>) -> Self {
        let elapsed_ms = elapsed_ms(record.started_at, record.completed_at, now);
        let eta_secs = if record.status.is_terminal() {
            None
        } else {
            eta_secs(record.file_size, record.transferred_bytes, record.transfer_speed)
        };
        TransferStats {
            id: record.id.clone(),
            user_id: record.user_id.clone(),
            source_account_id: record.source_account_id.clone(),
            destination_account_id: record.destination_account_id.clone(),
            source_path: record.source_path.clone(),
            destination_path: record.destination_path.clone(),
            file_name: record.file_name.clone(),
            status: record.status,
            progress: record.progress,
            file_size: record.file_size,
            transferred_bytes: record.transferred_bytes,
            transfer_speed: record.transfer_speed,
            error: record.error.clone(),
            created_at: record.created_at,
            started_at: record.started_at,
            completed_at: record.completed_at,
            elapsed_ms,
            eta_secs,
            version: 0,
        }
    }
}

pub fn elapsed_ms(
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Option<i64> {
    let started = started_at?;
    let end = completed_at.unwrap_or(now);
    Some((end - started).num_milliseconds().max(0))
}

pub fn eta_secs(file_size: u64, transferred: u64, speed: f64) -> Option<f64> {
    if speed > 0.0 {
        Some(file_size.saturating_sub(transferred) as f64 / speed)
    } else {
        None
    }
}

/// Emitted on every mutation of a live job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProgressEvent {
    pub job_id: String,
    pub status: JobStatus,
    pub progress: u8,
    pub transferred: u64,
    pub total: u64,
    pub speed: f64,
    pub error: Option<String>,
    pub version: u64,
}

/// Sizes of the dispatcher's queue and active set.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueStatus {
    pub active: usize,
    pub queued: usize,
    pub max_concurrent: usize,
    pub total: usize,
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn request(source_path: &str, file_name: Option<&str>) -> TransferRequest {
        TransferRequest {
            user_id: "u1".into(),
            source_account_id: "a".into(),
            destination_account_id: "b".into(),
            source_path: source_path.into(),
            destination_path: "/dest".into(),
            file_name: file_name.map(String::from),
        }
    }

    #[test]
    fn legal_lifecycle() {
        let now = Utc::now();
        let running = JobState::Queued.start(now).unwrap();
        assert_eq!(running.status(), JobStatus::Running);
        assert_eq!(running.started_at(), Some(now));

        let done = running.complete(now + Duration::seconds(2)).unwrap();
        assert_eq!(done.status(), JobStatus::Completed);
        assert_eq!(done.started_at(), Some(now));
        assert_eq!(done.completed_at(), Some(now + Duration::seconds(2)));
    }

    #[test]
    fn failure_keeps_message() {
        let now = Utc::now();
        let failed = JobState::Queued.start(now).unwrap().fail("NetworkError", now).unwrap();
        assert_eq!(failed.error(), Some("NetworkError"));
        assert!(failed.is_terminal());
    }

    #[test]
    fn queued_cannot_finish_without_running() {
        let now = Utc::now();
        assert!(JobState::Queued.complete(now).is_err());
        assert!(JobState::Queued.fail("x", now).is_err());
    }

    #[test]
    fn cancel_from_queued_and_running() {
        let now = Utc::now();
        let c = JobState::Queued.cancel(now).unwrap();
        assert_eq!(c.started_at(), None);

        let running = JobState::Queued.start(now).unwrap();
        let c = running.cancel(now).unwrap();
        assert_eq!(c.started_at(), Some(now));
        assert_eq!(c.status(), JobStatus::Cancelled);
    }

    #[test]
    fn terminal_states_never_move() {
        let now = Utc::now();
        let cancelled = JobState::Queued.cancel(now).unwrap();
        let err = cancelled.start(now).unwrap_err();
        assert_eq!(err, TransitionError { from: JobStatus::Cancelled, to: JobStatus::Running });
        assert!(cancelled.complete(now).is_err());
        assert!(cancelled.fail("late", now).is_err());
        assert!(cancelled.cancel(now).is_err());

        let completed = JobState::Queued.start(now).unwrap().complete(now).unwrap();
        assert!(completed.cancel(now).is_err());
        assert!(completed.fail("late", now).is_err());
    }

    #[test]
    fn status_serializes_as_its_str() {
        for s in [
            JobStatus::Queued,
            JobStatus::Running,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Cancelled,
        ] {
            assert_eq!(serde_json::to_value(s).unwrap(), s.as_str());
        }
    }

    #[test]
    fn older_updates_do_not_supersede() {
        let mut row = record();
        row.version = 4;

        let stale = TransferUpdate { status: Some(JobStatus::Running), version: Some(2), ..Default::default() };
        assert!(!stale.supersedes(&row));
        let same = TransferUpdate { version: Some(4), ..Default::default() };
        assert!(!same.supersedes(&row));
        let newer = TransferUpdate { version: Some(5), ..Default::default() };
        assert!(newer.supersedes(&row));
        assert!(TransferUpdate::cancelled(Utc::now()).supersedes(&row));

        newer.apply(&mut row);
        assert_eq!(row.version, 5);
    }

    #[test]
    fn file_name_defaults_to_last_component() {
        assert_eq!(request("/photos/2024/cat.jpg", None).resolved_file_name(), "cat.jpg");
        assert_eq!(request("/photos/2024/", None).resolved_file_name(), "2024");
        assert_eq!(request("report.pdf", None).resolved_file_name(), "report.pdf");
        assert_eq!(request("/a/b.txt", Some("renamed.txt")).resolved_file_name(), "renamed.txt");
        assert_eq!(request("/a/b.txt", Some("")).resolved_file_name(), "b.txt");
    }

    #[test]
    fn derived_timing() {
        let start = Utc::now();
        let end = start + Duration::milliseconds(1500);
        assert_eq!(elapsed_ms(Some(start), Some(end), end + Duration::seconds(10)), Some(1500));
        assert_eq!(elapsed_ms(None, None, end), None);
        assert_eq!(eta_secs(1000, 500, 100.0), Some(5.0));
        assert_eq!(eta_secs(1000, 500, 0.0), None);
    }

    fn record() -> TransferRecord {
        TransferRecord {
            id: "j1".into(),
            user_id: "u1".into(),
            source_account_id: "a".into(),
            destination_account_id: "b".into(),
            source_path: "/x".into(),
            destination_path: "/y".into(),
            file_name: "x".into(),
            status: JobStatus::Queued,
            progress: 0,
            file_size: 42,
            transferred_bytes: 0,
            transfer_speed: 0.0,
            error: None,
            priority: 0,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            version: 0,
        }
    }

    #[test]
    fn update_only_touches_set_fields() {
        let now = Utc::now();
        let mut record = record();

        TransferUpdate::cancelled(now).apply(&mut record);

        assert_eq!(record.status, JobStatus::Cancelled);
        assert_eq!(record.completed_at, Some(now));
        assert_eq!(record.file_size, 42);
        assert_eq!(record.error, None);
        assert_eq!(record.version, 0);
    }
}
