//! Execution history records.
//!
//! An [`Execution`] is created `InProgress` when a task starts running and
//! leaves that state exactly once. [`TransferredFile`] records are appended,
//! one per attempted file, and never modified.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Lifecycle state of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    InProgress,
    Completed,
    Error,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionStatus::InProgress)
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionStatus::InProgress => write!(f, "in_progress"),
            ExecutionStatus::Completed => write!(f, "completed"),
            ExecutionStatus::Error => write!(f, "error"),
            ExecutionStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Per-run file counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionCounts {
    /// Files that passed the filter
    pub files_discovered: u32,
    /// Files moved successfully
    pub files_transferred: u32,
    /// Discovered files not attempted because the run was cancelled
    pub files_skipped: u32,
    /// Files whose transfer failed
    pub error_count: u32,
}

/// One run of a transfer task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    /// Unique identifier (ULID string)
    pub id: String,

    pub task_id: String,

    pub start_time: DateTime<Utc>,

    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,

    pub status: ExecutionStatus,

    #[serde(default)]
    pub error_message: Option<String>,

    #[serde(flatten)]
    pub counts: ExecutionCounts,
}

impl Execution {
    /// Start a new in-progress execution.
    pub fn start(task_id: impl Into<String>, start_time: DateTime<Utc>) -> Self {
        Self {
            id: Ulid::new().to_string(),
            task_id: task_id.into(),
            start_time,
            end_time: None,
            status: ExecutionStatus::InProgress,
            error_message: None,
            counts: ExecutionCounts::default(),
        }
    }

    /// Move to a terminal state.
    ///
    /// Returns false, leaving the record untouched, when the execution
    /// already left `InProgress` or `status` is not terminal.
    pub fn finish(
        &mut self,
        status: ExecutionStatus,
        error_message: Option<String>,
        at: DateTime<Utc>,
    ) -> bool {
        if self.status.is_terminal() || !status.is_terminal() {
            return false;
        }
        self.status = status;
        self.error_message = error_message;
        self.end_time = Some(at);
        true
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Serialize to JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Outcome of one attempted file move.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferredFile {
    /// Unique identifier (ULID string, ordered by creation)
    pub id: String,

    pub execution_id: String,

    pub file_name: String,

    pub source_path: String,

    pub destination_path: String,

    /// Bytes downloaded; 0 when the download itself failed
    pub size: u64,

    pub success: bool,

    #[serde(default)]
    pub error_message: Option<String>,

    pub recorded_at: DateTime<Utc>,
}

impl TransferredFile {
    /// A pending record; mark the outcome with [`succeeded`](Self::succeeded)
    /// or [`failed`](Self::failed).
    pub fn new(
        execution_id: impl Into<String>,
        file_name: impl Into<String>,
        source_path: impl Into<String>,
        destination_path: impl Into<String>,
    ) -> Self {
        Self {
            id: Ulid::new().to_string(),
            execution_id: execution_id.into(),
            file_name: file_name.into(),
            source_path: source_path.into(),
            destination_path: destination_path.into(),
            size: 0,
            success: false,
            error_message: None,
            recorded_at: Utc::now(),
        }
    }

    pub fn succeeded(mut self, at: DateTime<Utc>) -> Self {
        self.success = true;
        self.error_message = None;
        self.recorded_at = at;
        self
    }

    pub fn failed(mut self, message: impl Into<String>, at: DateTime<Utc>) -> Self {
        self.success = false;
        self.error_message = Some(message.into());
        self.recorded_at = at;
        self
    }

    /// Serialize to JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_starts_in_progress() {
        let exec = Execution::start("task-1", Utc::now());
        assert_eq!(exec.status, ExecutionStatus::InProgress);
        assert!(exec.end_time.is_none());
        assert_eq!(exec.counts, ExecutionCounts::default());
        assert!(Ulid::from_string(&exec.id).is_ok());
    }

    #[test]
    fn test_execution_finishes_once() {
        let mut exec = Execution::start("task-1", Utc::now());
        let end = Utc::now();

        assert!(exec.finish(ExecutionStatus::Cancelled, None, end));
        assert_eq!(exec.status, ExecutionStatus::Cancelled);
        assert_eq!(exec.end_time, Some(end));

        assert!(!exec.finish(
            ExecutionStatus::Error,
            Some("late failure".to_string()),
            Utc::now()
        ));
        assert_eq!(exec.status, ExecutionStatus::Cancelled);
        assert!(exec.error_message.is_none());
    }

    #[test]
    fn test_finish_requires_terminal_status() {
        let mut exec = Execution::start("task-1", Utc::now());
        assert!(!exec.finish(ExecutionStatus::InProgress, None, Utc::now()));
        assert!(exec.end_time.is_none());
    }

    #[test]
    fn test_execution_serialization_flattens_counts() {
        let mut exec = Execution::start("task-1", Utc::now());
        exec.counts.files_transferred = 4;
        exec.counts.error_count = 1;

        let json: serde_json::Value = serde_json::from_slice(&exec.to_bytes().unwrap()).unwrap();
        assert_eq!(json["files_transferred"], 4);
        assert_eq!(json["status"], "in_progress");

        let decoded = Execution::from_bytes(&exec.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, exec);
    }

    #[test]
    fn test_transferred_file_outcomes() {
        let now = Utc::now();
        let ok = TransferredFile::new("exec", "a.csv", "/out/a.csv", "/in/a.csv").succeeded(now);
        assert!(ok.success);

        let failed = TransferredFile::new("exec", "b.csv", "/out/b.csv", "/in/b.csv")
            .failed("upload refused", now);
        assert!(!failed.success);
        assert_eq!(failed.error_message.as_deref(), Some("upload refused"));
    }
}
