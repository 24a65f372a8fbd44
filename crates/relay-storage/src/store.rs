//! The persistence boundary used by the orchestrator and scheduler.

use relay_types::{EndpointRecord, Execution, TimeSlot, TransferTask, TransferredFile};

use crate::error::StorageError;

/// Task, endpoint and execution persistence.
///
/// Implementations must be safe to share across threads. Execution records
/// are written by the run that owns them and by `cancel`; the conditional
/// [`finish_execution`](TransferStore::finish_execution) decides which of
/// the two gets to set the terminal status.
pub trait TransferStore: Send + Sync {
    /// Insert or replace a task together with its time slots.
    fn put_task(&self, task: &TransferTask) -> Result<(), StorageError>;

    /// Load one task with its time slots attached.
    fn load_task(&self, task_id: &str) -> Result<Option<TransferTask>, StorageError>;

    /// Every task, active or not, ordered by id.
    fn load_tasks(&self) -> Result<Vec<TransferTask>, StorageError>;

    /// Active tasks only, ordered by id.
    fn load_active_tasks(&self) -> Result<Vec<TransferTask>, StorageError> {
        Ok(self
            .load_tasks()?
            .into_iter()
            .filter(|t| t.is_active)
            .collect())
    }

    /// Time slots of a task in time-of-day order.
    fn load_time_slots(&self, task_id: &str) -> Result<Vec<TimeSlot>, StorageError>;

    /// Flip the active flag. Returns false when the task does not exist.
    fn set_task_active(&self, task_id: &str, active: bool) -> Result<bool, StorageError>;

    fn put_endpoint(&self, endpoint: &EndpointRecord) -> Result<(), StorageError>;

    fn load_endpoint(&self, endpoint_id: &str) -> Result<Option<EndpointRecord>, StorageError>;

    /// Every endpoint, ordered by id.
    fn load_endpoints(&self) -> Result<Vec<EndpointRecord>, StorageError>;

    /// Persist a freshly started execution and index it under its task.
    fn create_execution(&self, execution: &Execution) -> Result<(), StorageError>;

    /// Overwrite an execution that is still in progress.
    ///
    /// Returns false, writing nothing, once the stored record is terminal.
    fn update_execution(&self, execution: &Execution) -> Result<bool, StorageError>;

    /// Atomically settle an execution.
    ///
    /// If the stored record is still in progress it is replaced by
    /// `execution` and `true` is returned. Otherwise the stored status, end
    /// time and message are kept, only the counters are copied over, and
    /// `false` is returned.
    fn finish_execution(&self, execution: &Execution) -> Result<bool, StorageError>;

    fn get_execution(&self, execution_id: &str) -> Result<Option<Execution>, StorageError>;

    /// Executions of a task, newest first.
    fn list_executions(&self, task_id: &str) -> Result<Vec<Execution>, StorageError>;

    /// Append one per-file outcome.
    fn append_transferred_file(&self, file: &TransferredFile) -> Result<(), StorageError>;

    /// Files recorded for an execution, in the order they were appended.
    fn list_transferred_files(&self, execution_id: &str) -> Result<Vec<TransferredFile>, StorageError>;
}

/// Merge a finishing execution into the stored one.
///
/// Shared by every store so the settle rule lives in one place.
pub(crate) fn settle(stored: &Execution, incoming: &Execution) -> (Execution, bool) {
    if stored.is_terminal() {
        let mut kept = stored.clone();
        kept.counts = incoming.counts;
        (kept, false)
    } else {
        (incoming.clone(), true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use relay_types::ExecutionStatus;

    #[test]
    fn test_settle_in_progress_takes_incoming() {
        let stored = Execution::start("t", Utc::now());
        let mut incoming = stored.clone();
        incoming.counts.files_transferred = 3;
        incoming.finish(ExecutionStatus::Completed, None, Utc::now());

        let (merged, won) = settle(&stored, &incoming);
        assert!(won);
        assert_eq!(merged.status, ExecutionStatus::Completed);
        assert_eq!(merged.counts.files_transferred, 3);
    }

    #[test]
    fn test_settle_terminal_keeps_status() {
        let mut stored = Execution::start("t", Utc::now());
        stored.finish(ExecutionStatus::Cancelled, None, Utc::now());
        let mut incoming = stored.clone();
        incoming.status = ExecutionStatus::Completed;
        incoming.counts.files_transferred = 2;
        incoming.counts.files_skipped = 1;

        let (merged, won) = settle(&stored, &incoming);
        assert!(!won);
        assert_eq!(merged.status, ExecutionStatus::Cancelled);
        assert_eq!(merged.end_time, stored.end_time);
        assert_eq!(merged.counts.files_skipped, 1);
    }
}
