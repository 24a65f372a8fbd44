//! Dispatch bookkeeping shared by the tick and the runs it spawns.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Notify;

use relay_types::{Execution, ExecutionStatus};

use crate::overlap::{OverlapPolicy, RunGuard};

/// What the scheduler knows about one task's runs since startup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TaskRunStatus {
    pub task_id: String,
    /// Runs currently in flight
    pub running: u32,
    pub last_dispatched: Option<DateTime<Utc>>,
    pub last_execution_id: Option<String>,
    pub last_status: Option<ExecutionStatus>,
    pub last_error: Option<String>,
    pub dispatch_count: u64,
    pub failure_count: u64,
    /// Times the task was due but not dispatched because of the overlap policy
    pub skip_count: u64,
}

impl TaskRunStatus {
    fn new(task_id: &str) -> Self {
        Self {
            task_id: task_id.to_string(),
            ..Default::default()
        }
    }
}

/// Thread-safe record of dispatched runs, keyed by task id.
#[derive(Default)]
pub struct DispatchRegistry {
    tasks: RwLock<HashMap<String, TaskRunStatus>>,
    idle: Notify,
}

impl DispatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_status<T>(&self, task_id: &str, f: impl FnOnce(&mut TaskRunStatus) -> T) -> T {
        let mut tasks = self.tasks.write().unwrap_or_else(PoisonError::into_inner);
        let status = tasks
            .entry(task_id.to_string())
            .or_insert_with(|| TaskRunStatus::new(task_id));
        f(status)
    }

    /// Claim a run slot for a task.
    ///
    /// Under [`OverlapPolicy::Skip`] this returns `None` while another run of
    /// the same task is in flight, and counts the skip.
    pub fn try_begin(
        self: &Arc<Self>,
        task_id: &str,
        policy: OverlapPolicy,
        now: DateTime<Utc>,
    ) -> Option<RunGuard> {
        let claimed = self.with_status(task_id, |status| {
            if policy == OverlapPolicy::Skip && status.running > 0 {
                status.skip_count += 1;
                return false;
            }
            status.running += 1;
            status.dispatch_count += 1;
            status.last_dispatched = Some(now);
            true
        });
        claimed.then(|| RunGuard::new(Arc::clone(self), task_id.to_string()))
    }

    pub(crate) fn release(&self, task_id: &str) {
        let total = {
            let mut tasks = self.tasks.write().unwrap_or_else(PoisonError::into_inner);
            if let Some(status) = tasks.get_mut(task_id) {
                status.running = status.running.saturating_sub(1);
            }
            tasks.values().map(|s| s.running as usize).sum::<usize>()
        };
        if total == 0 {
            self.idle.notify_waiters();
        }
    }

    /// Record the execution a run produced.
    pub fn record_execution(&self, task_id: &str, execution: &Execution) {
        self.with_status(task_id, |status| {
            status.last_execution_id = Some(execution.id.clone());
            status.last_status = Some(execution.status);
            status.last_error = execution.error_message.clone();
            if execution.status == ExecutionStatus::Error {
                status.failure_count += 1;
            }
        });
    }

    /// Record a run that ended without an execution record to show for it.
    pub fn record_failure(&self, task_id: &str, error: impl Into<String>) {
        self.with_status(task_id, |status| {
            status.last_status = Some(ExecutionStatus::Error);
            status.last_error = Some(error.into());
            status.failure_count += 1;
        });
    }

    pub fn get_status(&self, task_id: &str) -> Option<TaskRunStatus> {
        self.tasks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(task_id)
            .cloned()
    }

    /// Status of every task seen so far, ordered by task id.
    pub fn get_all_status(&self) -> Vec<TaskRunStatus> {
        let mut all: Vec<TaskRunStatus> = self
            .tasks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        all.sort_by(|a, b| a.task_id.cmp(&b.task_id));
        all
    }

    pub fn is_running(&self, task_id: &str) -> bool {
        self.get_status(task_id).is_some_and(|s| s.running > 0)
    }

    /// Runs in flight across all tasks.
    pub fn running_count(&self) -> usize {
        self.tasks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|s| s.running as usize)
            .sum()
    }

    /// Wait until no run is in flight. Returns false on timeout.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, async {
            loop {
                let notified = self.idle.notified();
                if self.running_count() == 0 {
                    return;
                }
                notified.await;
            }
        })
        .await
        .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_concurrent_policy_allows_overlap() {
        let registry = Arc::new(DispatchRegistry::new());
        let now = Utc::now();
        let a = registry.try_begin("t1", OverlapPolicy::Concurrent, now);
        let b = registry.try_begin("t1", OverlapPolicy::Concurrent, now);
        assert!(a.is_some() && b.is_some());
        assert_eq!(registry.running_count(), 2);

        let status = registry.get_status("t1").unwrap();
        assert_eq!(status.running, 2);
        assert_eq!(status.dispatch_count, 2);
        assert_eq!(status.last_dispatched, Some(now));
    }

    #[test]
    fn test_registry_skip_policy_blocks_overlap() {
        let registry = Arc::new(DispatchRegistry::new());
        let now = Utc::now();
        let first = registry.try_begin("t1", OverlapPolicy::Skip, now);
        assert!(first.is_some());
        assert!(registry.try_begin("t1", OverlapPolicy::Skip, now).is_none());
        assert!(registry.try_begin("t2", OverlapPolicy::Skip, now).is_some());
        assert_eq!(registry.get_status("t1").unwrap().skip_count, 1);

        drop(first);
        assert!(registry.try_begin("t1", OverlapPolicy::Skip, now).is_some());
    }

    #[test]
    fn test_registry_record_outcomes() {
        let registry = DispatchRegistry::new();
        let mut exec = Execution::start("t1", Utc::now());
        exec.finish(ExecutionStatus::Error, Some("boom".into()), Utc::now());
        registry.record_execution("t1", &exec);

        let status = registry.get_status("t1").unwrap();
        assert_eq!(status.last_execution_id, Some(exec.id.clone()));
        assert_eq!(status.last_status, Some(ExecutionStatus::Error));
        assert_eq!(status.failure_count, 1);

        registry.record_failure("t1", "panicked");
        let status = registry.get_status("t1").unwrap();
        assert_eq!(status.failure_count, 2);
        assert_eq!(status.last_error.as_deref(), Some("panicked"));
    }

    #[test]
    fn test_registry_unknown_task() {
        let registry = DispatchRegistry::new();
        assert!(registry.get_status("nope").is_none());
        assert!(!registry.is_running("nope"));
        assert!(registry.get_all_status().is_empty());
    }

    #[tokio::test]
    async fn test_wait_idle() {
        let registry = Arc::new(DispatchRegistry::new());
        assert!(registry.wait_idle(Duration::from_millis(10)).await);

        let guard = registry
            .try_begin("t1", OverlapPolicy::Concurrent, Utc::now())
            .unwrap();
        assert!(!registry.wait_idle(Duration::from_millis(20)).await);

        let waiter = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.wait_idle(Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        drop(guard);
        assert!(waiter.await.unwrap());
    }
}
