//! Overlap policy for tasks whose previous run is still in flight.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::registry::DispatchRegistry;

/// Policy for handling a task that comes due while it is still running.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverlapPolicy {
    /// Start another run alongside the one in flight
    #[default]
    Concurrent,
    /// Do not start a run while one is in flight for the same task
    Skip,
}

/// Marks one dispatched run as in flight.
///
/// Dropping the guard releases the task's slot in the registry, whether
/// the run completed, failed or panicked.
pub struct RunGuard {
    registry: Arc<DispatchRegistry>,
    task_id: String,
}

impl RunGuard {
    pub(crate) fn new(registry: Arc<DispatchRegistry>, task_id: String) -> Self {
        Self { registry, task_id }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.registry.release(&self.task_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_overlap_policy_default() {
        assert_eq!(OverlapPolicy::default(), OverlapPolicy::Concurrent);
    }

    #[test]
    fn test_overlap_policy_serialization() {
        assert_eq!(
            serde_json::to_string(&OverlapPolicy::Skip).unwrap(),
            "\"skip\""
        );
        let policy: OverlapPolicy = serde_json::from_str("\"concurrent\"").unwrap();
        assert_eq!(policy, OverlapPolicy::Concurrent);
    }

    #[test]
    fn test_run_guard_releases_on_drop() {
        let registry = Arc::new(DispatchRegistry::new());
        {
            let guard = registry
                .try_begin("t1", OverlapPolicy::Skip, Utc::now())
                .unwrap();
            assert_eq!(guard.task_id(), "t1");
            assert!(registry.is_running("t1"));
        }
        assert!(!registry.is_running("t1"));
        assert_eq!(registry.running_count(), 0);
    }
}
