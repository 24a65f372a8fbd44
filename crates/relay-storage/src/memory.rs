//! In-process store for tests and dry runs.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use relay_types::{EndpointRecord, Execution, TimeSlot, TransferTask, TransferredFile};

use crate::error::StorageError;
use crate::store::{settle, TransferStore};

#[derive(Default)]
struct MemoryState {
    tasks: BTreeMap<String, TransferTask>,
    endpoints: BTreeMap<String, EndpointRecord>,
    executions: BTreeMap<String, Execution>,
    files: Vec<TransferredFile>,
}

/// [`TransferStore`] held entirely in memory.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read<T>(&self, f: impl FnOnce(&MemoryState) -> T) -> T {
        f(&self.state.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn write<T>(&self, f: impl FnOnce(&mut MemoryState) -> T) -> T {
        f(&mut self.state.write().unwrap_or_else(PoisonError::into_inner))
    }
}

impl TransferStore for MemoryStore {
    fn put_task(&self, task: &TransferTask) -> Result<(), StorageError> {
        let mut task = task.clone();
        task.normalize_time_slots();
        self.write(|s| s.tasks.insert(task.id.clone(), task));
        Ok(())
    }

    fn load_task(&self, task_id: &str) -> Result<Option<TransferTask>, StorageError> {
        Ok(self.read(|s| s.tasks.get(task_id).cloned()))
    }

    fn load_tasks(&self) -> Result<Vec<TransferTask>, StorageError> {
        Ok(self.read(|s| s.tasks.values().cloned().collect()))
    }

    fn load_time_slots(&self, task_id: &str) -> Result<Vec<TimeSlot>, StorageError> {
        Ok(self.read(|s| {
            s.tasks
                .get(task_id)
                .map(|t| t.time_slots.clone())
                .unwrap_or_default()
        }))
    }

    fn set_task_active(&self, task_id: &str, active: bool) -> Result<bool, StorageError> {
        Ok(self.write(|s| match s.tasks.get_mut(task_id) {
            Some(task) => {
                task.is_active = active;
                true
            }
            None => false,
        }))
    }

    fn put_endpoint(&self, endpoint: &EndpointRecord) -> Result<(), StorageError> {
        self.write(|s| s.endpoints.insert(endpoint.id.clone(), endpoint.clone()));
        Ok(())
    }

    fn load_endpoint(&self, endpoint_id: &str) -> Result<Option<EndpointRecord>, StorageError> {
        Ok(self.read(|s| s.endpoints.get(endpoint_id).cloned()))
    }

    fn load_endpoints(&self) -> Result<Vec<EndpointRecord>, StorageError> {
        Ok(self.read(|s| s.endpoints.values().cloned().collect()))
    }

    fn create_execution(&self, execution: &Execution) -> Result<(), StorageError> {
        self.write(|s| s.executions.insert(execution.id.clone(), execution.clone()));
        Ok(())
    }

    fn update_execution(&self, execution: &Execution) -> Result<bool, StorageError> {
        self.write(|s| {
            let stored = s
                .executions
                .get_mut(&execution.id)
                .ok_or_else(|| StorageError::NotFound(format!("execution {}", execution.id)))?;
            if stored.is_terminal() {
                return Ok(false);
            }
            *stored = execution.clone();
            Ok(true)
        })
    }

    fn finish_execution(&self, execution: &Execution) -> Result<bool, StorageError> {
        self.write(|s| {
            let stored = s
                .executions
                .get_mut(&execution.id)
                .ok_or_else(|| StorageError::NotFound(format!("execution {}", execution.id)))?;
            let (merged, won) = settle(stored, execution);
            *stored = merged;
            Ok(won)
        })
    }

    fn get_execution(&self, execution_id: &str) -> Result<Option<Execution>, StorageError> {
        Ok(self.read(|s| s.executions.get(execution_id).cloned()))
    }

    fn list_executions(&self, task_id: &str) -> Result<Vec<Execution>, StorageError> {
        let mut executions: Vec<Execution> = self.read(|s| {
            s.executions
                .values()
                .filter(|e| e.task_id == task_id)
                .cloned()
                .collect()
        });
        executions.sort_by(|a, b| (b.start_time, &b.id).cmp(&(a.start_time, &a.id)));
        Ok(executions)
    }

    fn append_transferred_file(&self, file: &TransferredFile) -> Result<(), StorageError> {
        self.write(|s| s.files.push(file.clone()));
        Ok(())
    }

    fn list_transferred_files(&self, execution_id: &str) -> Result<Vec<TransferredFile>, StorageError> {
        Ok(self.read(|s| {
            s.files
                .iter()
                .filter(|f| f.execution_id == execution_id)
                .cloned()
                .collect()
        }))
    }
}
