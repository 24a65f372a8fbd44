//! RocksDB wrapper for file-relay storage.
//!
//! Provides:
//! - Database open with column family setup, read-write or read-only
//! - Atomic write batches (task + slots, execution + index)
//! - Prefix scans for slots, task history and file records
//! - The conditional execution settle used by cancellation

use std::path::Path;
use std::sync::{Mutex, PoisonError};

use rocksdb::{ColumnFamily, Direction, IteratorMode, Options, WriteBatch, DB};
use tracing::{debug, info};
use ulid::Generator;

use relay_types::{EndpointRecord, Execution, TimeSlot, TransferTask, TransferredFile};

use crate::column_families::{
    build_cf_descriptors, ALL_CF_NAMES, CF_ENDPOINTS, CF_EXECUTIONS, CF_TASKS,
    CF_TASK_EXECUTIONS, CF_TIME_SLOTS, CF_TRANSFERRED_FILES,
};
use crate::error::StorageError;
use crate::keys::{parse_execution_id, TaskExecutionKey, TimeSlotKey, TransferredFileKey};
use crate::store::{settle, TransferStore};

/// RocksDB-backed [`TransferStore`]
pub struct Storage {
    db: DB,
    /// Serializes read-modify-write sequences on execution and task records
    write_lock: Mutex<()>,
    /// Monotonic ids for file record keys, so append order survives same-millisecond writes
    file_keys: Mutex<Generator>,
}

impl Storage {
    /// Open storage at the given path, creating if necessary
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        info!("Opening storage at {:?}", path);

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_background_jobs(4);

        let db = DB::open_cf_descriptors(&db_opts, path, build_cf_descriptors())?;
        Ok(Self {
            db,
            write_lock: Mutex::new(()),
            file_keys: Mutex::new(Generator::new()),
        })
    }

    /// Open an existing database without taking the writer lock.
    ///
    /// Used by listing commands while the daemon owns the database.
    pub fn open_read_only(path: &Path) -> Result<Self, StorageError> {
        info!("Opening storage read-only at {:?}", path);

        let db = DB::open_cf_for_read_only(
            &Options::default(),
            path,
            ALL_CF_NAMES.iter().copied(),
            false,
        )?;
        Ok(Self {
            db,
            write_lock: Mutex::new(()),
            file_keys: Mutex::new(Generator::new()),
        })
    }

    /// Flush all column families to disk
    pub fn flush(&self) -> Result<(), StorageError> {
        for cf_name in ALL_CF_NAMES {
            let cf = self.cf(cf_name)?;
            self.db.flush_cf(cf)?;
        }
        Ok(())
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily, StorageError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StorageError::ColumnFamilyNotFound(name.to_string()))
    }

    /// All entries of a column family whose key starts with `prefix`
    fn scan_prefix(
        &self,
        cf_name: &str,
        prefix: &[u8],
    ) -> Result<Vec<(Box<[u8]>, Box<[u8]>)>, StorageError> {
        let cf = self.cf(cf_name)?;
        let mut results = Vec::new();
        for item in self
            .db
            .iterator_cf(cf, IteratorMode::From(prefix, Direction::Forward))
        {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            results.push((key, value));
        }
        Ok(results)
    }

    fn read_task(&self, task_id: &str) -> Result<Option<TransferTask>, StorageError> {
        let cf = self.cf(CF_TASKS)?;
        match self.db.get_cf(cf, task_id.as_bytes())? {
            Some(bytes) => Ok(Some(TransferTask::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    fn read_execution(&self, execution_id: &str) -> Result<Option<Execution>, StorageError> {
        let cf = self.cf(CF_EXECUTIONS)?;
        match self.db.get_cf(cf, execution_id.as_bytes())? {
            Some(bytes) => Ok(Some(Execution::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    fn write_execution(&self, execution: &Execution) -> Result<(), StorageError> {
        let cf = self.cf(CF_EXECUTIONS)?;
        self.db
            .put_cf(cf, execution.id.as_bytes(), execution.to_bytes()?)?;
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ()> {
        self.write_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl TransferStore for Storage {
    fn put_task(&self, task: &TransferTask) -> Result<(), StorageError> {
        let tasks_cf = self.cf(CF_TASKS)?;
        let slots_cf = self.cf(CF_TIME_SLOTS)?;

        let mut stored = task.clone();
        stored.time_slots.clear();

        let _guard = self.lock();
        let mut batch = WriteBatch::default();
        for (key, _) in self.scan_prefix(CF_TIME_SLOTS, &TimeSlotKey::prefix(&task.id))? {
            if TimeSlotKey::from_bytes(&key)?.task_id == task.id {
                batch.delete_cf(slots_cf, key);
            }
        }
        for slot in &task.time_slots {
            let key = TimeSlotKey::new(task.id.clone(), *slot);
            batch.put_cf(slots_cf, key.to_bytes(), serde_json::to_vec(slot)?);
        }
        batch.put_cf(tasks_cf, task.id.as_bytes(), stored.to_bytes()?);
        self.db.write(batch)?;

        debug!(task = %task.id, slots = task.time_slots.len(), "Stored task");
        Ok(())
    }

    fn load_task(&self, task_id: &str) -> Result<Option<TransferTask>, StorageError> {
        let Some(mut task) = self.read_task(task_id)? else {
            return Ok(None);
        };
        task.time_slots = self.load_time_slots(task_id)?;
        Ok(Some(task))
    }

    fn load_tasks(&self) -> Result<Vec<TransferTask>, StorageError> {
        let cf = self.cf(CF_TASKS)?;
        let mut tasks = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item?;
            let mut task = TransferTask::from_bytes(&value)?;
            task.time_slots = self.load_time_slots(&task.id)?;
            tasks.push(task);
        }
        Ok(tasks)
    }

    fn load_time_slots(&self, task_id: &str) -> Result<Vec<TimeSlot>, StorageError> {
        let mut slots = Vec::new();
        for (key, value) in self.scan_prefix(CF_TIME_SLOTS, &TimeSlotKey::prefix(task_id))? {
            // "slot:a:" also prefixes the slots of task "a:b"
            if TimeSlotKey::from_bytes(&key)?.task_id != task_id {
                continue;
            }
            slots.push(serde_json::from_slice(&value)?);
        }
        slots.sort();
        Ok(slots)
    }

    fn set_task_active(&self, task_id: &str, active: bool) -> Result<bool, StorageError> {
        let _guard = self.lock();
        let Some(mut task) = self.read_task(task_id)? else {
            return Ok(false);
        };
        task.is_active = active;
        let cf = self.cf(CF_TASKS)?;
        self.db.put_cf(cf, task_id.as_bytes(), task.to_bytes()?)?;
        debug!(task = %task_id, active, "Updated task active flag");
        Ok(true)
    }

    fn put_endpoint(&self, endpoint: &EndpointRecord) -> Result<(), StorageError> {
        let cf = self.cf(CF_ENDPOINTS)?;
        self.db
            .put_cf(cf, endpoint.id.as_bytes(), endpoint.to_bytes()?)?;
        Ok(())
    }

    fn load_endpoint(&self, endpoint_id: &str) -> Result<Option<EndpointRecord>, StorageError> {
        let cf = self.cf(CF_ENDPOINTS)?;
        match self.db.get_cf(cf, endpoint_id.as_bytes())? {
            Some(bytes) => Ok(Some(EndpointRecord::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    fn load_endpoints(&self) -> Result<Vec<EndpointRecord>, StorageError> {
        let cf = self.cf(CF_ENDPOINTS)?;
        let mut endpoints = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item?;
            endpoints.push(EndpointRecord::from_bytes(&value)?);
        }
        Ok(endpoints)
    }

    fn create_execution(&self, execution: &Execution) -> Result<(), StorageError> {
        let executions_cf = self.cf(CF_EXECUTIONS)?;
        let index_cf = self.cf(CF_TASK_EXECUTIONS)?;
        let index = TaskExecutionKey::new(
            execution.task_id.clone(),
            parse_execution_id(&execution.id)?,
        );

        let mut batch = WriteBatch::default();
        batch.put_cf(executions_cf, execution.id.as_bytes(), execution.to_bytes()?);
        batch.put_cf(index_cf, index.to_bytes(), []);
        self.db.write(batch)?;

        debug!(execution = %execution.id, task = %execution.task_id, "Created execution");
        Ok(())
    }

    fn update_execution(&self, execution: &Execution) -> Result<bool, StorageError> {
        let _guard = self.lock();
        let stored = self
            .read_execution(&execution.id)?
            .ok_or_else(|| StorageError::NotFound(format!("execution {}", execution.id)))?;
        if stored.is_terminal() {
            return Ok(false);
        }
        self.write_execution(execution)?;
        Ok(true)
    }

    fn finish_execution(&self, execution: &Execution) -> Result<bool, StorageError> {
        let _guard = self.lock();
        let stored = self
            .read_execution(&execution.id)?
            .ok_or_else(|| StorageError::NotFound(format!("execution {}", execution.id)))?;
        let (merged, won) = settle(&stored, execution);
        self.write_execution(&merged)?;
        debug!(
            execution = %execution.id,
            status = %merged.status,
            won,
            "Settled execution"
        );
        Ok(won)
    }

    fn get_execution(&self, execution_id: &str) -> Result<Option<Execution>, StorageError> {
        self.read_execution(execution_id)
    }

    fn list_executions(&self, task_id: &str) -> Result<Vec<Execution>, StorageError> {
        let mut executions = Vec::new();
        for (key, _) in self.scan_prefix(CF_TASK_EXECUTIONS, &TaskExecutionKey::prefix(task_id))? {
            let index = TaskExecutionKey::from_bytes(&key)?;
            if index.task_id != task_id {
                continue;
            }
            if let Some(execution) = self.read_execution(&index.execution_id.to_string())? {
                executions.push(execution);
            }
        }
        executions.sort_by(|a, b| (b.start_time, &b.id).cmp(&(a.start_time, &a.id)));
        Ok(executions)
    }

    fn append_transferred_file(&self, file: &TransferredFile) -> Result<(), StorageError> {
        let cf = self.cf(CF_TRANSFERRED_FILES)?;
        let ulid = self
            .file_keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .generate()
            .map_err(|e| StorageError::Key(format!("ULID generator exhausted: {}", e)))?;
        let key = TransferredFileKey::new(parse_execution_id(&file.execution_id)?, ulid);
        self.db.put_cf(cf, key.to_bytes(), file.to_bytes()?)?;
        Ok(())
    }

    fn list_transferred_files(&self, execution_id: &str) -> Result<Vec<TransferredFile>, StorageError> {
        let prefix = TransferredFileKey::prefix(&parse_execution_id(execution_id)?);
        self.scan_prefix(CF_TRANSFERRED_FILES, &prefix)?
            .into_iter()
            .map(|(_, value)| TransferredFile::from_bytes(&value).map_err(StorageError::from))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use relay_types::{ExecutionStatus, ScheduleKind};
    use tempfile::TempDir;

    fn create_test_storage() -> (Storage, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let storage = Storage::open(temp_dir.path()).unwrap();
        (storage, temp_dir)
    }

    fn daily_task(id: &str) -> TransferTask {
        TransferTask::new(id, "Daily", "src", "dst", ScheduleKind::Daily).with_time_slots([
            TimeSlot::hms(18, 0, 0).unwrap(),
            TimeSlot::hms(6, 30, 0).unwrap(),
        ])
    }

    #[test]
    fn test_storage_open() {
        let (_storage, _temp) = create_test_storage();
    }

    #[test]
    fn test_task_roundtrip_with_slots() {
        let (storage, _temp) = create_test_storage();
        let task = daily_task("reports");
        storage.put_task(&task).unwrap();

        let loaded = storage.load_task("reports").unwrap().unwrap();
        assert_eq!(loaded, task);
        assert_eq!(
            storage.load_time_slots("reports").unwrap(),
            vec![TimeSlot::hms(6, 30, 0).unwrap(), TimeSlot::hms(18, 0, 0).unwrap()]
        );
        assert!(storage.load_task("missing").unwrap().is_none());
    }

    #[test]
    fn test_put_task_replaces_slots() {
        let (storage, _temp) = create_test_storage();
        storage.put_task(&daily_task("t")).unwrap();

        let replaced = daily_task("t").with_time_slots([TimeSlot::hms(12, 0, 0).unwrap()]);
        storage.put_task(&replaced).unwrap();

        assert_eq!(
            storage.load_time_slots("t").unwrap(),
            vec![TimeSlot::hms(12, 0, 0).unwrap()]
        );
    }

    #[test]
    fn test_slots_do_not_leak_between_prefixed_ids() {
        let (storage, _temp) = create_test_storage();
        storage.put_task(&daily_task("a")).unwrap();
        storage
            .put_task(&daily_task("a:b").with_time_slots([TimeSlot::hms(1, 0, 0).unwrap()]))
            .unwrap();

        assert_eq!(storage.load_time_slots("a").unwrap().len(), 2);
        assert_eq!(storage.load_time_slots("a:b").unwrap().len(), 1);
    }

    #[test]
    fn test_active_tasks_filter() {
        let (storage, _temp) = create_test_storage();
        storage.put_task(&daily_task("on")).unwrap();
        storage.put_task(&daily_task("off")).unwrap();
        assert!(storage.set_task_active("off", false).unwrap());
        assert!(!storage.set_task_active("ghost", false).unwrap());

        let active: Vec<String> = storage
            .load_active_tasks()
            .unwrap()
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(active, vec!["on".to_string()]);
        assert_eq!(storage.load_tasks().unwrap().len(), 2);
    }

    #[test]
    fn test_endpoint_roundtrip() {
        let (storage, _temp) = create_test_storage();
        let endpoint = EndpointRecord::new("ftp-1", "Partner FTP", "FTP", "ftp.example.com")
            .with_login("relay", "hunter2");
        storage.put_endpoint(&endpoint).unwrap();

        assert_eq!(storage.load_endpoint("ftp-1").unwrap(), Some(endpoint));
        assert!(storage.load_endpoint("nope").unwrap().is_none());
        assert_eq!(storage.load_endpoints().unwrap().len(), 1);
    }

    #[test]
    fn test_execution_lifecycle() {
        let (storage, _temp) = create_test_storage();
        let mut exec = Execution::start("t", Utc::now());
        storage.create_execution(&exec).unwrap();

        exec.counts.files_discovered = 5;
        assert!(storage.update_execution(&exec).unwrap());

        exec.counts.files_transferred = 5;
        exec.finish(ExecutionStatus::Completed, None, Utc::now());
        assert!(storage.finish_execution(&exec).unwrap());

        let stored = storage.get_execution(&exec.id).unwrap().unwrap();
        assert_eq!(stored.status, ExecutionStatus::Completed);
        assert_eq!(stored.counts.files_transferred, 5);

        // Terminal records no longer accept progress updates
        assert!(!storage.update_execution(&exec).unwrap());
    }

    #[test]
    fn test_finish_after_cancel_keeps_cancelled() {
        let (storage, _temp) = create_test_storage();
        let exec = Execution::start("t", Utc::now());
        storage.create_execution(&exec).unwrap();

        let mut cancelled = exec.clone();
        cancelled.finish(ExecutionStatus::Cancelled, None, Utc::now());
        assert!(storage.finish_execution(&cancelled).unwrap());

        let mut completed = exec.clone();
        completed.counts.files_transferred = 1;
        completed.counts.files_skipped = 2;
        completed.finish(ExecutionStatus::Completed, None, Utc::now());
        assert!(!storage.finish_execution(&completed).unwrap());

        let stored = storage.get_execution(&exec.id).unwrap().unwrap();
        assert_eq!(stored.status, ExecutionStatus::Cancelled);
        assert_eq!(stored.counts.files_skipped, 2);
    }

    #[test]
    fn test_finish_unknown_execution() {
        let (storage, _temp) = create_test_storage();
        let exec = Execution::start("t", Utc::now());
        assert!(matches!(
            storage.finish_execution(&exec),
            Err(StorageError::NotFound(_))
        ));
    }

    #[test]
    fn test_list_executions_newest_first() {
        let (storage, _temp) = create_test_storage();
        let mut ids = Vec::new();
        for _ in 0..3 {
            let exec = Execution::start("t", Utc::now());
            storage.create_execution(&exec).unwrap();
            ids.push(exec.id);
            std::thread::sleep(std::time::Duration::from_millis(2));
        }
        storage
            .create_execution(&Execution::start("other", Utc::now()))
            .unwrap();

        let listed: Vec<String> = storage
            .list_executions("t")
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();
        ids.reverse();
        assert_eq!(listed, ids);
    }

    #[test]
    fn test_transferred_files_in_append_order() {
        let (storage, _temp) = create_test_storage();
        let exec = Execution::start("t", Utc::now());
        storage.create_execution(&exec).unwrap();

        for name in ["a.csv", "b.csv", "c.csv"] {
            let file = TransferredFile::new(&exec.id, name, format!("/in/{name}"), format!("/out/{name}"))
                .succeeded(Utc::now());
            storage.append_transferred_file(&file).unwrap();
            std::thread::sleep(std::time::Duration::from_millis(2));
        }

        let names: Vec<String> = storage
            .list_transferred_files(&exec.id)
            .unwrap()
            .into_iter()
            .map(|f| f.file_name)
            .collect();
        assert_eq!(names, vec!["a.csv", "b.csv", "c.csv"]);
    }

    #[test]
    fn test_reopen_and_read_only() {
        let temp_dir = TempDir::new().unwrap();
        let exec = Execution::start("t", Utc::now());
        {
            let storage = Storage::open(temp_dir.path()).unwrap();
            storage.put_task(&daily_task("t")).unwrap();
            storage.create_execution(&exec).unwrap();
            storage.flush().unwrap();
        }

        let reader = Storage::open_read_only(temp_dir.path()).unwrap();
        assert!(reader.load_task("t").unwrap().is_some());
        assert_eq!(reader.list_executions("t").unwrap().len(), 1);
    }
}
