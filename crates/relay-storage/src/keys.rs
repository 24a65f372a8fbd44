//! Key encoding and decoding for storage layer.
//!
//! Key formats:
//! - time slots: `slot:{task_id}:{HHMMSS}`
//! - task index: `texec:{task_id}:{execution_id}`
//! - file records: `file:{execution_id}:{ulid}`
//!
//! Task ids are caller supplied and may themselves contain `:`, so keys are
//! split from the right and prefix scans re-check the decoded task id.

use chrono::{NaiveTime, Timelike};
use ulid::Ulid;

use relay_types::TimeSlot;

use crate::error::StorageError;

fn utf8(bytes: &[u8]) -> Result<&str, StorageError> {
    std::str::from_utf8(bytes).map_err(|e| StorageError::Key(format!("Invalid UTF-8: {}", e)))
}

/// Key for one time slot of a task
/// Format: slot:{task_id}:{HHMMSS}
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeSlotKey {
    pub task_id: String,
    pub slot: TimeSlot,
}

impl TimeSlotKey {
    pub fn new(task_id: impl Into<String>, slot: TimeSlot) -> Self {
        Self {
            task_id: task_id.into(),
            slot,
        }
    }

    /// Scan prefix for every slot of a task
    pub fn prefix(task_id: &str) -> Vec<u8> {
        format!("slot:{}:", task_id).into_bytes()
    }

    /// Encode key to bytes; HHMMSS keeps slots in time-of-day order
    pub fn to_bytes(&self) -> Vec<u8> {
        let t = self.slot.time();
        format!(
            "slot:{}:{:02}{:02}{:02}",
            self.task_id,
            t.hour(),
            t.minute(),
            t.second()
        )
        .into_bytes()
    }

    /// Decode key from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StorageError> {
        let s = utf8(bytes)?;
        let rest = s
            .strip_prefix("slot:")
            .ok_or_else(|| StorageError::Key(format!("Invalid time slot key format: {}", s)))?;
        let (task_id, hms) = rest
            .rsplit_once(':')
            .ok_or_else(|| StorageError::Key(format!("Invalid time slot key format: {}", s)))?;
        let time = NaiveTime::parse_from_str(hms, "%H%M%S")
            .map_err(|e| StorageError::Key(format!("Invalid slot time {}: {}", hms, e)))?;
        Ok(Self::new(task_id, TimeSlot(time)))
    }
}

/// Index entry linking a task to one of its executions
/// Format: texec:{task_id}:{execution_id}
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskExecutionKey {
    pub task_id: String,
    pub execution_id: Ulid,
}

impl TaskExecutionKey {
    pub fn new(task_id: impl Into<String>, execution_id: Ulid) -> Self {
        Self {
            task_id: task_id.into(),
            execution_id,
        }
    }

    pub fn prefix(task_id: &str) -> Vec<u8> {
        format!("texec:{}:", task_id).into_bytes()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        format!("texec:{}:{}", self.task_id, self.execution_id).into_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StorageError> {
        let s = utf8(bytes)?;
        let rest = s
            .strip_prefix("texec:")
            .ok_or_else(|| StorageError::Key(format!("Invalid task execution key: {}", s)))?;
        let (task_id, id) = rest
            .rsplit_once(':')
            .ok_or_else(|| StorageError::Key(format!("Invalid task execution key: {}", s)))?;
        let execution_id: Ulid = id
            .parse()
            .map_err(|e| StorageError::Key(format!("Invalid ULID: {}", e)))?;
        Ok(Self::new(task_id, execution_id))
    }
}

/// Key for one transferred file record
/// Format: file:{execution_id}:{ulid}
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferredFileKey {
    pub execution_id: Ulid,
    pub ulid: Ulid,
}

impl TransferredFileKey {
    pub fn new(execution_id: Ulid, ulid: Ulid) -> Self {
        Self { execution_id, ulid }
    }

    pub fn prefix(execution_id: &Ulid) -> Vec<u8> {
        format!("file:{}:", execution_id).into_bytes()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        format!("file:{}:{}", self.execution_id, self.ulid).into_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StorageError> {
        let s = utf8(bytes)?;
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 3 || parts[0] != "file" {
            return Err(StorageError::Key(format!("Invalid file key format: {}", s)));
        }
        let execution_id: Ulid = parts[1]
            .parse()
            .map_err(|e| StorageError::Key(format!("Invalid execution ULID: {}", e)))?;
        let ulid: Ulid = parts[2]
            .parse()
            .map_err(|e| StorageError::Key(format!("Invalid ULID: {}", e)))?;
        Ok(Self { execution_id, ulid })
    }
}

/// Parse an execution id string into its ULID.
pub fn parse_execution_id(id: &str) -> Result<Ulid, StorageError> {
    id.parse()
        .map_err(|e| StorageError::Key(format!("Invalid execution id {}: {}", id, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_slot_key_roundtrip() {
        let key = TimeSlotKey::new("nightly", TimeSlot::hms(2, 5, 9).unwrap());
        let bytes = key.to_bytes();
        assert_eq!(bytes, b"slot:nightly:020509".to_vec());
        assert_eq!(TimeSlotKey::from_bytes(&bytes).unwrap(), key);
    }

    #[test]
    fn test_time_slot_keys_sort_by_time() {
        let early = TimeSlotKey::new("t", TimeSlot::hms(9, 0, 0).unwrap()).to_bytes();
        let late = TimeSlotKey::new("t", TimeSlot::hms(17, 30, 0).unwrap()).to_bytes();
        assert!(early < late);
    }

    #[test]
    fn test_task_id_with_colon() {
        let exec = Ulid::new();
        let key = TaskExecutionKey::new("team:reports", exec);
        let decoded = TaskExecutionKey::from_bytes(&key.to_bytes()).unwrap();
        assert_eq!(decoded.task_id, "team:reports");
        assert_eq!(decoded.execution_id, exec);

        let slot = TimeSlotKey::new("a:b", TimeSlot::hms(1, 2, 3).unwrap());
        assert_eq!(TimeSlotKey::from_bytes(&slot.to_bytes()).unwrap(), slot);
    }

    #[test]
    fn test_transferred_file_key() {
        let key = TransferredFileKey::new(Ulid::new(), Ulid::new());
        let decoded = TransferredFileKey::from_bytes(&key.to_bytes()).unwrap();
        assert_eq!(decoded, key);
        assert!(key.to_bytes().starts_with(&TransferredFileKey::prefix(&key.execution_id)));
    }

    #[test]
    fn test_invalid_keys() {
        assert!(TimeSlotKey::from_bytes(b"slot:t:25xx00").is_err());
        assert!(TaskExecutionKey::from_bytes(b"texec:t:not-a-ulid").is_err());
        assert!(TransferredFileKey::from_bytes(b"evt:1:2").is_err());
        assert!(parse_execution_id("nope").is_err());
    }
}
