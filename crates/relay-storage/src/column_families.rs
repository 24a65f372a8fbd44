//! Column family definitions for RocksDB.
//!
//! - tasks: Task definitions without their time slots
//! - time_slots: One entry per task time slot, ordered by time of day
//! - endpoints: Endpoint records
//! - executions: Execution records keyed by ULID
//! - task_executions: Index from task to its executions
//! - transferred_files: Append-only per-file outcomes (compressed)

use rocksdb::{ColumnFamilyDescriptor, Options};

/// Column family name for task definitions
pub const CF_TASKS: &str = "tasks";

/// Column family name for task time slots
pub const CF_TIME_SLOTS: &str = "time_slots";

/// Column family name for endpoint records
pub const CF_ENDPOINTS: &str = "endpoints";

/// Column family name for execution records
pub const CF_EXECUTIONS: &str = "executions";

/// Column family name for the task -> execution index
pub const CF_TASK_EXECUTIONS: &str = "task_executions";

/// Column family name for transferred file records
pub const CF_TRANSFERRED_FILES: &str = "transferred_files";

/// All column family names
pub const ALL_CF_NAMES: &[&str] = &[
    CF_TASKS,
    CF_TIME_SLOTS,
    CF_ENDPOINTS,
    CF_EXECUTIONS,
    CF_TASK_EXECUTIONS,
    CF_TRANSFERRED_FILES,
];

/// Append-only history, compressed
fn history_options() -> Options {
    let mut opts = Options::default();
    opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
    opts
}

/// Build all column family descriptors
pub fn build_cf_descriptors() -> Vec<ColumnFamilyDescriptor> {
    vec![
        ColumnFamilyDescriptor::new(CF_TASKS, Options::default()),
        ColumnFamilyDescriptor::new(CF_TIME_SLOTS, Options::default()),
        ColumnFamilyDescriptor::new(CF_ENDPOINTS, Options::default()),
        ColumnFamilyDescriptor::new(CF_EXECUTIONS, Options::default()),
        ColumnFamilyDescriptor::new(CF_TASK_EXECUTIONS, Options::default()),
        ColumnFamilyDescriptor::new(CF_TRANSFERRED_FILES, history_options()),
    ]
}
