//! # relay-storage
//!
//! Persistence for file-relay.
//!
//! This crate provides:
//! - [`TransferStore`]: the storage boundary used by the orchestrator and scheduler
//! - [`Storage`]: RocksDB implementation with one column family per record kind
//! - [`MemoryStore`]: in-process implementation for tests
//! - Key encoding for ordered prefix scans
//!
//! Execution records only ever leave `InProgress` once;
//! [`TransferStore::finish_execution`] enforces that for concurrent writers.

pub mod column_families;
pub mod db;
pub mod error;
pub mod keys;
pub mod memory;
pub mod store;

pub use db::Storage;
pub use error::StorageError;
pub use memory::MemoryStore;
pub use store::TransferStore;
