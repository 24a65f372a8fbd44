//! # relay-types
//!
//! Shared domain types for file-relay.
//!
//! This crate defines the core data structures used throughout the system:
//! - Tasks: what to move, from where to where, and when
//! - Endpoints: stored connection details for FTP, SFTP and network shares
//! - Executions: the audit trail of every run and every attempted file
//! - Settings: layered configuration
//!
//! ## Usage
//!
//! ```rust
//! use relay_types::{ScheduleKind, TransferTask};
//!
//! let task = TransferTask::new("nightly", "Nightly export", "ftp-in", "share-out", ScheduleKind::Daily);
//! assert!(task.is_active);
//! ```

pub mod config;
pub mod endpoint;
pub mod error;
pub mod execution;
pub mod task;

pub use config::Settings;
pub use endpoint::{EndpointRecord, TransportKind, UnknownTransport};
pub use error::RelayError;
pub use execution::{Execution, ExecutionCounts, ExecutionStatus, TransferredFile};
pub use task::{ScheduleKind, TimeSlot, TransferTask, WeekdayFlags};
