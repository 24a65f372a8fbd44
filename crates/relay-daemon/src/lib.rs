//! Relay daemon library exports.
//!
//! # Modules
//!
//! - `cli`: Command-line argument parsing with clap
//! - `commands`: Command implementations
//! - `manifest`: TOML import of endpoints and tasks

pub mod cli;
pub mod commands;
pub mod manifest;

pub use cli::{Cli, Commands};
pub use commands::{
    cancel_execution, check_cron, import_manifest, init_logging, list_executions, list_files,
    load_settings, run_scheduler, run_task, show_status, start_daemon, stop_daemon, test_task,
};
pub use manifest::{ImportSummary, Manifest};
