//! CLI argument parsing for the relay daemon.
//!
//! CLI flags override every other configuration source.

use clap::{Parser, Subcommand};

/// file-relay daemon
///
/// Moves files between FTP, SFTP and network-share endpoints on a schedule.
#[derive(Parser, Debug)]
#[command(name = "relay-daemon")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default ~/.config/file-relay/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Set log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    /// Override database path
    #[arg(long, global = true)]
    pub db_path: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Daemon commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the daemon and its scheduler
    Start {
        /// Run in foreground (don't daemonize)
        #[arg(short, long)]
        foreground: bool,
    },

    /// Stop the running daemon
    Stop,

    /// Show daemon status
    Status,

    /// Import endpoints and tasks from a TOML manifest
    Import {
        /// Manifest file with [[endpoints]] and [[tasks]] tables
        manifest: String,
    },

    /// Run a task now and wait for it to finish
    Run {
        task_id: String,
    },

    /// Cancel an execution that is still in progress
    Cancel {
        execution_id: String,
    },

    /// Check that a task's endpoints and folders are reachable
    Test {
        task_id: String,
    },

    /// List executions of a task, newest first
    Executions {
        task_id: String,

        /// Maximum results
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },

    /// List the files recorded for an execution
    Files {
        execution_id: String,
    },

    /// Validate a cron expression and show its next occurrences
    CheckCron {
        expression: String,

        /// Number of occurrences to show
        #[arg(short = 'n', long, default_value = "5")]
        count: usize,
    },
}
