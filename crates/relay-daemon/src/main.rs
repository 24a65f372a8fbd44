//! file-relay daemon
//!
//! Moves files between FTP, SFTP and network-share endpoints on a schedule.
//!
//! # Usage
//!
//! ```bash
//! relay-daemon start [--foreground] [--db-path PATH]
//! relay-daemon stop
//! relay-daemon status
//! relay-daemon import tasks.toml
//! relay-daemon run <task-id>
//! relay-daemon executions <task-id>
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded in order (later sources override earlier):
//! 1. Built-in defaults
//! 2. Config file (~/.config/file-relay/config.toml)
//! 3. Environment variables (RELAY_*)
//! 4. CLI flags

use std::path::Path;

use anyhow::Result;
use clap::Parser;

use relay_daemon::{
    cancel_execution, check_cron, import_manifest, init_logging, list_executions, list_files,
    load_settings, run_task, show_status, start_daemon, stop_daemon, test_task, Cli, Commands,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Stop => return stop_daemon(),
        Commands::Status => return show_status(),
        _ => {}
    }

    let settings = load_settings(
        cli.config.as_deref(),
        cli.db_path.as_deref(),
        cli.log_level.as_deref(),
    )?;
    init_logging(&settings.log_level)?;

    match cli.command {
        Commands::Start { foreground } => {
            start_daemon(&settings, foreground).await?;
        }
        Commands::Stop | Commands::Status => {}
        Commands::Import { manifest } => {
            import_manifest(&settings, Path::new(&manifest))?;
        }
        Commands::Run { task_id } => {
            run_task(&settings, &task_id).await?;
        }
        Commands::Cancel { execution_id } => {
            cancel_execution(&settings, &execution_id)?;
        }
        Commands::Test { task_id } => {
            let report = test_task(&settings, &task_id).await?;
            if !report.all_reachable() {
                anyhow::bail!("Task {} has unreachable endpoints", task_id);
            }
        }
        Commands::Executions { task_id, limit } => {
            list_executions(&settings, &task_id, limit)?;
        }
        Commands::Files { execution_id } => {
            list_files(&settings, &execution_id)?;
        }
        Commands::CheckCron { expression, count } => {
            check_cron(&settings, &expression, count)?;
        }
    }

    Ok(())
}
