//! Command implementations for the relay daemon.
//!
//! Handles:
//! - start: Load config, open storage, run the scheduler until signalled
//! - stop / status: PID file lifecycle
//! - import, run, cancel, test, executions, files, check-cron: one-shot
//!   operations against the store

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio::signal;
use tracing::{info, warn};

use relay_endpoints::EndpointFactory;
use relay_orchestrator::{ConnectionReport, TransferConfig, TransferOrchestrator, TransferService};
use relay_scheduler::{next_occurrences, SchedulerConfig, SchedulerService};
use relay_storage::{Storage, TransferStore};
use relay_types::{Execution, Settings, TransferredFile};

use crate::manifest::{ImportSummary, Manifest};

/// Get the PID file path
fn pid_file_path() -> PathBuf {
    directories::BaseDirs::new()
        .map(|dirs| {
            #[cfg(unix)]
            {
                dirs.runtime_dir()
                    .map(|p| p.to_path_buf())
                    .unwrap_or_else(|| dirs.cache_dir().to_path_buf())
            }
            #[cfg(not(unix))]
            {
                dirs.cache_dir().to_path_buf()
            }
        })
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("file-relay")
        .join("daemon.pid")
}

fn write_pid_file() -> Result<()> {
    let pid_path = pid_file_path();
    if let Some(parent) = pid_path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&pid_path, std::process::id().to_string())?;
    info!("Wrote PID file: {:?}", pid_path);
    Ok(())
}

fn remove_pid_file() {
    let pid_path = pid_file_path();
    if pid_path.exists() {
        if let Err(e) = fs::remove_file(&pid_path) {
            warn!("Failed to remove PID file: {}", e);
        } else {
            info!("Removed PID file");
        }
    }
}

fn read_pid_file() -> Option<u32> {
    fs::read_to_string(pid_file_path())
        .ok()
        .and_then(|s| s.trim().parse().ok())
}

#[cfg(unix)]
fn is_process_running(pid: u32) -> bool {
    // Signal 0 only checks that the process exists
    unsafe { libc::kill(pid as i32, 0) == 0 }
}

#[cfg(not(unix))]
fn is_process_running(_pid: u32) -> bool {
    true
}

/// Load settings and apply CLI overrides (highest precedence).
pub fn load_settings(
    config_path: Option<&str>,
    db_path_override: Option<&str>,
    log_level_override: Option<&str>,
) -> Result<Settings> {
    let mut settings = Settings::load(config_path).context("Failed to load configuration")?;
    if let Some(db_path) = db_path_override {
        settings.db_path = db_path.to_string();
    }
    if let Some(log_level) = log_level_override {
        settings.log_level = log_level.to_string();
    }
    Ok(settings)
}

/// Install the global tracing subscriber. RUST_LOG wins over the configured level.
pub fn init_logging(log_level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")
}

fn open_storage(settings: &Settings) -> Result<Arc<Storage>> {
    let db_path = settings.expanded_db_path();
    if let Some(parent) = db_path.parent() {
        fs::create_dir_all(parent).context("Failed to create database directory")?;
    }
    let storage = Storage::open(&db_path).with_context(|| {
        format!(
            "Failed to open storage at {:?} (a running daemon holds it exclusively)",
            db_path
        )
    })?;
    Ok(Arc::new(storage))
}

fn open_storage_read_only(settings: &Settings) -> Result<Arc<Storage>> {
    let db_path = settings.expanded_db_path();
    let storage = Storage::open_read_only(&db_path)
        .with_context(|| format!("Failed to open storage at {:?}", db_path))?;
    Ok(Arc::new(storage))
}

fn build_orchestrator(
    settings: &Settings,
    store: Arc<dyn TransferStore>,
) -> Result<TransferOrchestrator> {
    let config = TransferConfig::from_settings(settings).context("Invalid transfer settings")?;
    let factory = EndpointFactory::from_settings(settings);
    Ok(TransferOrchestrator::new(store, Arc::new(factory), config))
}

fn build_service(settings: &Settings, store: Arc<dyn TransferStore>) -> Result<TransferService> {
    Ok(TransferService::new(Arc::new(build_orchestrator(
        settings, store,
    )?)))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down...");
        }
    }
}

/// Start the daemon.
///
/// 1. Open RocksDB storage
/// 2. Start the scheduler (one tick immediately, then every poll interval)
/// 3. On SIGINT/SIGTERM stop dispatching and drain in-flight executions
pub async fn start_daemon(settings: &Settings, foreground: bool) -> Result<()> {
    info!("Relay daemon starting...");
    info!("Configuration:");
    info!("  Database path: {}", settings.db_path);
    info!("  Timezone: {}", settings.timezone);
    info!("  Poll interval: {}s", settings.poll_interval_secs);
    info!("  Log level: {}", settings.log_level);

    if !foreground {
        warn!("Background mode not implemented, running in foreground");
        warn!("Use a process manager (systemd, launchd) for background operation");
    }

    let storage = open_storage(settings)?;
    write_pid_file()?;

    let result = run_scheduler(settings, Arc::clone(&storage), shutdown_signal()).await;

    if let Err(e) = storage.flush() {
        warn!("Failed to flush storage: {}", e);
    }
    remove_pid_file();
    result
}

/// Run the scheduler over `storage` until `shutdown` resolves.
pub async fn run_scheduler(
    settings: &Settings,
    storage: Arc<Storage>,
    shutdown: impl std::future::Future<Output = ()>,
) -> Result<()> {
    let store: Arc<dyn TransferStore> = storage;
    let orchestrator = Arc::new(build_orchestrator(settings, Arc::clone(&store))?);

    let mut scheduler =
        SchedulerService::new(SchedulerConfig::from_settings(settings), store, orchestrator)
            .await
            .context("Failed to create scheduler")?;
    let report = scheduler.start().await.context("Failed to start scheduler")?;
    info!(
        evaluated = report.evaluated,
        dispatched = report.dispatched,
        "Initial tick complete"
    );

    shutdown.await;

    scheduler
        .shutdown()
        .await
        .context("Failed to stop scheduler")?;
    Ok(())
}

/// Stop the running daemon by sending SIGTERM.
pub fn stop_daemon() -> Result<()> {
    let pid = read_pid_file().context("No PID file found - daemon may not be running")?;

    if !is_process_running(pid) {
        remove_pid_file();
        anyhow::bail!("Daemon not running (stale PID file removed)");
    }

    info!("Stopping daemon (PID {})", pid);

    #[cfg(unix)]
    {
        unsafe {
            if libc::kill(pid as i32, libc::SIGTERM) != 0 {
                anyhow::bail!("Failed to send SIGTERM to daemon");
            }
        }
        println!("Sent SIGTERM to daemon (PID {})", pid);
    }

    #[cfg(not(unix))]
    {
        anyhow::bail!("Stop command not yet implemented on this platform");
    }

    Ok(())
}

/// Show daemon status.
pub fn show_status() -> Result<()> {
    let pid_path = pid_file_path();

    match read_pid_file() {
        Some(pid) if is_process_running(pid) => {
            println!("Relay daemon is running (PID {})", pid);
            println!("PID file: {:?}", pid_path);
        }
        Some(pid) => {
            println!(
                "Relay daemon is NOT running (stale PID {} in {:?})",
                pid, pid_path
            );
        }
        None => {
            println!("Relay daemon is NOT running (no PID file)");
        }
    }
    Ok(())
}

/// Import endpoints and tasks from a manifest file.
pub fn import_manifest(settings: &Settings, path: &Path) -> Result<ImportSummary> {
    let manifest = Manifest::load(path)?;
    let storage = open_storage(settings)?;
    let summary = manifest.apply(storage.as_ref())?;
    storage.flush().context("Failed to flush storage")?;

    println!(
        "Imported {} endpoint(s) and {} task(s) from {:?}",
        summary.endpoints, summary.tasks, path
    );
    Ok(summary)
}

/// Run a task now, in this process, and wait for it.
pub async fn run_task(settings: &Settings, task_id: &str) -> Result<Execution> {
    let storage = open_storage(settings)?;
    let service = build_service(settings, storage.clone())?;
    let execution = service
        .execute_now(task_id)
        .await
        .with_context(|| format!("Failed to run task {}", task_id))?;
    storage.flush().context("Failed to flush storage")?;

    print_execution(&execution);
    Ok(execution)
}

/// Mark an in-progress execution cancelled.
///
/// Needs write access, so it only works while no daemon holds the store.
pub fn cancel_execution(settings: &Settings, execution_id: &str) -> Result<bool> {
    let storage = open_storage(settings)?;
    let service = build_service(settings, storage.clone())?;
    let cancelled = service.cancel(execution_id)?;
    storage.flush().context("Failed to flush storage")?;

    if cancelled {
        println!("Cancelled execution {}", execution_id);
    } else {
        println!("Execution {} is unknown or already finished", execution_id);
    }
    Ok(cancelled)
}

/// Check both endpoints of a task.
pub async fn test_task(settings: &Settings, task_id: &str) -> Result<ConnectionReport> {
    let storage = open_storage_read_only(settings)?;
    let service = build_service(settings, storage)?;
    let task = service.task(task_id)?;
    let report = service.test_connections(&task).await;

    for (side, check) in [("source", &report.source), ("destination", &report.destination)] {
        match &check.error {
            None => println!("{:<12} {:<20} ok", side, check.endpoint_id),
            Some(error) => println!("{:<12} {:<20} FAILED: {}", side, check.endpoint_id, error),
        }
    }
    Ok(report)
}

/// Executions of a task, newest first.
pub fn list_executions(settings: &Settings, task_id: &str, limit: usize) -> Result<Vec<Execution>> {
    let storage = open_storage_read_only(settings)?;
    let mut executions = storage.list_executions(task_id)?;
    executions.truncate(limit);

    if executions.is_empty() {
        println!("No executions for task {}", task_id);
    }
    for execution in &executions {
        print_execution(execution);
    }
    Ok(executions)
}

/// Files recorded for one execution.
pub fn list_files(settings: &Settings, execution_id: &str) -> Result<Vec<TransferredFile>> {
    let storage = open_storage_read_only(settings)?;
    let files = storage.list_transferred_files(execution_id)?;

    for file in &files {
        let outcome = match &file.error_message {
            _ if file.success => "ok".to_string(),
            Some(message) => format!("FAILED: {}", message),
            None => "FAILED".to_string(),
        };
        println!(
            "{} -> {} ({} bytes) {}",
            file.source_path, file.destination_path, file.size, outcome
        );
    }
    Ok(files)
}

/// Validate a cron expression and print its next occurrences.
pub fn check_cron(settings: &Settings, expression: &str, count: usize) -> Result<Vec<DateTime<Utc>>> {
    let tz = settings.parse_timezone()?;
    let occurrences = next_occurrences(expression, tz, Utc::now(), count)?;

    println!("'{}' is valid ({})", expression, tz.name());
    for at in &occurrences {
        println!("  {}", at.with_timezone(&tz).to_rfc3339());
    }
    Ok(occurrences)
}

fn print_execution(execution: &Execution) {
    let counts = &execution.counts;
    println!(
        "{}  {}  {:<11} discovered={} transferred={} errors={} skipped={}",
        execution.id,
        execution.start_time.to_rfc3339(),
        execution.status,
        counts.files_discovered,
        counts.files_transferred,
        counts.error_count,
        counts.files_skipped,
    );
    if let Some(message) = &execution.error_message {
        println!("    {}", message);
    }
}
