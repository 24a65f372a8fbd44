//! Polling loop that drives the tick on a fixed interval.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use relay_storage::TransferStore;

use crate::config::SchedulerConfig;
use crate::evaluator::ScheduleEvaluator;
use crate::registry::DispatchRegistry;
use crate::tick::{TaskRunner, TickReport, TickRunner};
use crate::SchedulerError;

/// Scheduler service that ticks every `poll_interval_secs`.
///
/// Wraps tokio-cron-scheduler's JobScheduler with a single repeated job
/// plus an immediate tick at start, and coordinates graceful shutdown with
/// the runs the ticks have dispatched.
pub struct SchedulerService {
    scheduler: JobScheduler,
    config: SchedulerConfig,
    tick: Arc<TickRunner>,
    shutdown_token: CancellationToken,
    is_running: AtomicBool,
    tick_job: Mutex<Option<Uuid>>,
}

impl SchedulerService {
    /// Create a new scheduler service.
    ///
    /// The scheduler is created but not started. Call `start()` to begin
    /// ticking.
    pub async fn new(
        config: SchedulerConfig,
        store: Arc<dyn TransferStore>,
        runner: Arc<dyn TaskRunner>,
    ) -> Result<Self, SchedulerError> {
        let tz = config.parse_timezone()?;
        let shutdown_token = CancellationToken::new();
        let tick = TickRunner::new(
            store,
            runner,
            ScheduleEvaluator::new(tz, config.poll_interval()),
            config.overlap_policy,
            shutdown_token.clone(),
        );

        let scheduler = JobScheduler::new().await?;

        Ok(Self {
            scheduler,
            config,
            tick: Arc::new(tick),
            shutdown_token,
            is_running: AtomicBool::new(false),
            tick_job: Mutex::new(None),
        })
    }

    /// Start ticking.
    ///
    /// Runs one tick immediately, then one every poll interval.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::AlreadyRunning` if the scheduler is already started.
    pub async fn start(&self) -> Result<TickReport, SchedulerError> {
        if self.is_running.swap(true, Ordering::SeqCst) {
            return Err(SchedulerError::AlreadyRunning);
        }

        let tick = Arc::clone(&self.tick);
        let job = Job::new_repeated_async(self.config.poll_interval(), move |_uuid, _lock| {
            let tick = Arc::clone(&tick);
            Box::pin(async move {
                tick.run_tick(Utc::now());
            })
        })?;
        let job_id = self.scheduler.add(job).await?;
        *self.tick_job.lock().unwrap_or_else(PoisonError::into_inner) = Some(job_id);

        self.scheduler.start().await?;
        info!(
            timezone = %self.config.timezone,
            poll_interval_secs = self.config.poll_interval().as_secs(),
            overlap_policy = ?self.config.overlap_policy,
            "Scheduler started"
        );

        Ok(self.tick.run_tick(Utc::now()))
    }

    /// Shutdown the scheduler gracefully.
    ///
    /// Stops dispatching, waits up to `shutdown_timeout_secs` for in-flight
    /// runs, then stops the job scheduler. Runs still going after the
    /// timeout are left to the runtime.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::NotRunning` if the scheduler is not started.
    pub async fn shutdown(&mut self) -> Result<(), SchedulerError> {
        if !self.is_running.load(Ordering::SeqCst) {
            return Err(SchedulerError::NotRunning);
        }

        info!("Initiating scheduler shutdown");
        self.shutdown_token.cancel();

        let job_id = self
            .tick_job
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(job_id) = job_id {
            if let Err(e) = self.scheduler.remove(&job_id).await {
                warn!("Error removing tick job: {}", e);
            }
        }

        let registry = self.tick.registry();
        if !registry.wait_idle(self.config.shutdown_timeout()).await {
            warn!(
                in_flight = registry.running_count(),
                "Shutdown timeout elapsed with runs still in flight"
            );
        }

        if let Err(e) = self.scheduler.shutdown().await {
            warn!("Error during scheduler shutdown: {}", e);
        }

        self.is_running.store(false, Ordering::SeqCst);
        info!("Scheduler shutdown complete");

        Ok(())
    }

    /// Get a clone of the shutdown token.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    /// Run a tick outside the interval, e.g. right after tasks were imported.
    pub fn tick_now(&self) -> TickReport {
        self.tick.run_tick(Utc::now())
    }

    /// Dispatch status of every task seen since start.
    pub fn registry(&self) -> &Arc<DispatchRegistry> {
        self.tick.registry()
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }
}
