//! One pass of the scheduler: load, evaluate, dispatch.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use relay_orchestrator::{TransferError, TransferOrchestrator};
use relay_storage::TransferStore;
use relay_types::{Execution, ScheduleKind, TransferTask};

use crate::evaluator::ScheduleEvaluator;
use crate::overlap::{OverlapPolicy, RunGuard};
use crate::registry::DispatchRegistry;

/// Runs a task to completion.
#[async_trait]
pub trait TaskRunner: Send + Sync {
    async fn run_task(&self, task: &TransferTask) -> Result<Execution, TransferError>;
}

#[async_trait]
impl TaskRunner for TransferOrchestrator {
    async fn run_task(&self, task: &TransferTask) -> Result<Execution, TransferError> {
        self.run(task).await
    }
}

/// Counts from one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    /// Active tasks evaluated
    pub evaluated: usize,
    pub due: usize,
    pub dispatched: usize,
    /// Due tasks held back by the overlap policy
    pub skipped: usize,
    /// One-time tasks deactivated after dispatch
    pub consumed: usize,
}

/// Evaluates active tasks and dispatches the due ones.
pub struct TickRunner {
    store: Arc<dyn TransferStore>,
    runner: Arc<dyn TaskRunner>,
    evaluator: ScheduleEvaluator,
    registry: Arc<DispatchRegistry>,
    policy: OverlapPolicy,
    shutdown: CancellationToken,
}

impl TickRunner {
    pub fn new(
        store: Arc<dyn TransferStore>,
        runner: Arc<dyn TaskRunner>,
        evaluator: ScheduleEvaluator,
        policy: OverlapPolicy,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            store,
            runner,
            evaluator,
            registry: Arc::new(DispatchRegistry::new()),
            policy,
            shutdown,
        }
    }

    pub fn registry(&self) -> &Arc<DispatchRegistry> {
        &self.registry
    }

    /// Run one tick at `now`.
    ///
    /// Never fails: storage errors end the tick early and are logged. Runs
    /// are spawned and not awaited, so the tick returns as soon as every due
    /// task has been handed off.
    pub fn run_tick(&self, now: DateTime<Utc>) -> TickReport {
        let mut report = TickReport::default();
        if self.shutdown.is_cancelled() {
            debug!("Shutdown requested, skipping tick");
            return report;
        }

        let tasks = match self.store.load_active_tasks() {
            Ok(tasks) => tasks,
            Err(e) => {
                error!(error = %e, "Failed to load active tasks");
                return report;
            }
        };

        for task in tasks {
            report.evaluated += 1;
            if !self.evaluator.is_due(&task, now) {
                continue;
            }
            report.due += 1;

            if self.shutdown.is_cancelled() {
                debug!(task_id = %task.id, "Shutdown requested, not dispatching");
                break;
            }

            let Some(guard) = self.registry.try_begin(&task.id, self.policy, now) else {
                info!(task_id = %task.id, "Previous run still in flight, skipping");
                report.skipped += 1;
                continue;
            };

            if task.schedule_kind == ScheduleKind::OneTime {
                match self.store.set_task_active(&task.id, false) {
                    Ok(_) => report.consumed += 1,
                    Err(e) => warn!(task_id = %task.id, error = %e, "Failed to deactivate one-time task"),
                }
            }

            info!(task_id = %task.id, schedule = %task.schedule_kind, "Dispatching task");
            self.dispatch(task, guard);
            report.dispatched += 1;
        }

        debug!(
            evaluated = report.evaluated,
            due = report.due,
            dispatched = report.dispatched,
            skipped = report.skipped,
            "Tick complete"
        );
        report
    }

    /// Spawn the run and a supervisor that owns its outcome.
    fn dispatch(&self, task: TransferTask, guard: RunGuard) {
        let runner = Arc::clone(&self.runner);
        let registry = Arc::clone(&self.registry);
        let task_id = task.id.clone();

        let run = tokio::spawn(async move { runner.run_task(&task).await });

        tokio::spawn(async move {
            let _guard = guard;
            match run.await {
                Ok(Ok(execution)) => {
                    info!(
                        task_id = %task_id,
                        execution_id = %execution.id,
                        status = %execution.status,
                        "Scheduled run finished"
                    );
                    registry.record_execution(&task_id, &execution);
                }
                Ok(Err(e)) => {
                    error!(task_id = %task_id, error = %e, "Scheduled run failed");
                    registry.record_failure(&task_id, e.to_string());
                }
                Err(e) if e.is_panic() => {
                    error!(task_id = %task_id, "Scheduled run panicked");
                    registry.record_failure(&task_id, "run panicked");
                }
                Err(e) => {
                    warn!(task_id = %task_id, error = %e, "Scheduled run aborted");
                    registry.record_failure(&task_id, e.to_string());
                }
            }
        })
    }
}
