//! Schedule evaluation and dispatch for file-relay.
//!
//! A single polling job, driven by `tokio-cron-scheduler`, ticks at a fixed
//! interval. Each tick loads the active tasks, asks the
//! [`ScheduleEvaluator`] which of them are due in the reference timezone
//! and hands each due task to a [`TaskRunner`] on its own tokio task.
//!
//! # Example
//!
//! ```ignore
//! use relay_scheduler::{SchedulerConfig, SchedulerService};
//!
//! let config = SchedulerConfig::from_settings(&settings);
//! let mut scheduler = SchedulerService::new(config, store, orchestrator).await?;
//! scheduler.start().await?;
//!
//! // later
//! scheduler.shutdown().await?;
//! ```

mod config;
mod error;
mod evaluator;
mod overlap;
mod registry;
mod scheduler;
mod tick;

pub use config::SchedulerConfig;
pub use error::SchedulerError;
pub use evaluator::{next_occurrences, validate_cron_expression, ScheduleEvaluator};
pub use overlap::{OverlapPolicy, RunGuard};
pub use registry::{DispatchRegistry, TaskRunStatus};
pub use scheduler::SchedulerService;
pub use tick::{TaskRunner, TickReport, TickRunner};
