//! # relay-orchestrator
//!
//! Runs transfer tasks and exposes the service API around them.
//!
//! - [`TransferOrchestrator`]: list, filter, move and clean up for one execution
//! - [`TransferService`]: execute now, cancel, connection tests and history queries
//! - [`paths`]: destination mapping and cleanup ordering
//! - [`CancellationRegistry`]: cooperative cancellation of running executions
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use relay_orchestrator::{TransferConfig, TransferOrchestrator, TransferService};
//!
//! let orchestrator = TransferOrchestrator::new(store, resolver, TransferConfig::default());
//! let service = TransferService::new(Arc::new(orchestrator));
//! let execution = service.execute_now("nightly-reports").await?;
//! println!("{} files moved", execution.counts.files_transferred);
//! ```

pub mod cancellation;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod paths;
pub mod service;

pub use cancellation::CancellationRegistry;
pub use config::TransferConfig;
pub use error::TransferError;
pub use orchestrator::TransferOrchestrator;
pub use paths::{cleanup_order, destination_path, relative_to_root};
pub use service::{ConnectionReport, EndpointCheck, TransferService};
