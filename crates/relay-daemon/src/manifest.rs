//! TOML manifests of endpoints and tasks.
//!
//! ```toml
//! [[endpoints]]
//! id = "archive"
//! name = "Archive share"
//! protocol = "NETWORK"
//! host = "/mnt/archive"
//!
//! [[tasks]]
//! id = "nightly"
//! name = "Nightly export"
//! source_endpoint_id = "partner-ftp"
//! destination_endpoint_id = "archive"
//! source_folder = "/outbox"
//! destination_folder = "/incoming"
//! file_pattern = "*_{yyyyMMdd}.csv"
//! schedule_kind = "daily"
//! time_slots = ["02:00:00"]
//! ```
//!
//! Instants such as `one_time_instant` are RFC 3339 strings and must be
//! quoted.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use relay_scheduler::validate_cron_expression;
use relay_storage::TransferStore;
use relay_types::{EndpointRecord, ScheduleKind, TransferTask, TransportKind};

/// Endpoints and tasks to write to the store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Manifest {
    pub endpoints: Vec<EndpointRecord>,
    pub tasks: Vec<TransferTask>,
}

/// What an import wrote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub endpoints: usize,
    pub tasks: usize,
}

impl Manifest {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).context("Invalid manifest")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read manifest {:?}", path))?;
        Self::from_toml_str(&text).with_context(|| format!("In manifest {:?}", path))
    }

    /// Check the manifest against itself and the endpoints already stored.
    ///
    /// Nothing is written when validation fails.
    pub fn validate(&self, store: &dyn TransferStore) -> Result<()> {
        let mut endpoint_ids = HashSet::new();
        for endpoint in &self.endpoints {
            if endpoint.id.trim().is_empty() {
                bail!("endpoint {:?} has an empty id", endpoint.name);
            }
            if !endpoint_ids.insert(endpoint.id.as_str()) {
                bail!("endpoint {} is declared twice", endpoint.id);
            }
            if endpoint.protocol.parse::<TransportKind>().is_err() {
                warn!(
                    endpoint_id = %endpoint.id,
                    protocol = %endpoint.protocol,
                    "Unsupported protocol, executions using this endpoint will fail"
                );
            }
        }

        let mut task_ids = HashSet::new();
        for task in &self.tasks {
            task.validate()?;
            if !task_ids.insert(task.id.as_str()) {
                bail!("task {} is declared twice", task.id);
            }
            if task.schedule_kind == ScheduleKind::Custom {
                if let Some(expr) = task.cron_expression.as_deref() {
                    validate_cron_expression(expr)
                        .with_context(|| format!("task {}", task.id))?;
                }
            }
            for endpoint_id in [&task.source_endpoint_id, &task.destination_endpoint_id] {
                let known = endpoint_ids.contains(endpoint_id.as_str())
                    || store.load_endpoint(endpoint_id)?.is_some();
                if !known {
                    bail!("task {} references unknown endpoint {}", task.id, endpoint_id);
                }
            }
        }
        Ok(())
    }

    /// Validate, then insert or replace every endpoint and task.
    pub fn apply(&self, store: &dyn TransferStore) -> Result<ImportSummary> {
        self.validate(store)?;

        for endpoint in &self.endpoints {
            store
                .put_endpoint(endpoint)
                .with_context(|| format!("Failed to store endpoint {}", endpoint.id))?;
        }
        for task in &self.tasks {
            store
                .put_task(task)
                .with_context(|| format!("Failed to store task {}", task.id))?;
            info!(task_id = %task.id, schedule = %task.schedule_kind, "Imported task");
        }

        Ok(ImportSummary {
            endpoints: self.endpoints.len(),
            tasks: self.tasks.len(),
        })
    }
}
