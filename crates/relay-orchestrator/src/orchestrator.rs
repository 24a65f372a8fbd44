//! The transfer pipeline for one execution.
//!
//! A run lists the source lazily, filters each entry through the task's
//! compiled pattern, moves the survivors one by one (or a few at a time with
//! `file_concurrency > 1`) and records an outcome per file. Whatever happens
//! inside, the execution record ends in a terminal state.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::Utc;
use futures::{future, FutureExt, TryStreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use relay_endpoints::{
    normalize_remote, parent_remote, EndpointResolver, ProtocolEndpoint, RemoteEntry,
};
use relay_pattern::PatternProcessor;
use relay_storage::TransferStore;
use relay_types::{Execution, ExecutionStatus, TransferTask, TransferredFile};

use crate::cancellation::CancellationRegistry;
use crate::config::TransferConfig;
use crate::error::TransferError;
use crate::paths::{cleanup_order, destination_path};

/// Result of one attempted file.
enum FileOutcome {
    Moved {
        record: TransferredFile,
        /// Parent of the source file when the source was deleted
        emptied_parent: Option<String>,
    },
    Failed(TransferredFile),
    /// Not attempted because the run was cancelled
    Skipped,
}

/// Runs transfer tasks against their endpoints.
pub struct TransferOrchestrator {
    store: Arc<dyn TransferStore>,
    resolver: Arc<dyn EndpointResolver>,
    patterns: PatternProcessor,
    config: TransferConfig,
    cancellations: Arc<CancellationRegistry>,
}

impl TransferOrchestrator {
    pub fn new(
        store: Arc<dyn TransferStore>,
        resolver: Arc<dyn EndpointResolver>,
        config: TransferConfig,
    ) -> Self {
        Self {
            store,
            resolver,
            patterns: PatternProcessor::new(config.timezone),
            config,
            cancellations: Arc::new(CancellationRegistry::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn TransferStore> {
        &self.store
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    /// Tokens of the executions currently running in this orchestrator.
    pub fn cancellations(&self) -> &Arc<CancellationRegistry> {
        &self.cancellations
    }

    /// Load an endpoint record and build its endpoint.
    pub fn resolve_endpoint(
        &self,
        endpoint_id: &str,
    ) -> Result<Arc<dyn ProtocolEndpoint>, TransferError> {
        let record = self
            .store
            .load_endpoint(endpoint_id)?
            .ok_or_else(|| TransferError::CredentialNotFound(endpoint_id.to_string()))?;
        Ok(self.resolver.resolve(&record)?)
    }

    /// Run a task, resolving its endpoints from the store.
    ///
    /// Fails only if the execution record cannot be created or settled;
    /// every other problem is reported through the returned execution.
    pub async fn run(&self, task: &TransferTask) -> Result<Execution, TransferError> {
        self.start(task, None).await
    }

    /// Run a task against endpoints the caller already resolved.
    pub async fn execute(
        &self,
        task: &TransferTask,
        source: Arc<dyn ProtocolEndpoint>,
        destination: Arc<dyn ProtocolEndpoint>,
    ) -> Result<Execution, TransferError> {
        self.start(task, Some((source, destination))).await
    }

    async fn start(
        &self,
        task: &TransferTask,
        endpoints: Option<(Arc<dyn ProtocolEndpoint>, Arc<dyn ProtocolEndpoint>)>,
    ) -> Result<Execution, TransferError> {
        let execution = Execution::start(task.id.clone(), Utc::now());
        self.store.create_execution(&execution)?;

        let execution_id = execution.id.clone();
        let token = self.cancellations.register(&execution_id);
        let span = info_span!("execution", execution_id = %execution_id, task_id = %task.id);

        let result = self
            .drive(task, execution, endpoints, &token)
            .instrument(span)
            .await;
        self.cancellations.remove(&execution_id);
        result
    }

    async fn drive(
        &self,
        task: &TransferTask,
        mut execution: Execution,
        endpoints: Option<(Arc<dyn ProtocolEndpoint>, Arc<dyn ProtocolEndpoint>)>,
        token: &CancellationToken,
    ) -> Result<Execution, TransferError> {
        info!(task = %task.name, "Execution started");

        let outcome = AssertUnwindSafe(self.transfer(task, &mut execution, endpoints, token))
            .catch_unwind()
            .await;

        let (status, message) = match outcome {
            Ok(Ok(())) if token.is_cancelled() => (ExecutionStatus::Cancelled, None),
            Ok(Ok(())) => (ExecutionStatus::Completed, None),
            Ok(Err(e)) => {
                error!(error = %e, "Execution failed");
                (ExecutionStatus::Error, Some(e.to_string()))
            }
            Err(payload) => {
                let e = TransferError::Panicked(panic_message(payload));
                error!(error = %e, "Execution panicked");
                (ExecutionStatus::Error, Some(e.to_string()))
            }
        };

        execution.finish(status, message, Utc::now());
        if !self.store.finish_execution(&execution)? {
            // Someone else settled the record first; report what is stored.
            if let Some(stored) = self.store.get_execution(&execution.id)? {
                execution = stored;
            }
        }

        info!(
            status = %execution.status,
            discovered = execution.counts.files_discovered,
            transferred = execution.counts.files_transferred,
            errors = execution.counts.error_count,
            skipped = execution.counts.files_skipped,
            "Execution finished"
        );
        Ok(execution)
    }

    async fn transfer(
        &self,
        task: &TransferTask,
        execution: &mut Execution,
        endpoints: Option<(Arc<dyn ProtocolEndpoint>, Arc<dyn ProtocolEndpoint>)>,
        token: &CancellationToken,
    ) -> Result<(), TransferError> {
        let (source, destination) = match endpoints {
            Some(pair) => pair,
            None => (
                self.resolve_endpoint(&task.source_endpoint_id)?,
                self.resolve_endpoint(&task.destination_endpoint_id)?,
            ),
        };

        let now = Utc::now();
        let filter = self.patterns.compile(task.file_pattern.as_deref(), now);
        let today = self.patterns.local_date(now);
        let source_root = normalize_remote(&task.source_folder);
        let destination_root = normalize_remote(&task.destination_folder);
        let execution_id = execution.id.clone();

        debug!(
            source = %source.display_name(),
            destination = %destination.display_name(),
            regex = %filter.regex_pattern,
            date_filter = filter.requires_date_filter,
            "Listing source files"
        );

        let mut emptied_folders = Vec::new();
        let mut outcomes = source
            .list_files(&source_root, task.recurse_subfolders)
            .try_filter(|entry| {
                let modified = entry.last_modified.map(|m| self.patterns.local_date(m));
                future::ready(filter.accepts(&entry.name, modified, today))
            })
            .map_ok(|entry| {
                self.transfer_file(
                    task,
                    entry,
                    &source_root,
                    &destination_root,
                    source.as_ref(),
                    destination.as_ref(),
                    token,
                    &execution_id,
                )
            })
            .try_buffered(self.config.file_concurrency.max(1));

        while let Some(outcome) = outcomes.try_next().await? {
            let counts = &mut execution.counts;
            counts.files_discovered += 1;
            match outcome {
                FileOutcome::Moved {
                    record,
                    emptied_parent,
                } => {
                    counts.files_transferred += 1;
                    emptied_folders.extend(emptied_parent);
                    self.store.append_transferred_file(&record)?;
                }
                FileOutcome::Failed(record) => {
                    counts.error_count += 1;
                    self.store.append_transferred_file(&record)?;
                }
                FileOutcome::Skipped => counts.files_skipped += 1,
            }

            if !self.store.update_execution(execution)? && !token.is_cancelled() {
                debug!("Execution settled elsewhere, stopping");
                token.cancel();
            }
        }
        drop(outcomes);

        if task.delete_source_after_transfer && !emptied_folders.is_empty() {
            self.remove_empty_folders(source.as_ref(), &emptied_folders, &source_root)
                .await;
        }
        Ok(())
    }

    /// Move one file. Per-file failures become a failed record, never an error.
    #[allow(clippy::too_many_arguments)]
    async fn transfer_file(
        &self,
        task: &TransferTask,
        entry: RemoteEntry,
        source_root: &str,
        destination_root: &str,
        source: &dyn ProtocolEndpoint,
        destination: &dyn ProtocolEndpoint,
        token: &CancellationToken,
        execution_id: &str,
    ) -> Result<FileOutcome, relay_endpoints::EndpointError> {
        if token.is_cancelled() {
            debug!(path = %entry.path, "Execution cancelled, skipping file");
            return Ok(FileOutcome::Skipped);
        }

        let target = destination_path(
            &entry.path,
            &entry.name,
            source_root,
            destination_root,
            task.mirror_subfolder_structure,
        );
        let mut record =
            TransferredFile::new(execution_id, entry.name.clone(), entry.path.clone(), target.clone());

        match self
            .move_file(task, &entry, &target, source, destination, &mut record.size)
            .await
        {
            Ok(()) => {
                info!(source = %entry.path, destination = %target, size = record.size, "Transferred file");
                let emptied_parent = if task.delete_source_after_transfer {
                    parent_remote(&entry.path)
                } else {
                    None
                };
                Ok(FileOutcome::Moved {
                    record: record.succeeded(Utc::now()),
                    emptied_parent,
                })
            }
            Err(e) => {
                warn!(source = %entry.path, error = %e, "File transfer failed");
                Ok(FileOutcome::Failed(record.failed(e.to_string(), Utc::now())))
            }
        }
    }

    /// Download, upload and optionally delete the source.
    ///
    /// The staging file is removed when `staging` drops, on every path.
    async fn move_file(
        &self,
        task: &TransferTask,
        entry: &RemoteEntry,
        target: &str,
        source: &dyn ProtocolEndpoint,
        destination: &dyn ProtocolEndpoint,
        size: &mut u64,
    ) -> Result<(), TransferError> {
        let staging = tempfile::Builder::new()
            .prefix("relay-")
            .suffix(".part")
            .tempfile_in(&self.config.temp_dir)
            .map_err(|e| TransferError::transfer_failed(&entry.path, format!("staging: {e}")))?
            .into_temp_path();

        *size = source
            .download(&entry.path, &staging)
            .await
            .map_err(|e| TransferError::transfer_failed(&entry.path, e))?;

        if let Some(parent) = parent_remote(target) {
            destination
                .ensure_directory(&parent)
                .await
                .map_err(|e| TransferError::transfer_failed(target, e))?;
        }
        destination
            .upload(&staging, target)
            .await
            .map_err(|e| TransferError::transfer_failed(target, e))?;

        if task.delete_source_after_transfer {
            source.delete(&entry.path).await.map_err(|e| {
                TransferError::transfer_failed(&entry.path, format!("uploaded but not deleted: {e}"))
            })?;
        }
        Ok(())
    }

    /// Remove source folders the run emptied, deepest first.
    async fn remove_empty_folders(
        &self,
        source: &dyn ProtocolEndpoint,
        folders: &[String],
        source_root: &str,
    ) {
        for folder in cleanup_order(folders, source_root) {
            match source.delete_if_empty(&folder).await {
                Ok(true) => info!(folder = %folder, "Removed empty source folder"),
                Ok(false) => warn!(folder = %folder, "Source folder not empty, keeping it"),
                Err(e) => warn!(folder = %folder, error = %e, "Could not remove source folder"),
            }
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
