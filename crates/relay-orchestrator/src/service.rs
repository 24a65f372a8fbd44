//! API facade over the orchestrator and the store.
//!
//! This is the surface the CLI and any outer web layer call.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use relay_endpoints::EndpointError;
use relay_storage::TransferStore;
use relay_types::{Execution, ExecutionStatus, TransferTask, TransferredFile};

use crate::error::TransferError;
use crate::orchestrator::TransferOrchestrator;

/// Reachability of one endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EndpointCheck {
    pub endpoint_id: String,
    pub reachable: bool,
    /// Why the check failed, when it did
    pub error: Option<String>,
}

/// Reachability of both sides of a task, each against its task folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionReport {
    pub source: EndpointCheck,
    pub destination: EndpointCheck,
}

impl ConnectionReport {
    pub fn all_reachable(&self) -> bool {
        self.source.reachable && self.destination.reachable
    }
}

/// Operations on tasks and their execution history.
pub struct TransferService {
    orchestrator: Arc<TransferOrchestrator>,
}

impl TransferService {
    pub fn new(orchestrator: Arc<TransferOrchestrator>) -> Self {
        Self { orchestrator }
    }

    pub fn orchestrator(&self) -> &Arc<TransferOrchestrator> {
        &self.orchestrator
    }

    fn store(&self) -> &Arc<dyn TransferStore> {
        self.orchestrator.store()
    }

    /// Load a task or fail with `TaskNotFound`.
    pub fn task(&self, task_id: &str) -> Result<TransferTask, TransferError> {
        self.store()
            .load_task(task_id)?
            .ok_or_else(|| TransferError::TaskNotFound(task_id.to_string()))
    }

    /// Run a task now, outside its schedule, and wait for the result.
    pub async fn execute_now(&self, task_id: &str) -> Result<Execution, TransferError> {
        let task = self.task(task_id)?;
        info!(task_id = %task_id, "Manual execution requested");
        self.orchestrator.run(&task).await
    }

    /// Cancel an execution that is still in progress.
    ///
    /// Marks the record `Cancelled` and signals the run, if it is running in
    /// this process, to stop before its next file. Returns false when the
    /// execution is unknown or already finished.
    pub fn cancel(&self, execution_id: &str) -> Result<bool, TransferError> {
        let Some(mut execution) = self.store().get_execution(execution_id)? else {
            return Ok(false);
        };
        if !execution.finish(ExecutionStatus::Cancelled, None, Utc::now()) {
            return Ok(false);
        }
        if !self.store().finish_execution(&execution)? {
            return Ok(false);
        }

        let signalled = self.orchestrator.cancellations().cancel(execution_id);
        info!(execution_id = %execution_id, signalled, "Execution cancelled");
        Ok(true)
    }

    /// Check that both endpoints of a task are reachable.
    pub async fn test_connections(&self, task: &TransferTask) -> ConnectionReport {
        ConnectionReport {
            source: self
                .check(&task.source_endpoint_id, Some(task.source_folder.as_str()))
                .await,
            destination: self
                .check(&task.destination_endpoint_id, Some(task.destination_folder.as_str()))
                .await,
        }
    }

    /// Check that an endpoint accepts a connection.
    pub async fn test_endpoint(&self, endpoint_id: &str) -> EndpointCheck {
        self.check(endpoint_id, None).await
    }

    async fn check(&self, endpoint_id: &str, folder: Option<&str>) -> EndpointCheck {
        let result = match self.orchestrator.resolve_endpoint(endpoint_id) {
            Ok(endpoint) => match folder {
                Some(folder) => endpoint
                    .test_reachable(folder)
                    .await
                    .map_err(TransferError::from)
                    .and_then(|found| {
                        if found {
                            Ok(())
                        } else {
                            Err(TransferError::Endpoint(EndpointError::NotFound(
                                folder.to_string(),
                            )))
                        }
                    }),
                None => endpoint.connect().await.map_err(TransferError::from),
            },
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => EndpointCheck {
                endpoint_id: endpoint_id.to_string(),
                reachable: true,
                error: None,
            },
            Err(e) => {
                warn!(endpoint_id = %endpoint_id, error = %e, "Connection test failed");
                EndpointCheck {
                    endpoint_id: endpoint_id.to_string(),
                    reachable: false,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// Executions of a task, newest first.
    pub fn list_executions(&self, task_id: &str) -> Result<Vec<Execution>, TransferError> {
        Ok(self.store().list_executions(task_id)?)
    }

    pub fn get_execution(&self, execution_id: &str) -> Result<Execution, TransferError> {
        self.store()
            .get_execution(execution_id)?
            .ok_or_else(|| TransferError::ExecutionNotFound(execution_id.to_string()))
    }

    /// Per-file outcomes of an execution.
    pub fn list_files(&self, execution_id: &str) -> Result<Vec<TransferredFile>, TransferError> {
        Ok(self.store().list_transferred_files(execution_id)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use relay_endpoints::{MockEndpoint, MockResolver};
    use relay_storage::MemoryStore;
    use relay_types::{EndpointRecord, ScheduleKind};
    use tempfile::TempDir;

    use crate::config::TransferConfig;

    struct Fixture {
        service: Arc<TransferService>,
        store: Arc<MemoryStore>,
        source: Arc<MockEndpoint>,
        destination: Arc<MockEndpoint>,
        _staging: TempDir,
    }

    fn fixture(source: MockEndpoint) -> Fixture {
        let staging = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        let source = Arc::new(source);
        let destination = Arc::new(MockEndpoint::new("destination"));

        store
            .put_endpoint(&EndpointRecord::new("src", "Source", "SFTP", "a"))
            .unwrap();
        store
            .put_endpoint(&EndpointRecord::new("dst", "Destination", "SFTP", "b"))
            .unwrap();
        store
            .put_task(
                &TransferTask::new("t1", "Task", "src", "dst", ScheduleKind::Daily)
                    .with_folders("/in", "/out"),
            )
            .unwrap();

        let resolver = MockResolver::new()
            .with("src", source.clone())
            .with("dst", destination.clone());
        let orchestrator = TransferOrchestrator::new(
            store.clone(),
            Arc::new(resolver),
            TransferConfig::default().with_temp_dir(staging.path()),
        );
        Fixture {
            service: Arc::new(TransferService::new(Arc::new(orchestrator))),
            store,
            source,
            destination,
            _staging: staging,
        }
    }

    #[tokio::test]
    async fn test_execute_now_and_history() {
        let f = fixture(MockEndpoint::new("source"));
        f.source.add_file("/in/a.txt", b"a");

        let exec = f.service.execute_now("t1").await.unwrap();
        assert_eq!(exec.status, ExecutionStatus::Completed);
        assert!(f.destination.has_file("/out/a.txt"));

        assert_eq!(f.service.list_executions("t1").unwrap().len(), 1);
        assert_eq!(f.service.get_execution(&exec.id).unwrap(), exec);
        assert_eq!(f.service.list_files(&exec.id).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_execute_unknown_task() {
        let f = fixture(MockEndpoint::new("source"));
        assert!(matches!(
            f.service.execute_now("ghost").await,
            Err(TransferError::TaskNotFound(_))
        ));
        assert!(matches!(
            f.service.get_execution("ghost"),
            Err(TransferError::ExecutionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_cancel_only_in_progress() {
        let f = fixture(MockEndpoint::new("source"));
        let exec = Execution::start("t1", Utc::now());
        f.store.create_execution(&exec).unwrap();

        assert!(f.service.cancel(&exec.id).unwrap());
        let stored = f.store.get_execution(&exec.id).unwrap().unwrap();
        assert_eq!(stored.status, ExecutionStatus::Cancelled);
        assert!(stored.end_time.is_some());

        assert!(!f.service.cancel(&exec.id).unwrap());
        assert!(!f.service.cancel("unknown").unwrap());
    }

    #[tokio::test]
    async fn test_cancel_stops_running_execution() {
        let f = fixture(MockEndpoint::new("slow").with_delay(Duration::from_millis(30)));
        for i in 0..6 {
            f.source.add_file(&format!("/in/f{i}.txt"), b"x");
        }

        let service = f.service.clone();
        let run = tokio::spawn(async move { service.execute_now("t1").await });

        let execution_id = loop {
            if let Some(exec) = f.store.list_executions("t1").unwrap().first() {
                break exec.id.clone();
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        };
        assert!(f.service.cancel(&execution_id).unwrap());

        let exec = run.await.unwrap().unwrap();
        assert_eq!(exec.status, ExecutionStatus::Cancelled);
        assert!(exec.counts.files_skipped > 0);
        assert_eq!(
            exec.counts.files_transferred + exec.counts.error_count + exec.counts.files_skipped,
            exec.counts.files_discovered
        );
        assert!(f.destination.file_paths().len() < 6);
    }

    #[tokio::test]
    async fn test_connection_report() {
        let f = fixture(MockEndpoint::new("source"));
        f.source.add_dir("/in");

        let report = f.service.test_connections(&f.service.task("t1").unwrap()).await;
        assert!(report.source.reachable);
        assert!(!report.destination.reachable);
        assert!(report.destination.error.unwrap().contains("/out"));
        assert!(!f.service.test_connections(&f.service.task("t1").unwrap()).await.all_reachable());

        let missing = f.service.test_endpoint("nope").await;
        assert!(!missing.reachable);
        assert!(missing.error.unwrap().contains("Credential not found"));
        assert!(f.service.test_endpoint("src").await.reachable);
    }
}
