//! Per-endpoint concurrency limit around any endpoint.
//!
//! Inactivity timeouts live in the transports themselves (socket read and
//! write timeouts), so an operation that fails has also stopped touching the
//! network and the local staging file.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tracing::{debug_span, Instrument};

use relay_types::TransportKind;

use crate::endpoint::ProtocolEndpoint;
use crate::entry::RemoteEntry;
use crate::error::EndpointError;

/// Wraps an endpoint so that at most `permits` operations run against it at
/// once.
///
/// The semaphore is shared by every wrapper built for the same endpoint
/// record, so the limit holds across concurrent executions. Each operation
/// runs on its own task that owns its permit: a caller that stops waiting
/// does not free the slot while blocking transport work is still running.
pub struct GuardedEndpoint {
    inner: Arc<dyn ProtocolEndpoint>,
    permits: Arc<Semaphore>,
}

impl GuardedEndpoint {
    pub fn new(inner: Arc<dyn ProtocolEndpoint>, permits: Arc<Semaphore>) -> Self {
        Self { inner, permits }
    }

    fn inner(&self) -> Arc<dyn ProtocolEndpoint> {
        Arc::clone(&self.inner)
    }

    async fn guard<T, F>(&self, operation: &'static str, path: &str, work: F) -> Result<T, EndpointError>
    where
        F: Future<Output = Result<T, EndpointError>> + Send + 'static,
        T: Send + 'static,
    {
        let span = debug_span!(
            "endpoint_op",
            endpoint = %self.inner.display_name(),
            op = operation,
            path = %path
        );
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .instrument(span.clone())
            .await
            .map_err(|_| EndpointError::Connection("endpoint limiter closed".to_string()))?;

        let handle = tokio::spawn(
            async move {
                let _permit = permit;
                work.await
            }
            .instrument(span),
        );
        handle.await?
    }
}

#[async_trait]
impl ProtocolEndpoint for GuardedEndpoint {
    fn kind(&self) -> TransportKind {
        self.inner.kind()
    }

    fn display_name(&self) -> &str {
        self.inner.display_name()
    }

    async fn connect(&self) -> Result<(), EndpointError> {
        let inner = self.inner();
        self.guard("connect", "", async move { inner.connect().await })
            .await
    }

    async fn read_dir(&self, folder: &str) -> Result<Vec<RemoteEntry>, EndpointError> {
        let (inner, owned) = (self.inner(), folder.to_string());
        self.guard("read_dir", folder, async move { inner.read_dir(&owned).await })
            .await
    }

    async fn download(&self, remote: &str, local: &Path) -> Result<u64, EndpointError> {
        let (inner, owned, local) = (self.inner(), remote.to_string(), local.to_path_buf());
        self.guard("download", remote, async move {
            inner.download(&owned, &local).await
        })
        .await
    }

    async fn upload(&self, local: &Path, remote: &str) -> Result<(), EndpointError> {
        let (inner, owned, local) = (self.inner(), remote.to_string(), local.to_path_buf());
        self.guard("upload", remote, async move {
            inner.upload(&local, &owned).await
        })
        .await
    }

    async fn delete(&self, remote: &str) -> Result<(), EndpointError> {
        let (inner, owned) = (self.inner(), remote.to_string());
        self.guard("delete", remote, async move { inner.delete(&owned).await })
            .await
    }

    async fn ensure_directory(&self, remote: &str) -> Result<(), EndpointError> {
        let (inner, owned) = (self.inner(), remote.to_string());
        self.guard("ensure_directory", remote, async move {
            inner.ensure_directory(&owned).await
        })
        .await
    }

    async fn delete_if_empty(&self, remote: &str) -> Result<bool, EndpointError> {
        let (inner, owned) = (self.inner(), remote.to_string());
        self.guard("delete_if_empty", remote, async move {
            inner.delete_if_empty(&owned).await
        })
        .await
    }

    async fn test_reachable(&self, folder: &str) -> Result<bool, EndpointError> {
        let (inner, owned) = (self.inner(), folder.to_string());
        self.guard("test_reachable", folder, async move {
            inner.test_reachable(&owned).await
        })
        .await
    }
}
