//! Builds endpoints from stored records.
//!
//! The transport is chosen here, once, from the record's declared kind.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::debug;

use relay_types::{EndpointRecord, Settings, TransportKind};

use crate::credentials::{Credentials, PlaintextSecrets, SecretDecryptor};
use crate::endpoint::ProtocolEndpoint;
use crate::error::EndpointError;
use crate::ftp::FtpEndpoint;
use crate::guarded::GuardedEndpoint;
use crate::sftp::SftpEndpoint;
use crate::share::{CifsMountConnector, MountedShareConnector, ShareConnector, ShareEndpoint};

/// Turns an endpoint record into a usable endpoint.
pub trait EndpointResolver: Send + Sync {
    fn resolve(&self, record: &EndpointRecord) -> Result<Arc<dyn ProtocolEndpoint>, EndpointError>;
}

/// Limits applied to every endpoint the factory builds.
#[derive(Debug, Clone, Copy)]
pub struct EndpointLimits {
    /// Concurrent operations allowed per endpoint record
    pub max_concurrent: usize,
    /// How long a connect, read or write may stall before it fails
    pub io_timeout: Duration,
}

impl Default for EndpointLimits {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            io_timeout: Duration::from_secs(300),
        }
    }
}

impl EndpointLimits {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            max_concurrent: settings.max_connections_per_endpoint.max(1),
            io_timeout: settings.operation_timeout(),
        }
    }
}

/// Resolver for the real transports.
pub struct EndpointFactory {
    decryptor: Arc<dyn SecretDecryptor>,
    share_connector: Arc<dyn ShareConnector>,
    limits: EndpointLimits,
    limiters: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl EndpointFactory {
    /// Factory with plain-text secrets and pre-mounted shares.
    pub fn new(limits: EndpointLimits) -> Self {
        Self {
            decryptor: Arc::new(PlaintextSecrets),
            share_connector: Arc::new(MountedShareConnector),
            limits,
            limiters: Mutex::new(HashMap::new()),
        }
    }

    /// Factory configured from settings. Credentialed shares are mounted per
    /// session when `share_mount_dir` is set.
    pub fn from_settings(settings: &Settings) -> Self {
        let factory = Self::new(EndpointLimits::from_settings(settings));
        match settings.share_mount_dir() {
            Some(base) => factory.with_share_connector(Arc::new(CifsMountConnector::new(base))),
            None => factory,
        }
    }

    /// Use a different secret decryptor.
    pub fn with_decryptor(mut self, decryptor: Arc<dyn SecretDecryptor>) -> Self {
        self.decryptor = decryptor;
        self
    }

    /// Use a different share connector.
    pub fn with_share_connector(mut self, connector: Arc<dyn ShareConnector>) -> Self {
        self.share_connector = connector;
        self
    }

    /// Build the guarded endpoint for a record.
    pub fn build(&self, record: &EndpointRecord) -> Result<Arc<dyn ProtocolEndpoint>, EndpointError> {
        let kind = record
            .transport()
            .map_err(|e| EndpointError::UnsupportedTransport(e.0))?;
        let credentials = Credentials::from_record(record, kind, self.decryptor.as_ref())?;

        let inner: Arc<dyn ProtocolEndpoint> = match kind {
            TransportKind::Ftp => Arc::new(
                FtpEndpoint::new(record.name.clone(), credentials)
                    .with_io_timeout(self.limits.io_timeout),
            ),
            TransportKind::Sftp => Arc::new(
                SftpEndpoint::new(record.name.clone(), credentials)
                    .with_io_timeout(self.limits.io_timeout),
            ),
            TransportKind::NetworkShare => Arc::new(ShareEndpoint::new(
                record.name.clone(),
                credentials,
                Arc::clone(&self.share_connector),
            )),
        };

        debug!(endpoint = %record.id, kind = %kind, "Built endpoint");
        Ok(Arc::new(GuardedEndpoint::new(inner, self.limiter(&record.id))))
    }

    /// Shared limiter for one endpoint record.
    pub fn limiter(&self, endpoint_id: &str) -> Arc<Semaphore> {
        let mut limiters = self.limiters.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            limiters
                .entry(endpoint_id.to_string())
                .or_insert_with(|| Arc::new(Semaphore::new(self.limits.max_concurrent))),
        )
    }
}

impl Default for EndpointFactory {
    fn default() -> Self {
        Self::new(EndpointLimits::default())
    }
}

impl EndpointResolver for EndpointFactory {
    fn resolve(&self, record: &EndpointRecord) -> Result<Arc<dyn ProtocolEndpoint>, EndpointError> {
        self.build(record)
    }
}
