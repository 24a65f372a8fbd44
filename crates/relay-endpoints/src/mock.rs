//! In-memory endpoint for tests and dry runs.
//!
//! Holds a tree of files and directories, records every call and can be
//! told to fail a given operation on a given path.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use relay_types::{EndpointRecord, TransportKind};

use crate::endpoint::ProtocolEndpoint;
use crate::entry::{file_name_remote, normalize_remote, parent_remote, path_prefixes, RemoteEntry};
use crate::error::EndpointError;
use crate::factory::EndpointResolver;

#[derive(Debug, Clone)]
struct MockFile {
    content: Vec<u8>,
    modified: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct MockState {
    files: BTreeMap<String, MockFile>,
    dirs: BTreeSet<String>,
    failures: HashSet<(String, String)>,
    calls: Vec<(String, String)>,
}

/// In-memory [`ProtocolEndpoint`].
#[derive(Debug)]
pub struct MockEndpoint {
    name: String,
    kind: TransportKind,
    delay: Option<Duration>,
    stall: Option<Duration>,
    state: Mutex<MockState>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: AtomicUsize,
}

impl MockEndpoint {
    /// Create an empty endpoint containing only the root directory.
    pub fn new(name: impl Into<String>) -> Self {
        let mut state = MockState::default();
        state.dirs.insert("/".to_string());
        Self {
            name: name.into(),
            kind: TransportKind::Sftp,
            delay: None,
            stall: None,
            state: Mutex::new(state),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Report a different transport kind.
    pub fn with_kind(mut self, kind: TransportKind) -> Self {
        self.kind = kind;
        self
    }

    /// Sleep this long inside every operation.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Run downloads on the blocking pool the way socket transports do:
    /// each one writes the local file after `stall`, then fails as if the
    /// socket read timeout had fired.
    pub fn with_stalled_downloads(mut self, stall: Duration) -> Self {
        self.stall = Some(stall);
        self
    }

    /// Add a file modified now, creating its parent directories.
    pub fn add_file(&self, path: &str, content: &[u8]) {
        self.add_file_modified(path, content, Utc::now());
    }

    /// Add a file with an explicit modification time.
    pub fn add_file_modified(&self, path: &str, content: &[u8], modified: DateTime<Utc>) {
        let path = normalize_remote(path);
        let mut state = self.state();
        if let Some(parent) = parent_remote(&path) {
            for prefix in path_prefixes(&parent) {
                state.dirs.insert(prefix);
            }
        }
        state.files.insert(
            path,
            MockFile {
                content: content.to_vec(),
                modified,
            },
        );
    }

    /// Add an empty directory and its parents.
    pub fn add_dir(&self, path: &str) {
        let mut state = self.state();
        for prefix in path_prefixes(path) {
            state.dirs.insert(prefix);
        }
    }

    /// Make `operation` fail for `path` until cleared.
    pub fn fail_on(&self, operation: &str, path: &str) {
        self.state()
            .failures
            .insert((operation.to_string(), normalize_remote(path)));
    }

    pub fn clear_failures(&self) {
        self.state().failures.clear();
    }

    /// Content of a file, if present.
    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.state()
            .files
            .get(&normalize_remote(path))
            .map(|f| f.content.clone())
    }

    pub fn has_file(&self, path: &str) -> bool {
        self.state().files.contains_key(&normalize_remote(path))
    }

    pub fn has_dir(&self, path: &str) -> bool {
        self.state().dirs.contains(&normalize_remote(path))
    }

    /// All file paths, sorted.
    pub fn file_paths(&self) -> Vec<String> {
        self.state().files.keys().cloned().collect()
    }

    /// Paths passed to `operation`, in call order.
    pub fn calls_for(&self, operation: &str) -> Vec<String> {
        self.state()
            .calls
            .iter()
            .filter(|(op, _)| op == operation)
            .map(|(_, path)| path.clone())
            .collect()
    }

    /// Highest number of operations observed running at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn begin(&self, operation: &'static str, path: &str) -> Result<InFlight, EndpointError> {
        let path = normalize_remote(path);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        let guard = InFlight(Arc::clone(&self.in_flight));

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state();
        state.calls.push((operation.to_string(), path.clone()));
        if state.failures.contains(&(operation.to_string(), path.clone())) {
            return Err(EndpointError::protocol(operation, path, "injected failure"));
        }
        Ok(guard)
    }
}

struct InFlight(Arc<AtomicUsize>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ProtocolEndpoint for MockEndpoint {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    fn display_name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> Result<(), EndpointError> {
        let _op = self.begin("connect", "/").await?;
        Ok(())
    }

    async fn read_dir(&self, folder: &str) -> Result<Vec<RemoteEntry>, EndpointError> {
        let _op = self.begin("read_dir", folder).await?;
        let folder = normalize_remote(folder);
        let state = self.state();
        if !state.dirs.contains(&folder) {
            return Err(EndpointError::NotFound(folder));
        }

        let in_folder = |path: &String| parent_remote(path).as_deref() == Some(folder.as_str());
        let mut entries: Vec<RemoteEntry> = state
            .dirs
            .iter()
            .filter(|d| in_folder(*d))
            .map(|d| RemoteEntry::directory(&folder, file_name_remote(d)))
            .collect();
        entries.extend(state.files.iter().filter(|(p, _)| in_folder(*p)).map(|(p, f)| {
            RemoteEntry::file(&folder, file_name_remote(p))
                .with_modified(f.modified)
                .with_size(f.content.len() as u64)
        }));
        Ok(entries)
    }

    async fn download(&self, remote: &str, local: &Path) -> Result<u64, EndpointError> {
        let op = self.begin("download", remote).await?;
        let content = self
            .file(remote)
            .ok_or_else(|| EndpointError::NotFound(remote.to_string()))?;
        if let Some(stall) = self.stall {
            let local = local.to_path_buf();
            return tokio::task::spawn_blocking(move || -> Result<u64, EndpointError> {
                let _op = op;
                std::thread::sleep(stall);
                std::fs::write(&local, &content)?;
                Err(EndpointError::Timeout {
                    operation: "download",
                    secs: stall.as_secs(),
                })
            })
            .await?;
        }
        let _op = op;
        tokio::fs::write(local, &content).await?;
        Ok(content.len() as u64)
    }

    async fn upload(&self, local: &Path, remote: &str) -> Result<(), EndpointError> {
        let _op = self.begin("upload", remote).await?;
        let remote = normalize_remote(remote);
        if let Some(parent) = parent_remote(&remote) {
            if !self.has_dir(&parent) {
                return Err(EndpointError::protocol("upload", remote, "parent directory missing"));
            }
        }
        let content = tokio::fs::read(local).await?;
        self.state().files.insert(
            remote,
            MockFile {
                content,
                modified: Utc::now(),
            },
        );
        Ok(())
    }

    async fn delete(&self, remote: &str) -> Result<(), EndpointError> {
        let _op = self.begin("delete", remote).await?;
        self.state()
            .files
            .remove(&normalize_remote(remote))
            .map(|_| ())
            .ok_or_else(|| EndpointError::NotFound(remote.to_string()))
    }

    async fn ensure_directory(&self, remote: &str) -> Result<(), EndpointError> {
        let _op = self.begin("ensure_directory", remote).await?;
        self.add_dir(remote);
        Ok(())
    }

    async fn delete_if_empty(&self, remote: &str) -> Result<bool, EndpointError> {
        let _op = self.begin("delete_if_empty", remote).await?;
        let folder = normalize_remote(remote);
        let mut state = self.state();
        if !state.dirs.contains(&folder) {
            return Ok(false);
        }
        let has_children = state
            .files
            .keys()
            .chain(state.dirs.iter())
            .any(|p| parent_remote(p).as_deref() == Some(folder.as_str()));
        if has_children {
            return Ok(false);
        }
        state.dirs.remove(&folder);
        Ok(true)
    }

    async fn test_reachable(&self, folder: &str) -> Result<bool, EndpointError> {
        let _op = self.begin("test_reachable", folder).await?;
        Ok(self.has_dir(folder))
    }
}

/// Resolver that hands out pre-registered endpoints by record id.
///
/// The record's declared transport is still parsed, so unknown kinds fail
/// the same way they do with the real factory.
#[derive(Default)]
pub struct MockResolver {
    endpoints: Mutex<HashMap<String, Arc<dyn ProtocolEndpoint>>>,
}

impl MockResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, endpoint_id: impl Into<String>, endpoint: Arc<dyn ProtocolEndpoint>) -> Self {
        self.insert(endpoint_id, endpoint);
        self
    }

    pub fn insert(&self, endpoint_id: impl Into<String>, endpoint: Arc<dyn ProtocolEndpoint>) {
        self.endpoints
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(endpoint_id.into(), endpoint);
    }
}

impl EndpointResolver for MockResolver {
    fn resolve(&self, record: &EndpointRecord) -> Result<Arc<dyn ProtocolEndpoint>, EndpointError> {
        record
            .transport()
            .map_err(|e| EndpointError::UnsupportedTransport(e.0))?;
        self.endpoints
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&record.id)
            .cloned()
            .ok_or_else(|| EndpointError::Connection(format!("no endpoint registered for {}", record.id)))
    }
}
