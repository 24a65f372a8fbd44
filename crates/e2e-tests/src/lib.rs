//! End-to-end test infrastructure for file-relay.
//!
//! Provides a shared TestHarness wiring a RocksDB store, the real endpoint
//! factory and two network shares rooted in a temporary directory.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use relay_endpoints::{EndpointFactory, EndpointLimits};
use relay_orchestrator::{TransferConfig, TransferOrchestrator, TransferService};
use relay_storage::{Storage, TransferStore};
use relay_types::{EndpointRecord, ScheduleKind, TimeSlot, TransferTask};

/// Endpoint id of the source share.
pub const SOURCE: &str = "source-share";
/// Endpoint id of the destination share.
pub const DESTINATION: &str = "destination-share";

/// Shared test harness for E2E tests.
pub struct TestHarness {
    /// Keeps temp dir alive for the lifetime of the harness
    pub _temp_dir: tempfile::TempDir,
    pub storage: Arc<Storage>,
    /// Local directory backing the source share
    pub source_root: PathBuf,
    /// Local directory backing the destination share
    pub destination_root: PathBuf,
    pub orchestrator: Arc<TransferOrchestrator>,
}

impl TestHarness {
    /// Create a harness with both share endpoints registered.
    pub fn new() -> Self {
        Self::with_config(|config| config)
    }

    /// Create a harness, adjusting the transfer config first.
    pub fn with_config(adjust: impl FnOnce(TransferConfig) -> TransferConfig) -> Self {
        let temp_dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        let storage = Arc::new(
            Storage::open(&temp_dir.path().join("db")).expect("Failed to open test storage"),
        );

        let source_root = temp_dir.path().join("source");
        let destination_root = temp_dir.path().join("destination");
        let staging = temp_dir.path().join("staging");
        for dir in [&source_root, &destination_root, &staging] {
            fs::create_dir_all(dir).expect("Failed to create share dir");
        }

        storage
            .put_endpoint(&share_endpoint(SOURCE, &source_root))
            .expect("Failed to store source endpoint");
        storage
            .put_endpoint(&share_endpoint(DESTINATION, &destination_root))
            .expect("Failed to store destination endpoint");

        let config = adjust(TransferConfig::default().with_temp_dir(&staging));
        let factory = EndpointFactory::new(EndpointLimits {
            max_concurrent: 2,
            io_timeout: Duration::from_secs(10),
        });
        let orchestrator = Arc::new(TransferOrchestrator::new(
            storage.clone(),
            Arc::new(factory),
            config,
        ));

        Self {
            _temp_dir: temp_dir,
            storage,
            source_root,
            destination_root,
            orchestrator,
        }
    }

    pub fn service(&self) -> TransferService {
        TransferService::new(self.orchestrator.clone())
    }

    /// Store a task and return it as stored.
    pub fn put_task(&self, task: TransferTask) -> TransferTask {
        self.storage.put_task(&task).expect("Failed to store task");
        self.storage
            .load_task(&task.id)
            .expect("Failed to load task")
            .expect("Task vanished")
    }

    pub fn write_source(&self, rel: &str, contents: &str) -> PathBuf {
        write_file(&self.source_root, rel, contents)
    }

    pub fn source_exists(&self, rel: &str) -> bool {
        self.source_root.join(rel).exists()
    }

    pub fn read_destination(&self, rel: &str) -> Option<String> {
        fs::read_to_string(self.destination_root.join(rel)).ok()
    }

    /// Files under the destination root, relative and sorted.
    pub fn destination_files(&self) -> Vec<String> {
        let mut out = Vec::new();
        collect_files(&self.destination_root, &self.destination_root, &mut out);
        out.sort();
        out
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Network-share endpoint record rooted at `root`.
pub fn share_endpoint(id: &str, root: &Path) -> EndpointRecord {
    EndpointRecord::new(id, id, "NETWORK", root.to_string_lossy())
}

/// Task between the harness shares, `/in` to `/out`, on a daily 09:00 slot.
pub fn create_test_task(id: &str) -> TransferTask {
    TransferTask::new(id, id, SOURCE, DESTINATION, ScheduleKind::Daily)
        .with_folders("/in", "/out")
        .with_time_slots([TimeSlot::hms(9, 0, 0).expect("valid slot")])
}

/// Write a file, creating parent directories.
pub fn write_file(root: &Path, rel: &str, contents: &str) -> PathBuf {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("Failed to create parent dir");
    }
    fs::write(&path, contents).expect("Failed to write file");
    path
}

/// Backdate a file's modification time.
pub fn set_age(path: &Path, age: Duration) {
    let file = fs::File::options()
        .write(true)
        .open(path)
        .expect("Failed to open file");
    file.set_modified(SystemTime::now() - age)
        .expect("Failed to set modification time");
}

fn collect_files(root: &Path, dir: &Path, out: &mut Vec<String>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_files(root, &path, out);
        } else if let Ok(rel) = path.strip_prefix(root) {
            out.push(rel.to_string_lossy().replace('\\', "/"));
        }
    }
}
