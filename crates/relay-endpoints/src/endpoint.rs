//! Protocol endpoint trait definition.
//!
//! The `ProtocolEndpoint` trait is the single capability interface the
//! transfer orchestrator talks to. Each transport (FTP, SFTP, network share)
//! implements it once; the orchestrator never branches on the transport.

use std::collections::VecDeque;
use std::path::Path;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};

use relay_types::TransportKind;

use crate::entry::{normalize_remote, RemoteEntry};
use crate::error::EndpointError;

/// Lazily produced stream of file entries.
pub type FileStream<'a> = BoxStream<'a, Result<RemoteEntry, EndpointError>>;

/// Operations every transport supports.
///
/// Implementations open a short-lived connection per operation; nothing is
/// pooled between calls.
///
/// # Example
///
/// ```rust,ignore
/// use futures::TryStreamExt;
///
/// let files: Vec<_> = endpoint.list_files("/outgoing", true).try_collect().await?;
/// for file in files {
///     endpoint.download(&file.path, &local.join(&file.name)).await?;
/// }
/// ```
#[async_trait]
pub trait ProtocolEndpoint: Send + Sync {
    /// Transport this endpoint speaks.
    fn kind(&self) -> TransportKind;

    /// Human-readable name for logs.
    fn display_name(&self) -> &str;

    /// Open and authenticate a connection, then release it.
    async fn connect(&self) -> Result<(), EndpointError>;

    /// List one directory level. `.` and `..` are never returned.
    async fn read_dir(&self, folder: &str) -> Result<Vec<RemoteEntry>, EndpointError>;

    /// Depth-first stream of the files under `folder`.
    ///
    /// Entries of each directory are visited in name order, files before
    /// subdirectories. Only one directory level is held in memory at a time.
    /// A listing error is yielded once and ends the stream.
    fn list_files<'a>(&'a self, folder: &'a str, recursive: bool) -> FileStream<'a> {
        walk(self, folder, recursive)
    }

    /// Download `remote` into the local file at `local`, returning the byte count.
    async fn download(&self, remote: &str, local: &Path) -> Result<u64, EndpointError>;

    /// Upload the local file at `local` to `remote`, overwriting it.
    async fn upload(&self, local: &Path, remote: &str) -> Result<(), EndpointError>;

    /// Delete the remote file.
    async fn delete(&self, remote: &str) -> Result<(), EndpointError>;

    /// Create `remote` and any missing parents.
    async fn ensure_directory(&self, remote: &str) -> Result<(), EndpointError>;

    /// Remove `remote` if it holds no entries. Returns whether it was removed.
    async fn delete_if_empty(&self, remote: &str) -> Result<bool, EndpointError>;

    /// Check that the server is reachable and `folder` exists.
    async fn test_reachable(&self, folder: &str) -> Result<bool, EndpointError>;
}

struct WalkState {
    pending_dirs: Vec<String>,
    ready: VecDeque<RemoteEntry>,
    recursive: bool,
    finished: bool,
}

/// Depth-first walk over [`ProtocolEndpoint::read_dir`].
pub fn walk<'a, E>(endpoint: &'a E, root: &str, recursive: bool) -> FileStream<'a>
where
    E: ProtocolEndpoint + ?Sized,
{
    let state = WalkState {
        pending_dirs: vec![normalize_remote(root)],
        ready: VecDeque::new(),
        recursive,
        finished: false,
    };

    stream::unfold(state, move |mut state| async move {
        loop {
            if let Some(file) = state.ready.pop_front() {
                return Some((Ok(file), state));
            }
            if state.finished {
                return None;
            }
            let dir = state.pending_dirs.pop()?;

            match endpoint.read_dir(&dir).await {
                Ok(mut entries) => {
                    entries.sort_by(|a, b| a.name.cmp(&b.name));
                    let mut subdirs = Vec::new();
                    for entry in entries {
                        if entry.is_dir() {
                            if state.recursive {
                                subdirs.push(entry.path);
                            }
                        } else {
                            state.ready.push_back(entry);
                        }
                    }
                    // Reversed so the first subdirectory is popped next.
                    state.pending_dirs.extend(subdirs.into_iter().rev());
                }
                Err(e) => {
                    state.finished = true;
                    state.pending_dirs.clear();
                    return Some((Err(e), state));
                }
            }
        }
    })
    .boxed()
}
