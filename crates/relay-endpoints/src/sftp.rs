//! SFTP endpoint backed by `ssh2`.
//!
//! Authentication prefers the configured private key and falls back to the
//! password. Every operation runs on its own session inside the blocking pool,
//! with a session timeout bounding how long any single read or write may
//! stall.

use std::fs::File;
use std::io;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;
use ssh2::{ErrorCode, Session, Sftp};
use tracing::{debug, warn};

use relay_types::TransportKind;

use crate::credentials::Credentials;
use crate::endpoint::ProtocolEndpoint;
use crate::entry::{normalize_remote, path_prefixes, RemoteEntry};
use crate::error::EndpointError;

/// SFTP status code for a missing path.
const SFTP_NO_SUCH_FILE: i32 = 2;

/// libssh2 code for an expired session timeout.
const SESSION_TIMEOUT: i32 = -9;

const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(300);

/// SFTP server endpoint.
#[derive(Debug, Clone)]
pub struct SftpEndpoint {
    name: String,
    credentials: Arc<Credentials>,
    io_timeout: Duration,
}

impl SftpEndpoint {
    pub fn new(name: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            name: name.into(),
            credentials: Arc::new(credentials),
            io_timeout: DEFAULT_IO_TIMEOUT,
        }
    }

    /// Fail connects, reads and writes that stall longer than `timeout`.
    pub fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = timeout;
        self
    }

    /// Run `op` against a fresh SFTP channel inside the blocking pool.
    async fn with_sftp<T, F>(&self, op: F) -> Result<T, EndpointError>
    where
        F: FnOnce(&Sftp) -> Result<T, EndpointError> + Send + 'static,
        T: Send + 'static,
    {
        let credentials = Arc::clone(&self.credentials);
        let timeout = self.io_timeout;
        tokio::task::spawn_blocking(move || {
            let session = open_session(&credentials, timeout)?;
            let sftp = session
                .sftp()
                .map_err(|e| EndpointError::connection(&credentials.host, e))?;
            let result = op(&sftp);
            drop(sftp);
            if let Err(e) = session.disconnect(None, "done", None) {
                debug!(host = %credentials.host, error = %e, "SSH disconnect failed");
            }
            result
        })
        .await?
    }
}

fn resolve(credentials: &Credentials) -> Result<SocketAddr, EndpointError> {
    (credentials.host.as_str(), credentials.port)
        .to_socket_addrs()
        .map_err(|e| EndpointError::connection(&credentials.host, e))?
        .next()
        .ok_or_else(|| EndpointError::connection(&credentials.host, "no address found"))
}

fn open_session(credentials: &Credentials, timeout: Duration) -> Result<Session, EndpointError> {
    let tcp = TcpStream::connect_timeout(&resolve(credentials)?, timeout)
        .map_err(|e| EndpointError::connection(&credentials.host, e))?;

    let mut session =
        Session::new().map_err(|e| EndpointError::connection(&credentials.host, e))?;
    session.set_tcp_stream(tcp);
    session.set_timeout(u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX));
    session
        .handshake()
        .map_err(|e| EndpointError::connection(&credentials.host, e))?;

    let user = credentials.username.as_deref().ok_or_else(|| {
        EndpointError::authentication(format!("{}: SFTP requires a username", credentials.host))
    })?;

    let auth = match (&credentials.private_key_path, &credentials.secret) {
        (Some(key), _) => session.userauth_pubkey_file(user, None, key, None),
        (None, Some(_)) => session.userauth_password(user, credentials.password()),
        (None, None) => {
            return Err(EndpointError::authentication(format!(
                "{}@{}: no password or private key configured",
                user, credentials.host
            )))
        }
    };
    auth.map_err(|e| EndpointError::authentication(format!("{}@{}: {}", user, credentials.host, e)))?;

    if !session.authenticated() {
        return Err(EndpointError::authentication(format!(
            "{}@{}: server did not accept the credentials",
            user, credentials.host
        )));
    }
    Ok(session)
}

fn is_missing(err: &ssh2::Error) -> bool {
    matches!(err.code(), ErrorCode::SFTP(SFTP_NO_SUCH_FILE))
}

fn is_timeout(err: &ssh2::Error) -> bool {
    matches!(err.code(), ErrorCode::Session(SESSION_TIMEOUT))
}

/// Map an SFTP call failure on `path`.
fn sftp_error(operation: &'static str, path: &str, timeout: Duration, err: ssh2::Error) -> EndpointError {
    if is_missing(&err) {
        EndpointError::NotFound(path.to_string())
    } else if is_timeout(&err) {
        EndpointError::Timeout {
            operation,
            secs: timeout.as_secs(),
        }
    } else {
        EndpointError::protocol(operation, path, err)
    }
}

fn entries_of(sftp: &Sftp, folder: &str, timeout: Duration) -> Result<Vec<RemoteEntry>, EndpointError> {
    let listing = sftp
        .readdir(Path::new(folder))
        .map_err(|e| sftp_error("readdir", folder, timeout, e))?;

    Ok(listing
        .into_iter()
        .filter_map(|(path, stat)| {
            let name = path.file_name()?.to_string_lossy().to_string();
            if name == "." || name == ".." {
                return None;
            }
            let entry = if stat.is_dir() {
                RemoteEntry::directory(folder, name)
            } else {
                let mut entry = RemoteEntry::file(folder, name);
                entry.size = stat.size;
                entry
            };
            let modified = stat
                .mtime
                .and_then(|secs| DateTime::from_timestamp(secs as i64, 0));
            Some(RemoteEntry {
                last_modified: modified,
                ..entry
            })
        })
        .collect())
}

/// Create the path one segment at a time, tolerating segments that already exist.
fn make_dirs(sftp: &Sftp, path: &str) -> Result<(), EndpointError> {
    for prefix in path_prefixes(path) {
        let segment = Path::new(&prefix);
        if sftp.stat(segment).map(|s| s.is_dir()).unwrap_or(false) {
            continue;
        }
        if let Err(e) = sftp.mkdir(segment, 0o755) {
            if sftp.stat(segment).map(|s| s.is_dir()).unwrap_or(false) {
                continue;
            }
            warn!(folder = %prefix, error = %e, "Could not create SFTP folder");
            return Err(EndpointError::protocol("mkdir", prefix, e));
        }
    }
    Ok(())
}

#[async_trait]
impl ProtocolEndpoint for SftpEndpoint {
    fn kind(&self) -> TransportKind {
        TransportKind::Sftp
    }

    fn display_name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> Result<(), EndpointError> {
        self.with_sftp(|_| Ok(())).await
    }

    async fn read_dir(&self, folder: &str) -> Result<Vec<RemoteEntry>, EndpointError> {
        let folder = normalize_remote(folder);
        let timeout = self.io_timeout;
        self.with_sftp(move |sftp| entries_of(sftp, &folder, timeout))
            .await
    }

    async fn download(&self, remote: &str, local: &Path) -> Result<u64, EndpointError> {
        let remote = normalize_remote(remote);
        let local: PathBuf = local.to_path_buf();
        let timeout = self.io_timeout;
        self.with_sftp(move |sftp| {
            let mut source = sftp
                .open(Path::new(&remote))
                .map_err(|e| sftp_error("open", &remote, timeout, e))?;
            let mut target = File::create(&local)?;
            io::copy(&mut source, &mut target).map_err(|e| EndpointError::io("download", timeout, e))
        })
        .await
    }

    async fn upload(&self, local: &Path, remote: &str) -> Result<(), EndpointError> {
        let remote = normalize_remote(remote);
        let local: PathBuf = local.to_path_buf();
        let timeout = self.io_timeout;
        self.with_sftp(move |sftp| {
            let mut source = File::open(&local)?;
            let mut target = sftp
                .create(Path::new(&remote))
                .map_err(|e| sftp_error("create", &remote, timeout, e))?;
            io::copy(&mut source, &mut target).map_err(|e| EndpointError::io("upload", timeout, e))?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, remote: &str) -> Result<(), EndpointError> {
        let remote = normalize_remote(remote);
        self.with_sftp(move |sftp| {
            sftp.unlink(Path::new(&remote))
                .map_err(|e| EndpointError::protocol("unlink", remote.clone(), e))
        })
        .await
    }

    async fn ensure_directory(&self, remote: &str) -> Result<(), EndpointError> {
        let remote = normalize_remote(remote);
        self.with_sftp(move |sftp| make_dirs(sftp, &remote)).await
    }

    async fn delete_if_empty(&self, remote: &str) -> Result<bool, EndpointError> {
        let remote = normalize_remote(remote);
        let timeout = self.io_timeout;
        self.with_sftp(move |sftp| {
            if !entries_of(sftp, &remote, timeout)?.is_empty() {
                debug!(folder = %remote, "Folder not empty, keeping it");
                return Ok(false);
            }
            sftp.rmdir(Path::new(&remote))
                .map_err(|e| EndpointError::protocol("rmdir", remote.clone(), e))?;
            Ok(true)
        })
        .await
    }

    async fn test_reachable(&self, folder: &str) -> Result<bool, EndpointError> {
        let folder = normalize_remote(folder);
        self.with_sftp(move |sftp| {
            Ok(sftp
                .stat(Path::new(&folder))
                .map(|s| s.is_dir())
                .unwrap_or(false))
        })
        .await
    }
}
