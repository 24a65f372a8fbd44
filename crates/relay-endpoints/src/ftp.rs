//! FTP endpoint backed by the blocking `suppaftp` client.
//!
//! Each operation opens a passive-mode binary session on the blocking pool,
//! runs, and quits. Control and data sockets carry read and write timeouts,
//! so a stalled server fails the operation instead of pinning the thread.

use std::fs::File;
use std::io::ErrorKind;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use suppaftp::types::FileType;
use suppaftp::{FtpError, FtpStream, Mode};
use tracing::debug;

use relay_types::TransportKind;

use crate::credentials::Credentials;
use crate::endpoint::ProtocolEndpoint;
use crate::entry::{normalize_remote, path_prefixes, RemoteEntry};
use crate::error::EndpointError;

/// FTP server endpoint.
#[derive(Debug, Clone)]
pub struct FtpEndpoint {
    name: String,
    credentials: Arc<Credentials>,
    io_timeout: Duration,
}

impl FtpEndpoint {
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

    /// Run `op` on a fresh session inside the blocking pool.
    async fn with_session<T, F>(&self, op: F) -> Result<T, EndpointError>
    where
        F: FnOnce(&mut FtpStream) -> Result<T, EndpointError> + Send + 'static,
        T: Send + 'static,
    {
        let credentials = Arc::clone(&self.credentials);
        let timeout = self.io_timeout;
        tokio::task::spawn_blocking(move || {
            let mut ftp = open_session(&credentials, timeout)?;
            let result = op(&mut ftp);
            if let Err(e) = ftp.quit() {
                debug!(host = %credentials.host, error = %e, "FTP quit failed");
            }
            result
        })
        .await?
    }
}

const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(300);

fn resolve(credentials: &Credentials) -> Result<SocketAddr, EndpointError> {
    (credentials.host.as_str(), credentials.port)
        .to_socket_addrs()
        .map_err(|e| EndpointError::connection(&credentials.host, e))?
        .next()
        .ok_or_else(|| EndpointError::connection(&credentials.host, "no address found"))
}

/// Passive data connections get the same bounds as the control socket.
fn data_stream(addr: &SocketAddr, timeout: Duration) -> Result<TcpStream, FtpError> {
    let stream = TcpStream::connect_timeout(addr, timeout).map_err(FtpError::ConnectionError)?;
    stream
        .set_read_timeout(Some(timeout))
        .map_err(FtpError::ConnectionError)?;
    stream
        .set_write_timeout(Some(timeout))
        .map_err(FtpError::ConnectionError)?;
    Ok(stream)
}

fn open_session(credentials: &Credentials, timeout: Duration) -> Result<FtpStream, EndpointError> {
    let ftp = FtpStream::connect_timeout(resolve(credentials)?, timeout)
        .map_err(|e| EndpointError::connection(&credentials.host, e))?;
    let control = ftp.get_ref();
    control
        .set_read_timeout(Some(timeout))
        .and_then(|_| control.set_write_timeout(Some(timeout)))
        .map_err(|e| EndpointError::connection(&credentials.host, e))?;
    let mut ftp = ftp.passive_stream_builder(move |addr| data_stream(&addr, timeout));

    let user = credentials.username.as_deref().unwrap_or("anonymous");
    ftp.login(user, credentials.password()).map_err(|e| {
        EndpointError::authentication(format!("{}@{}: {}", user, credentials.host, e))
    })?;

    ftp.set_mode(Mode::Passive);
    ftp.transfer_type(FileType::Binary)
        .map_err(|e| EndpointError::protocol("TYPE I", &credentials.host, e))?;
    Ok(ftp)
}

/// Parse `LIST` output lines, skipping ones the parser does not understand.
fn parse_listing(folder: &str, lines: &[String]) -> Vec<RemoteEntry> {
    lines
        .iter()
        .filter_map(|line| match line.parse::<suppaftp::list::File>() {
            Ok(file) => Some(file),
            Err(e) => {
                debug!(line = %line, error = ?e, "Skipping unparsable LIST line");
                None
            }
        })
        .filter(|file| file.name() != "." && file.name() != "..")
        .map(|file| {
            let modified: DateTime<Utc> = file.modified().into();
            let entry = if file.is_directory() {
                RemoteEntry::directory(folder, file.name())
            } else {
                RemoteEntry::file(folder, file.name()).with_size(file.size() as u64)
            };
            entry.with_modified(modified)
        })
        .collect()
}

/// Create every missing segment of `path`, then return to the starting directory.
fn make_dirs(ftp: &mut FtpStream, path: &str) -> Result<(), EndpointError> {
    let home = ftp
        .pwd()
        .map_err(|e| EndpointError::protocol("PWD", path, e))?;

    for prefix in path_prefixes(path) {
        if ftp.cwd(&prefix).is_ok() {
            continue;
        }
        if let Err(e) = ftp.mkdir(&prefix) {
            // Another client may have created it meanwhile.
            if ftp.cwd(&prefix).is_err() {
                return Err(EndpointError::protocol("MKD", prefix, e));
            }
        }
    }

    ftp.cwd(&home)
        .map_err(|e| EndpointError::protocol("CWD", home.clone(), e))
}

fn io_error(e: std::io::Error) -> FtpError {
    FtpError::ConnectionError(e)
}

/// Map a command failure, reporting an expired socket timeout as a stall.
fn command_error(
    operation: &'static str,
    path: impl Into<String>,
    timeout: Duration,
    err: FtpError,
) -> EndpointError {
    match err {
        FtpError::ConnectionError(e)
            if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) =>
        {
            EndpointError::io(operation, timeout, e)
        }
        other => EndpointError::protocol(operation, path, other),
    }
}

#[async_trait]
impl ProtocolEndpoint for FtpEndpoint {
    fn kind(&self) -> TransportKind {
        TransportKind::Ftp
    }

    fn display_name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> Result<(), EndpointError> {
        self.with_session(|_| Ok(())).await
    }

    async fn read_dir(&self, folder: &str) -> Result<Vec<RemoteEntry>, EndpointError> {
        let folder = normalize_remote(folder);
        let timeout = self.io_timeout;
        self.with_session(move |ftp| {
            let lines = ftp
                .list(Some(folder.as_str()))
                .map_err(|e| command_error("LIST", folder.clone(), timeout, e))?;
            Ok(parse_listing(&folder, &lines))
        })
        .await
    }

    async fn download(&self, remote: &str, local: &Path) -> Result<u64, EndpointError> {
        let remote = normalize_remote(remote);
        let local: PathBuf = local.to_path_buf();
        let timeout = self.io_timeout;
        self.with_session(move |ftp| {
            let mut file = File::create(&local)?;
            ftp.retr(&remote, |reader| {
                std::io::copy(reader, &mut file).map_err(io_error)
            })
            .map_err(|e| command_error("RETR", remote.clone(), timeout, e))
        })
        .await
    }

    async fn upload(&self, local: &Path, remote: &str) -> Result<(), EndpointError> {
        let remote = normalize_remote(remote);
        let local: PathBuf = local.to_path_buf();
        let timeout = self.io_timeout;
        self.with_session(move |ftp| {
            let mut file = File::open(&local)?;
            ftp.put_file(&remote, &mut file)
                .map(|_| ())
                .map_err(|e| command_error("STOR", remote.clone(), timeout, e))
        })
        .await
    }

    async fn delete(&self, remote: &str) -> Result<(), EndpointError> {
        let remote = normalize_remote(remote);
        self.with_session(move |ftp| {
            ftp.rm(&remote)
                .map_err(|e| EndpointError::protocol("DELE", remote.clone(), e))
        })
        .await
    }

    async fn ensure_directory(&self, remote: &str) -> Result<(), EndpointError> {
        let remote = normalize_remote(remote);
        self.with_session(move |ftp| make_dirs(ftp, &remote)).await
    }

    async fn delete_if_empty(&self, remote: &str) -> Result<bool, EndpointError> {
        let remote = normalize_remote(remote);
        self.with_session(move |ftp| {
            let lines = ftp
                .list(Some(remote.as_str()))
                .map_err(|e| EndpointError::protocol("LIST", remote.clone(), e))?;
            if !parse_listing(&remote, &lines).is_empty() {
                debug!(folder = %remote, "Folder not empty, keeping it");
                return Ok(false);
            }
            ftp.rmdir(&remote)
                .map_err(|e| EndpointError::protocol("RMD", remote.clone(), e))?;
            Ok(true)
        })
        .await
    }

    async fn test_reachable(&self, folder: &str) -> Result<bool, EndpointError> {
        let folder = normalize_remote(folder);
        self.with_session(move |ftp| Ok(ftp.cwd(&folder).is_ok()))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_unix_listing() {
        let lines = vec![
            "drwxr-xr-x    2 ftp      ftp          4096 Mar 01 10:00 archive".to_string(),
            "-rw-r--r--    1 ftp      ftp          1024 Mar 01 10:00 report.csv".to_string(),
            "drwxr-xr-x    2 ftp      ftp          4096 Mar 01 10:00 .".to_string(),
            "total 12".to_string(),
        ];
        let entries = parse_listing("/out", &lines);
        assert_eq!(entries.len(), 2);
        assert!(entries[0].is_dir());
        assert_eq!(entries[0].path, "/out/archive");
        assert!(entries[1].is_file());
        assert_eq!(entries[1].path, "/out/report.csv");
        assert_eq!(entries[1].size, Some(1024));
        assert!(entries[1].last_modified.is_some());
    }

    #[test]
    fn test_stalled_transfer_is_timeout() {
        let stalled = FtpError::ConnectionError(std::io::Error::new(ErrorKind::WouldBlock, "stalled"));
        let err = command_error("RETR", "/out/a.csv", Duration::from_secs(30), stalled);
        assert!(matches!(
            err,
            EndpointError::Timeout {
                operation: "RETR",
                secs: 30
            }
        ));

        let refused = FtpError::ConnectionError(std::io::Error::new(ErrorKind::ConnectionReset, "reset"));
        let err = command_error("RETR", "/out/a.csv", Duration::from_secs(30), refused);
        assert!(matches!(err, EndpointError::Protocol { operation: "RETR", .. }));
    }

    #[test]
    fn test_kind() {
        let creds = Credentials {
            host: "ftp.example.com".to_string(),
            port: 21,
            username: None,
            secret: None,
            private_key_path: None,
        };
        let endpoint = FtpEndpoint::new("ftp", creds);
        assert_eq!(endpoint.kind(), TransportKind::Ftp);
        assert_eq!(endpoint.display_name(), "ftp");
    }
}
