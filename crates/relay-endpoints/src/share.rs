//! Network share endpoint.
//!
//! `host` names the share: a mount point for shares mounted ahead of time,
//! or a UNC path (`//server/share`) when a [`CifsMountConnector`] binds the
//! credentials per session. When the credentials carry a username every
//! operation runs inside a [`ShareSession`], which connects on creation and
//! disconnects on drop, and resolves paths beneath the root the connector
//! hands back.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info, warn};

use relay_types::TransportKind;

use crate::credentials::Credentials;
use crate::endpoint::ProtocolEndpoint;
use crate::entry::{normalize_remote, RemoteEntry};
use crate::error::EndpointError;

/// Establishes and releases authenticated access to a share.
pub trait ShareConnector: Send + Sync {
    /// Bind `username` and `secret` to `share` and return the local path
    /// its files are reached through.
    fn connect(
        &self,
        share: &Path,
        username: &str,
        secret: Option<&SecretString>,
    ) -> Result<PathBuf, EndpointError>;

    fn disconnect(&self, share: &Path, username: &str);
}

/// Connector for shares mounted ahead of time under the identity of the
/// mount. It cannot bind a password, so a configured secret is refused.
#[derive(Debug, Default, Clone, Copy)]
pub struct MountedShareConnector;

impl ShareConnector for MountedShareConnector {
    fn connect(
        &self,
        share: &Path,
        username: &str,
        secret: Option<&SecretString>,
    ) -> Result<PathBuf, EndpointError> {
        if secret.is_some() {
            return Err(EndpointError::authentication(format!(
                "{}@{}: a pre-mounted share cannot apply a password; set share_mount_dir to mount it per session",
                username,
                share.display()
            )));
        }
        if share.is_dir() {
            debug!(root = %share.display(), user = username, "Share root reachable");
            Ok(share.to_path_buf())
        } else {
            Err(EndpointError::Connection(format!(
                "share root {} is not mounted",
                share.display()
            )))
        }
    }

    fn disconnect(&self, _share: &Path, _username: &str) {}
}

struct CifsMount {
    point: PathBuf,
    sessions: usize,
}

/// Mounts a CIFS share with the session's credentials and unmounts it when
/// the last session on it ends.
///
/// The password reaches `mount.cifs` through the `PASSWD` environment
/// variable, never the command line.
pub struct CifsMountConnector {
    mount_base: PathBuf,
    mount_command: Vec<String>,
    unmount_command: Vec<String>,
    mounts: Mutex<HashMap<(PathBuf, String), CifsMount>>,
}

impl CifsMountConnector {
    pub fn new(mount_base: impl Into<PathBuf>) -> Self {
        Self {
            mount_base: mount_base.into(),
            mount_command: vec!["mount".to_string()],
            unmount_command: vec!["umount".to_string()],
            mounts: Mutex::new(HashMap::new()),
        }
    }

    /// Replace the mount and unmount programs (and their leading arguments).
    pub fn with_commands(mut self, mount: Vec<String>, unmount: Vec<String>) -> Self {
        self.mount_command = mount;
        self.unmount_command = unmount;
        self
    }

    /// Mount point for one share and user.
    pub fn mount_point(&self, share: &Path, username: &str) -> PathBuf {
        let label: String = format!("{}@{}", username, share.display())
            .trim_matches(|c: char| c == '/' || c == '\\')
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '@' { c } else { '_' })
            .collect();
        self.mount_base.join(label)
    }

    fn command(parts: &[String]) -> Result<Command, EndpointError> {
        let (program, args) = parts
            .split_first()
            .ok_or_else(|| EndpointError::Connection("share mount command is empty".to_string()))?;
        let mut command = Command::new(program);
        command.args(args);
        Ok(command)
    }

    fn mount(
        &self,
        share: &Path,
        point: &Path,
        username: &str,
        secret: Option<&SecretString>,
    ) -> Result<(), EndpointError> {
        std::fs::create_dir_all(point)?;
        let mut command = Self::command(&self.mount_command)?;
        command
            .arg("-t")
            .arg("cifs")
            .arg(share)
            .arg(point)
            .arg("-o")
            .arg(format!("username={username}"));
        if let Some(secret) = secret {
            command.env("PASSWD", secret.expose_secret());
        }

        let output = command
            .output()
            .map_err(|e| EndpointError::connection(&share.to_string_lossy(), e))?;
        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let target = format!("{}@{}", username, share.display());
        if stderr.contains("error(13)") || stderr.contains("Permission denied") {
            Err(EndpointError::authentication(format!("{target}: {stderr}")))
        } else {
            Err(EndpointError::connection(&target, stderr))
        }
    }

    fn unmount(&self, point: &Path) {
        let result = Self::command(&self.unmount_command).and_then(|mut command| {
            command
                .arg(point)
                .output()
                .map_err(|e| EndpointError::Connection(e.to_string()))
        });
        match result {
            Ok(output) if output.status.success() => {
                debug!(point = %point.display(), "Share unmounted");
            }
            Ok(output) => warn!(
                point = %point.display(),
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "Share unmount failed"
            ),
            Err(e) => warn!(point = %point.display(), error = %e, "Share unmount failed"),
        }
    }
}

impl ShareConnector for CifsMountConnector {
    fn connect(
        &self,
        share: &Path,
        username: &str,
        secret: Option<&SecretString>,
    ) -> Result<PathBuf, EndpointError> {
        let mut mounts = self.mounts.lock().unwrap_or_else(PoisonError::into_inner);
        let key = (share.to_path_buf(), username.to_string());
        if let Some(mount) = mounts.get_mut(&key) {
            mount.sessions += 1;
            return Ok(mount.point.clone());
        }

        let point = self.mount_point(share, username);
        self.mount(share, &point, username, secret)?;
        info!(share = %share.display(), point = %point.display(), user = username, "Share mounted");
        mounts.insert(
            key,
            CifsMount {
                point: point.clone(),
                sessions: 1,
            },
        );
        Ok(point)
    }

    fn disconnect(&self, share: &Path, username: &str) {
        let mut mounts = self.mounts.lock().unwrap_or_else(PoisonError::into_inner);
        let key = (share.to_path_buf(), username.to_string());
        let Some(mount) = mounts.get_mut(&key) else {
            return;
        };
        mount.sessions -= 1;
        if mount.sessions == 0 {
            if let Some(mount) = mounts.remove(&key) {
                self.unmount(&mount.point);
            }
        }
    }
}

/// Scoped access to a share. Released on drop, on every exit path.
pub struct ShareSession {
    connector: Arc<dyn ShareConnector>,
    share: PathBuf,
    root: PathBuf,
    username: Option<String>,
}

impl ShareSession {
    /// Connect when `credentials` carry a username; otherwise a no-op
    /// session rooted at the share itself.
    pub fn open(
        connector: Arc<dyn ShareConnector>,
        share: &Path,
        credentials: &Credentials,
    ) -> Result<Self, EndpointError> {
        let (root, username) = match credentials.username.as_deref() {
            Some(user) => (
                connector.connect(share, user, credentials.secret.as_ref())?,
                Some(user.to_string()),
            ),
            None => (share.to_path_buf(), None),
        };
        Ok(Self {
            connector,
            share: share.to_path_buf(),
            root,
            username,
        })
    }

    pub fn is_active(&self) -> bool {
        self.username.is_some()
    }

    /// Local directory the share's files live under for this session.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a remote path beneath the session root. Paths may not climb out of it.
    pub fn resolve(&self, remote: &str) -> Result<PathBuf, EndpointError> {
        resolve_under(&self.root, remote)
    }
}

impl Drop for ShareSession {
    fn drop(&mut self) {
        if let Some(user) = &self.username {
            self.connector.disconnect(&self.share, user);
            debug!(root = %self.share.display(), "Share session released");
        }
    }
}

fn resolve_under(root: &Path, remote: &str) -> Result<PathBuf, EndpointError> {
    let normalized = normalize_remote(remote);
    let mut resolved = root.to_path_buf();
    for component in Path::new(&normalized).components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::RootDir | Component::CurDir => {}
            Component::ParentDir | Component::Prefix(_) => {
                return Err(EndpointError::protocol(
                    "resolve",
                    remote,
                    "path escapes the share root",
                ))
            }
        }
    }
    Ok(resolved)
}

/// Endpoint for an SMB-style network share.
#[derive(Clone)]
pub struct ShareEndpoint {
    name: String,
    root: PathBuf,
    credentials: Arc<Credentials>,
    connector: Arc<dyn ShareConnector>,
}

impl std::fmt::Debug for ShareEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShareEndpoint")
            .field("name", &self.name)
            .field("root", &self.root)
            .finish()
    }
}

impl ShareEndpoint {
    pub fn new(
        name: impl Into<String>,
        credentials: Credentials,
        connector: Arc<dyn ShareConnector>,
    ) -> Self {
        Self {
            name: name.into(),
            root: PathBuf::from(&credentials.host),
            credentials: Arc::new(credentials),
            connector,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn session(&self) -> Result<ShareSession, EndpointError> {
        ShareSession::open(Arc::clone(&self.connector), &self.root, &self.credentials)
    }
}

fn map_missing(err: std::io::Error, remote: &str) -> EndpointError {
    if err.kind() == std::io::ErrorKind::NotFound {
        EndpointError::NotFound(remote.to_string())
    } else {
        EndpointError::Io(err)
    }
}

#[async_trait]
impl ProtocolEndpoint for ShareEndpoint {
    fn kind(&self) -> TransportKind {
        TransportKind::NetworkShare
    }

    fn display_name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> Result<(), EndpointError> {
        let session = self.session()?;
        let meta = tokio::fs::metadata(session.root())
            .await
            .map_err(|e| EndpointError::connection(&self.credentials.host, e))?;
        if meta.is_dir() {
            Ok(())
        } else {
            Err(EndpointError::connection(
                &self.credentials.host,
                "share root is not a directory",
            ))
        }
    }

    async fn read_dir(&self, folder: &str) -> Result<Vec<RemoteEntry>, EndpointError> {
        let session = self.session()?;
        let folder = normalize_remote(folder);
        let path = session.resolve(&folder)?;

        let mut reader = tokio::fs::read_dir(&path)
            .await
            .map_err(|e| map_missing(e, &folder))?;
        let mut entries = Vec::new();
        while let Some(dir_entry) = reader.next_entry().await? {
            let meta = dir_entry.metadata().await?;
            let name = dir_entry.file_name().to_string_lossy().to_string();
            let modified = meta.modified().ok().map(DateTime::<Utc>::from);
            let entry = if meta.is_dir() {
                RemoteEntry::directory(&folder, name)
            } else {
                RemoteEntry::file(&folder, name).with_size(meta.len())
            };
            entries.push(RemoteEntry {
                last_modified: modified,
                ..entry
            });
        }
        Ok(entries)
    }

    async fn download(&self, remote: &str, local: &Path) -> Result<u64, EndpointError> {
        let session = self.session()?;
        let source = session.resolve(remote)?;
        tokio::fs::copy(&source, local)
            .await
            .map_err(|e| map_missing(e, remote))
    }

    async fn upload(&self, local: &Path, remote: &str) -> Result<(), EndpointError> {
        let session = self.session()?;
        let target = session.resolve(remote)?;
        tokio::fs::copy(local, &target)
            .await
            .map_err(|e| EndpointError::protocol("copy", remote, e))?;
        Ok(())
    }

    async fn delete(&self, remote: &str) -> Result<(), EndpointError> {
        let session = self.session()?;
        let target = session.resolve(remote)?;
        tokio::fs::remove_file(&target)
            .await
            .map_err(|e| map_missing(e, remote))
    }

    async fn ensure_directory(&self, remote: &str) -> Result<(), EndpointError> {
        let session = self.session()?;
        let target = session.resolve(remote)?;
        tokio::fs::create_dir_all(&target)
            .await
            .map_err(|e| EndpointError::protocol("create_dir", remote, e))
    }

    async fn delete_if_empty(&self, remote: &str) -> Result<bool, EndpointError> {
        let session = self.session()?;
        let target = session.resolve(remote)?;
        let mut reader = tokio::fs::read_dir(&target)
            .await
            .map_err(|e| map_missing(e, remote))?;
        if reader.next_entry().await?.is_some() {
            debug!(folder = %remote, "Folder not empty, keeping it");
            return Ok(false);
        }
        tokio::fs::remove_dir(&target).await?;
        Ok(true)
    }

    async fn test_reachable(&self, folder: &str) -> Result<bool, EndpointError> {
        let session = self.session()?;
        let target = session.resolve(folder)?;
        Ok(tokio::fs::metadata(&target)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingConnector {
        connects: AtomicUsize,
        disconnects: AtomicUsize,
    }

    impl ShareConnector for CountingConnector {
        fn connect(
            &self,
            share: &Path,
            _username: &str,
            _secret: Option<&SecretString>,
        ) -> Result<PathBuf, EndpointError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            Ok(share.to_path_buf())
        }

        fn disconnect(&self, _share: &Path, _username: &str) {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn credentials(root: &Path, username: Option<&str>) -> Credentials {
        Credentials {
            host: root.to_string_lossy().to_string(),
            port: 445,
            username: username.map(String::from),
            secret: None,
            private_key_path: None,
        }
    }

    #[tokio::test]
    async fn test_share_roundtrip() {
        let share = tempfile::tempdir().unwrap();
        let local = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(share.path().join("out/sub")).unwrap();
        std::fs::write(share.path().join("out/a.txt"), b"alpha").unwrap();
        std::fs::write(share.path().join("out/sub/b.txt"), b"beta").unwrap();

        let endpoint = ShareEndpoint::new(
            "share",
            credentials(share.path(), None),
            Arc::new(MountedShareConnector),
        );

        let files: Vec<RemoteEntry> = endpoint.list_files("/out", true).try_collect().await.unwrap();
        let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["/out/a.txt", "/out/sub/b.txt"]);
        assert!(files[0].last_modified.is_some());

        let staged = local.path().join("a.txt");
        assert_eq!(endpoint.download("/out/a.txt", &staged).await.unwrap(), 5);

        endpoint.ensure_directory("/in/2024").await.unwrap();
        endpoint.upload(&staged, "/in/2024/a.txt").await.unwrap();
        assert_eq!(
            std::fs::read(share.path().join("in/2024/a.txt")).unwrap(),
            b"alpha"
        );

        endpoint.delete("/out/sub/b.txt").await.unwrap();
        assert!(endpoint.delete_if_empty("/out/sub").await.unwrap());
        assert!(!endpoint.delete_if_empty("/out").await.unwrap());
        assert!(endpoint.test_reachable("/in").await.unwrap());
        assert!(!endpoint.test_reachable("/nope").await.unwrap());
    }

    #[tokio::test]
    async fn test_session_released_on_error() {
        let share = tempfile::tempdir().unwrap();
        let local = tempfile::tempdir().unwrap();
        let connector = Arc::new(CountingConnector::default());
        let endpoint = ShareEndpoint::new(
            "share",
            credentials(share.path(), Some("svc_transfer")),
            connector.clone(),
        );

        let err = endpoint
            .download("/missing.txt", &local.path().join("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, EndpointError::NotFound(_)));
        assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
        assert_eq!(connector.disconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_no_session_without_username() {
        let share = tempfile::tempdir().unwrap();
        let connector = Arc::new(CountingConnector::default());
        let endpoint =
            ShareEndpoint::new("share", credentials(share.path(), None), connector.clone());

        endpoint.connect().await.unwrap();
        assert_eq!(connector.connects.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_resolve_rejects_parent_segments() {
        let root = Path::new("/mnt/share");
        assert_eq!(
            resolve_under(root, "/a/b.txt").unwrap(),
            PathBuf::from("/mnt/share/a/b.txt")
        );
        assert_eq!(
            resolve_under(root, "\\a\\b.txt").unwrap(),
            PathBuf::from("/mnt/share/a/b.txt")
        );
        assert!(resolve_under(root, "/../etc/passwd").is_err());
    }

    #[test]
    fn test_mounted_connector_requires_root() {
        let connector = MountedShareConnector;
        assert!(connector
            .connect(Path::new("/definitely/not/mounted"), "u", None)
            .is_err());
    }

    #[test]
    fn test_mounted_connector_refuses_password() {
        let share = tempfile::tempdir().unwrap();
        let secret = SecretString::from("wrong".to_string());
        let err = MountedShareConnector
            .connect(share.path(), "svc", Some(&secret))
            .unwrap_err();
        assert!(matches!(err, EndpointError::Authentication(_)));
        assert_eq!(
            MountedShareConnector.connect(share.path(), "svc", None).unwrap(),
            share.path()
        );
    }

    /// Stand-in for `mount.cifs`: accepts one password, copies the share
    /// into the mount point and logs each call.
    #[cfg(unix)]
    struct FakeCifs {
        dir: tempfile::TempDir,
    }

    #[cfg(unix)]
    impl FakeCifs {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let log = dir.path().join("calls.log");
            std::fs::write(
                dir.path().join("mount.sh"),
                format!(
                    "if [ \"$PASSWD\" != \"s3cret\" ]; then\n  echo 'mount error(13): Permission denied' >&2\n  exit 32\nfi\ncp -R \"$3/.\" \"$4/\"\necho \"mount $3 $6\" >> {log}\n",
                    log = log.display()
                ),
            )
            .unwrap();
            std::fs::write(
                dir.path().join("umount.sh"),
                format!("echo \"umount $1\" >> {}\n", log.display()),
            )
            .unwrap();
            Self { dir }
        }

        fn connector(&self) -> CifsMountConnector {
            let script = |name: &str| {
                vec![
                    "sh".to_string(),
                    self.dir.path().join(name).to_string_lossy().to_string(),
                ]
            };
            CifsMountConnector::new(self.dir.path().join("mnt"))
                .with_commands(script("mount.sh"), script("umount.sh"))
        }

        fn calls(&self) -> Vec<String> {
            std::fs::read_to_string(self.dir.path().join("calls.log"))
                .unwrap_or_default()
                .lines()
                .map(String::from)
                .collect()
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_cifs_mount_shared_by_sessions() {
        let fake = FakeCifs::new();
        let share = tempfile::tempdir().unwrap();
        let connector = fake.connector();
        let secret = SecretString::from("s3cret".to_string());

        let first = connector.connect(share.path(), "svc", Some(&secret)).unwrap();
        let second = connector.connect(share.path(), "svc", Some(&secret)).unwrap();
        assert_eq!(first, second);
        assert_eq!(first, connector.mount_point(share.path(), "svc"));
        assert!(first.starts_with(fake.dir.path().join("mnt")));

        connector.disconnect(share.path(), "svc");
        assert_eq!(fake.calls().len(), 1);
        connector.disconnect(share.path(), "svc");

        let calls = fake.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[0].starts_with("mount "));
        assert!(calls[0].ends_with("username=svc"));
        assert_eq!(calls[1], format!("umount {}", first.display()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_share_with_wrong_password_is_rejected() {
        let fake = FakeCifs::new();
        let share = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(share.path().join("in")).unwrap();
        std::fs::write(share.path().join("in/a.txt"), b"alpha").unwrap();
        let connector: Arc<dyn ShareConnector> = Arc::new(fake.connector());

        let credentialed = |password: &str| Credentials {
            secret: Some(SecretString::from(password.to_string())),
            ..credentials(share.path(), Some("svc"))
        };

        let rejected = ShareEndpoint::new("share", credentialed("wrong"), Arc::clone(&connector));
        assert!(matches!(
            rejected.connect().await,
            Err(EndpointError::Authentication(_))
        ));
        assert!(fake.calls().is_empty());

        let accepted = ShareEndpoint::new("share", credentialed("s3cret"), connector);
        let files: Vec<RemoteEntry> = accepted.list_files("/in", false).try_collect().await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, "/in/a.txt");
        assert_eq!(fake.calls().len(), 2);
    }
}
