//! Remote directory entries and path helpers.
//!
//! Remote paths are `/`-separated strings on every transport. Backslashes
//! are accepted on input and normalized.

use chrono::{DateTime, Utc};

/// Whether an entry is a file or a directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

/// One entry of a remote directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    /// Full remote path
    pub path: String,
    /// Last path segment
    pub name: String,
    pub kind: EntryKind,
    /// Modification time, when the server reports one
    pub last_modified: Option<DateTime<Utc>>,
    /// Size in bytes, when the server reports one
    pub size: Option<u64>,
}

impl RemoteEntry {
    /// A file entry inside `folder`.
    pub fn file(folder: &str, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            path: join_remote(folder, &name),
            name,
            kind: EntryKind::File,
            last_modified: None,
            size: None,
        }
    }

    /// A directory entry inside `folder`.
    pub fn directory(folder: &str, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            path: join_remote(folder, &name),
            name,
            kind: EntryKind::Directory,
            last_modified: None,
            size: None,
        }
    }

    pub fn with_modified(mut self, modified: DateTime<Utc>) -> Self {
        self.last_modified = Some(modified);
        self
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }
}

/// Normalize separators and drop a trailing slash (except for the root).
pub fn normalize_remote(path: &str) -> String {
    let mut normalized = path.trim().replace('\\', "/");
    while normalized.len() > 1 && normalized.ends_with('/') {
        normalized.pop();
    }
    normalized
}

/// Join a folder and a child name with a single `/`.
pub fn join_remote(folder: &str, name: &str) -> String {
    let folder = normalize_remote(folder);
    let name = name.trim_start_matches(['/', '\\']);
    if folder.is_empty() {
        name.to_string()
    } else if folder.ends_with('/') {
        format!("{}{}", folder, name)
    } else {
        format!("{}/{}", folder, name)
    }
}

/// Parent folder of a remote path, or `None` for a bare name or the root.
pub fn parent_remote(path: &str) -> Option<String> {
    let normalized = normalize_remote(path);
    match normalized.rfind('/') {
        Some(0) if normalized.len() > 1 => Some("/".to_string()),
        Some(0) | None => None,
        Some(idx) => Some(normalized[..idx].to_string()),
    }
}

/// Last segment of a remote path.
pub fn file_name_remote(path: &str) -> String {
    let normalized = normalize_remote(path);
    normalized
        .rsplit('/')
        .next()
        .unwrap_or(normalized.as_str())
        .to_string()
}

/// Cumulative prefixes of a path: `/a/b/c` -> `/a`, `/a/b`, `/a/b/c`.
pub fn path_prefixes(path: &str) -> Vec<String> {
    let normalized = normalize_remote(path);
    let absolute = normalized.starts_with('/');
    let mut current = String::new();
    let mut prefixes = Vec::new();
    for segment in normalized.split('/').filter(|s| !s.is_empty()) {
        if absolute || !current.is_empty() {
            current.push('/');
        }
        current.push_str(segment);
        prefixes.push(current.clone());
    }
    prefixes
}
