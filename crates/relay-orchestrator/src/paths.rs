//! Destination path mapping and cleanup planning.
//!
//! Remote paths compare case-insensitively: the servers this talks to
//! (Windows shares, most FTP hosts) do not distinguish case.

use std::collections::BTreeMap;

use relay_endpoints::{join_remote, normalize_remote};

/// Path of `path` relative to `root`, if it lies under it.
///
/// The match respects segment boundaries: `/data` contains `/data/x` but
/// not `/database/x`.
pub fn relative_to_root(path: &str, root: &str) -> Option<String> {
    let path = normalize_remote(path);
    let root = normalize_remote(root);

    if root.is_empty() || root == "/" {
        return Some(path.trim_start_matches('/').to_string());
    }

    let head = path.get(..root.len())?;
    if head.to_lowercase() != root.to_lowercase() {
        return None;
    }
    path[root.len()..]
        .strip_prefix('/')
        .filter(|rest| !rest.is_empty())
        .map(str::to_string)
}

/// Where a source file lands.
///
/// With `mirror` set and the file under `source_root`, the sub-path below the
/// root is kept; otherwise the file goes straight into `destination_root`.
pub fn destination_path(
    source_path: &str,
    file_name: &str,
    source_root: &str,
    destination_root: &str,
    mirror: bool,
) -> String {
    if mirror {
        if let Some(relative) = relative_to_root(source_path, source_root) {
            return join_remote(destination_root, &relative);
        }
    }
    join_remote(destination_root, file_name)
}

fn depth(path: &str) -> usize {
    path.split('/').filter(|s| !s.is_empty()).count()
}

/// Order in which emptied source folders are removed.
///
/// Folders are de-duplicated ignoring case, deepest first with ties broken by
/// path. The task root and `/` are never returned.
pub fn cleanup_order<I, S>(folders: I, root: &str) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let root = normalize_remote(root).to_lowercase();

    let mut unique: BTreeMap<String, String> = BTreeMap::new();
    for folder in folders {
        let folder = normalize_remote(folder.as_ref());
        let key = folder.to_lowercase();
        if folder.is_empty() || folder == "/" || key == root {
            continue;
        }
        unique.entry(key).or_insert(folder);
    }

    let mut ordered: Vec<String> = unique.into_values().collect();
    ordered.sort_by(|a, b| depth(b).cmp(&depth(a)).then_with(|| a.cmp(b)));
    ordered
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cleanup_order_skips_root() {
        let order = cleanup_order(["/a", "/a/b", "/a/b/c"], "/a");
        assert_eq!(order, vec!["/a/b/c", "/a/b"]);
    }

    #[test]
    fn test_cleanup_order_ties_and_duplicates() {
        let order = cleanup_order(["/in/z", "/in/a", "/IN/A", "/in/a/x", "/"], "/in/");
        assert_eq!(order, vec!["/in/a/x", "/in/a", "/in/z"]);
    }

    #[test]
    fn test_cleanup_order_root_case_insensitive() {
        assert!(cleanup_order(["/Data"], "/data").is_empty());
    }

    #[test]
    fn test_relative_to_root() {
        assert_eq!(relative_to_root("/data/x/a.txt", "/data").as_deref(), Some("x/a.txt"));
        assert_eq!(relative_to_root("/DATA/x/a.txt", "/data/").as_deref(), Some("x/a.txt"));
        assert_eq!(relative_to_root("/database/a.txt", "/data"), None);
        assert_eq!(relative_to_root("/data", "/data"), None);
        assert_eq!(relative_to_root("/a.txt", "/").as_deref(), Some("a.txt"));
    }

    #[test]
    fn test_destination_mirror() {
        let dest = destination_path("/in/2024/05/a.csv", "a.csv", "/in", "/archive", true);
        assert_eq!(dest, "/archive/2024/05/a.csv");
    }

    #[test]
    fn test_destination_flatten() {
        let dest = destination_path("/in/2024/05/a.csv", "a.csv", "/in", "/archive", false);
        assert_eq!(dest, "/archive/a.csv");
    }

    #[test]
    fn test_destination_outside_root_flattens() {
        let dest = destination_path("/other/a.csv", "a.csv", "/in", "/archive", true);
        assert_eq!(dest, "/archive/a.csv");
    }
}
