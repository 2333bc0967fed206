//! Filesystem scanning.
//!
//! Produces the canonical, filtered file list for the watched directory:
//! forward-slash relative paths, lexicographically ordered per directory
//! level, with ignored subtrees pruned before descent.

use anyhow::{bail, Result};
use std::path::Path;
use tracing::debug;
use walkdir::WalkDir;

use crate::ignore::IgnoreMatcher;

/// Recursively enumerate `root`, applying the ignore rules.
///
/// Ignored directories are never descended into — a dependency tree must not
/// be walked regardless of its size. Entries that disappear mid-scan (a race
/// with concurrent filesystem activity) are omitted rather than failing the
/// whole scan. Ordering is reproducible for a given filesystem state.
pub fn scan(root: &Path, matcher: &IgnoreMatcher) -> Result<Vec<String>> {
    if !root.is_dir() {
        bail!("Watch directory does not exist: {}", root.display());
    }

    let mut files = Vec::new();

    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            let rel = relative_slash(root, entry.path());
            // The root itself has an empty relative path and is always kept.
            rel.is_empty() || !matcher.is_ignored(&rel)
        });

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                debug!("Skipping unreadable entry during scan: {}", err);
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }

        files.push(relative_slash(root, entry.path()));
    }

    Ok(files)
}

/// Relative path from `root` to `path`, forward-slash separated.
pub fn relative_slash(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    parts.join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn matcher(user: &[&str]) -> IgnoreMatcher {
        let patterns: Vec<String> = user.iter().map(|s| s.to_string()).collect();
        IgnoreMatcher::new(&patterns)
    }

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "x").unwrap();
    }

    #[test]
    fn returns_relative_forward_slash_paths() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "src/lib.rs");
        touch(tmp.path(), "README.md");

        let files = scan(tmp.path(), &matcher(&[])).unwrap();
        assert_eq!(files, vec!["README.md", "src/lib.rs"]);
    }

    #[test]
    fn empty_directory_yields_empty_list() {
        let tmp = TempDir::new().unwrap();
        let files = scan(tmp.path(), &matcher(&[])).unwrap();
        assert!(files.is_empty());
    }

    #[test]
    fn missing_root_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let gone = tmp.path().join("nope");
        assert!(scan(&gone, &matcher(&[])).is_err());
    }

    #[test]
    fn ignored_directories_are_pruned() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "node_modules/pkg/index.js");
        touch(tmp.path(), "dist/out.js");
        touch(tmp.path(), ".git/HEAD");
        touch(tmp.path(), "src/main.rs");

        let files = scan(tmp.path(), &matcher(&[])).unwrap();
        assert_eq!(files, vec!["src/main.rs"]);
    }

    #[test]
    fn user_patterns_apply() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "notes/keep.md");
        touch(tmp.path(), "notes/drop.tmp");

        let files = scan(tmp.path(), &matcher(&["*.tmp"])).unwrap();
        assert_eq!(files, vec!["notes/keep.md"]);
    }

    #[test]
    fn ordering_is_reproducible() {
        let tmp = TempDir::new().unwrap();
        for name in ["b.txt", "a.txt", "c.txt"] {
            touch(tmp.path(), name);
        }
        let first = scan(tmp.path(), &matcher(&[])).unwrap();
        let second = scan(tmp.path(), &matcher(&[])).unwrap();
        assert_eq!(first, second);
        assert_eq!(first, vec!["a.txt", "b.txt", "c.txt"]);
    }
}
