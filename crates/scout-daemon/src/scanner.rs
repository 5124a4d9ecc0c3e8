//! Folder enumeration and content fingerprinting
//!
//! Walks a folder subtree, skipping well-known noise directories plus any
//! configured exclusions, and computes a blake3 hash over each file's bytes.
//! The hash is purely content-based: touching a file without changing its
//! bytes never looks like a change.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::WalkDir;

/// Directory names never scanned, regardless of configuration
pub const SKIP_DIRS: &[&str] = &[
    // VCS
    ".git",
    ".svn",
    ".hg",
    // Build artifacts / dependencies
    "node_modules",
    "target",
    "build",
    "dist",
    "out",
    "__pycache__",
    ".venv",
    "venv",
    // IDE
    ".idea",
    ".vscode",
    // Caches
    "Cache",
    "Caches",
    ".cache",
];

/// One file discovered by a scan
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScanEntry {
    /// Absolute path on disk
    pub path: PathBuf,

    /// Path relative to the folder root (the tracker key)
    pub rel: String,

    /// blake3 hex digest of the file contents
    pub hash: String,
}

/// Enumerate all files under `root`, hashing each one.
///
/// Files that vanish or become unreadable between enumeration and hashing
/// are logged and skipped — the next scan cycle will see them again.
/// Symlinks are not followed.
pub fn scan_folder(root: &Path, extra_excludes: &[String]) -> io::Result<Vec<ScanEntry>> {
    let mut entries = Vec::new();

    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| !is_excluded(e.path(), root, extra_excludes));

    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                // Per-file trouble never aborts the scan
                warn!("Skipping unreadable entry under {:?}: {}", root, e);
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path().to_path_buf();
        let rel = match path.strip_prefix(root) {
            Ok(r) => r.to_string_lossy().to_string(),
            Err(_) => continue,
        };

        match hash_file(&path) {
            Ok(hash) => entries.push(ScanEntry { path, rel, hash }),
            Err(e) => warn!("Failed to hash {:?}: {}", path, e),
        }
    }

    debug!("Scanned {:?}: {} file(s)", root, entries.len());
    Ok(entries)
}

/// blake3 hex digest of a file's bytes (streaming, constant memory)
pub fn hash_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = blake3::Hasher::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hasher.finalize().to_hex().to_string())
}

fn is_excluded(path: &Path, root: &Path, extra: &[String]) -> bool {
    if path == root {
        return false;
    }

    let name = match path.file_name() {
        Some(n) => n.to_string_lossy(),
        None => return false,
    };

    SKIP_DIRS.contains(&name.as_ref()) || extra.iter().any(|x| x == name.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_scan_finds_nested_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "alpha").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/b.txt"), "beta").unwrap();

        let mut entries = scan_folder(dir.path(), &[]).unwrap();
        entries.sort_by(|a, b| a.rel.cmp(&b.rel));

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].rel, "a.txt");
        assert_eq!(entries[1].rel, "sub/b.txt");
    }

    #[test]
    fn test_scan_skips_noise_directories() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "alpha").unwrap();
        fs::create_dir(dir.path().join(".git")).unwrap();
        fs::write(dir.path().join(".git/HEAD"), "ref").unwrap();
        fs::create_dir(dir.path().join("node_modules")).unwrap();
        fs::write(dir.path().join("node_modules/x.js"), "x").unwrap();

        let entries = scan_folder(dir.path(), &[]).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].rel, "a.txt");
    }

    #[test]
    fn test_scan_honors_extra_excludes() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("drafts")).unwrap();
        fs::write(dir.path().join("drafts/wip.md"), "wip").unwrap();
        fs::write(dir.path().join("done.md"), "done").unwrap();

        let entries = scan_folder(dir.path(), &["drafts".to_string()]).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].rel, "done.md");
    }

    #[test]
    fn test_hash_is_content_based() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");

        fs::write(&a, "same bytes").unwrap();
        fs::write(&b, "same bytes").unwrap();

        assert_eq!(hash_file(&a).unwrap(), hash_file(&b).unwrap());

        fs::write(&b, "different bytes").unwrap();
        assert_ne!(hash_file(&a).unwrap(), hash_file(&b).unwrap());
    }

    #[test]
    fn test_rewrite_with_same_bytes_keeps_hash() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.txt");

        fs::write(&a, "stable").unwrap();
        let before = hash_file(&a).unwrap();

        // Rewriting identical bytes bumps mtime but not the fingerprint
        fs::write(&a, "stable").unwrap();
        assert_eq!(hash_file(&a).unwrap(), before);
    }
}
