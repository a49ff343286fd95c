//! Filesystem probe and ignore rules
//!
//! Walks library roots, gathering best-effort stat info. I/O errors never
//! abort enumeration; a failed stat yields a sentinel entry with
//! `exists = false` so downstream stages can account for the path.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::model::LibraryKind;

/// One filesystem entry observed during enumeration.
#[derive(Debug, Clone)]
pub struct Entry {
    pub path: PathBuf,
    pub name: String,
    /// Lowercased extension without the dot.
    pub ext: Option<String>,
    pub is_dir: bool,
    pub size: Option<u64>,
    pub mtime: Option<OffsetDateTime>,
    pub ctime: Option<OffsetDateTime>,
    /// False when the stat failed; such entries carry no size/times.
    pub exists: bool,
}

impl Entry {
    pub fn from_path(path: &Path) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase());

        match std::fs::metadata(path) {
            Ok(meta) => Entry {
                path: path.to_path_buf(),
                name,
                ext,
                is_dir: meta.is_dir(),
                size: meta.is_file().then(|| meta.len()),
                mtime: meta.modified().ok().map(system_time_to_offset),
                ctime: meta.created().ok().map(system_time_to_offset),
                exists: true,
            },
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Stat failed, emitting sentinel entry");
                Entry {
                    path: path.to_path_buf(),
                    name,
                    ext,
                    is_dir: false,
                    size: None,
                    mtime: None,
                    ctime: None,
                    exists: false,
                }
            }
        }
    }

    /// Lowercased file stem, for name matching.
    pub fn stem(&self) -> String {
        Path::new(&self.name)
            .file_stem()
            .map(|s| s.to_string_lossy().to_lowercase())
            .unwrap_or_default()
    }
}

fn system_time_to_offset(t: SystemTime) -> OffsetDateTime {
    OffsetDateTime::from(t)
}

/// Sorted, best-effort listing of one directory. Unreadable directories
/// yield an empty list; unreadable children yield sentinel entries.
pub fn list_dir(dir: &Path) -> Vec<Entry> {
    let Ok(read) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut entries: Vec<Entry> = read
        .flatten()
        .map(|e| Entry::from_path(&e.path()))
        .collect();
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    entries
}

/// Polymorphic ignore predicate. Multiple rules compose with OR; a matched
/// directory is never descended.
pub trait IgnoreRule: Send + Sync {
    fn name(&self) -> &'static str;
    fn matches(&self, entry: &Entry, kind: LibraryKind) -> bool;
}

/// Hidden files and well-known junk names.
pub struct HiddenFileRule;

impl IgnoreRule for HiddenFileRule {
    fn name(&self) -> &'static str {
        "hidden-files"
    }

    fn matches(&self, entry: &Entry, _kind: LibraryKind) -> bool {
        entry.name.starts_with('.')
            || entry.name.eq_ignore_ascii_case("Thumbs.db")
            || entry.name.eq_ignore_ascii_case("desktop.ini")
            || entry.name.eq_ignore_ascii_case("@eaDir")
            || entry.name.eq_ignore_ascii_case("lost+found")
    }
}

/// A `.plexignore`-style marker: any directory containing `.noscan` is
/// skipped wholesale.
pub struct NoScanMarkerRule;

impl IgnoreRule for NoScanMarkerRule {
    fn name(&self) -> &'static str {
        "noscan-marker"
    }

    fn matches(&self, entry: &Entry, _kind: LibraryKind) -> bool {
        entry.is_dir && entry.path.join(".noscan").exists()
    }
}

/// Composite over the registry's rule list.
pub fn is_ignored(rules: &[Arc<dyn IgnoreRule>], entry: &Entry, kind: LibraryKind) -> bool {
    for rule in rules {
        if rule.matches(entry, kind) {
            debug!(path = %entry.path.display(), rule = rule.name(), "Entry ignored");
            return true;
        }
    }
    false
}

/// Enumerate a root breadth-agnostically in lexicographic path order,
/// streaming entries over a bounded channel. Enumeration runs on a blocking
/// thread; the returned receiver is the consumer side.
pub fn enumerate(
    root: PathBuf,
    rules: Vec<Arc<dyn IgnoreRule>>,
    kind: LibraryKind,
    cancel: CancellationToken,
) -> mpsc::Receiver<Entry> {
    let (tx, rx) = mpsc::channel(256);

    tokio::task::spawn_blocking(move || {
        let walker = WalkDir::new(&root)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| {
                // The root itself always passes.
                if e.depth() == 0 {
                    return true;
                }
                let entry = Entry::from_path(e.path());
                !is_ignored(&rules, &entry, kind)
            });

        for result in walker {
            if cancel.is_cancelled() {
                debug!(root = %root.display(), "Enumeration cancelled");
                return;
            }
            let dir_entry = match result {
                Ok(e) => e,
                Err(e) => {
                    // Keep the sentinel contract for paths we can name.
                    if let Some(path) = e.path() {
                        warn!(path = %path.display(), error = %e, "Walk error");
                        let sentinel = Entry::from_path(path);
                        if tx.blocking_send(sentinel).is_err() {
                            return;
                        }
                    } else {
                        warn!(error = %e, "Walk error with no path");
                    }
                    continue;
                }
            };
            if dir_entry.depth() == 0 {
                continue;
            }
            let entry = Entry::from_path(dir_entry.path());
            if tx.blocking_send(entry).is_err() {
                return;
            }
        }
    });

    rx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hidden_file_rule() {
        let rule = HiddenFileRule;
        let mk = |name: &str| Entry {
            path: PathBuf::from(format!("/lib/{name}")),
            name: name.to_string(),
            ext: None,
            is_dir: false,
            size: None,
            mtime: None,
            ctime: None,
            exists: true,
        };
        assert!(rule.matches(&mk(".DS_Store"), LibraryKind::Movies));
        assert!(rule.matches(&mk("Thumbs.db"), LibraryKind::Movies));
        assert!(!rule.matches(&mk("Movie.mkv"), LibraryKind::Movies));
    }

    #[tokio::test]
    async fn test_enumerate_streams_sorted_entries() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("b")).unwrap();
        std::fs::write(dir.path().join("b/file2.mkv"), b"x").unwrap();
        std::fs::write(dir.path().join("a.mkv"), b"x").unwrap();

        let mut rx = enumerate(
            dir.path().to_path_buf(),
            vec![Arc::new(HiddenFileRule)],
            LibraryKind::Movies,
            CancellationToken::new(),
        );

        let mut names = Vec::new();
        while let Some(entry) = rx.recv().await {
            names.push(entry.name);
        }
        assert_eq!(names, vec!["a.mkv", "b", "file2.mkv"]);
    }

    #[tokio::test]
    async fn test_ignored_directory_not_descended() {
        let dir = tempfile::tempdir().unwrap();
        let hidden = dir.path().join(".git");
        std::fs::create_dir(&hidden).unwrap();
        std::fs::write(hidden.join("config"), b"x").unwrap();
        std::fs::write(dir.path().join("movie.mkv"), b"x").unwrap();

        let mut rx = enumerate(
            dir.path().to_path_buf(),
            vec![Arc::new(HiddenFileRule)],
            LibraryKind::Movies,
            CancellationToken::new(),
        );

        let mut names = Vec::new();
        while let Some(entry) = rx.recv().await {
            names.push(entry.name);
        }
        assert_eq!(names, vec!["movie.mkv"]);
    }
}
