//! The filesystem-walk adapter (C9). An external collaborator per §1 — the core only
//! depends on the [`FileWalker`] trait, never on `std::fs::read_dir` directly, so a future
//! adapter (e.g. one backed by `FTS` or a `.gitignore`-aware crawler) can be swapped in
//! without touching the pipeline.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::listener::ScanListener;
use crate::metrics::Metrics;
use crate::path_entry::PathEntry;
use crate::queue::PathEntryQueue;

#[derive(Debug, Clone, Copy)]
pub struct WalkOptions {
    pub one_file_system: bool,
    pub max_depth: u16,
}

pub trait FileWalker: Send + Sync {
    /// Walks `roots`, pushing every regular non-empty, non-staging file onto `queue` and
    /// calling `queue.finish()` exactly once when done. Per-entry errors (permission denied,
    /// a symlink resolving to nothing, and the like) are non-fatal and only logged — this is
    /// "super common", as the original tool's own comment puts it, and aborting the whole
    /// walk over one bad entry would be far more surprising than skipping it. `listener` is
    /// notified of every file as it's found, driving the live scan progress display.
    fn walk(
        &self,
        roots: &[PathBuf],
        opts: &WalkOptions,
        queue: &PathEntryQueue,
        metrics: &Metrics,
        listener: &mut dyn ScanListener,
    );
}

/// Recursive directory scan built directly on `std::fs`, styled after the original scanner's
/// inode-ordered traversal: directories are popped off a max-heap keyed by inode (negated, so
/// the highest — presumably newest — inodes come off first), on the theory that this keeps
/// disk access roughly sequential.
#[derive(Debug, Default)]
pub struct StdFileWalker;

impl StdFileWalker {
    pub fn new() -> Self {
        StdFileWalker
    }
}

impl FileWalker for StdFileWalker {
    fn walk(
        &self,
        roots: &[PathBuf],
        opts: &WalkOptions,
        queue: &PathEntryQueue,
        metrics: &Metrics,
        listener: &mut dyn ScanListener,
    ) {
        let mut to_scan: BinaryHeap<(Reverse<u64>, PathBuf, u16)> = BinaryHeap::new();
        let mut root_device: Option<u64> = None;

        for root in roots {
            let canon = match fs::canonicalize(root) {
                Ok(p) => p,
                Err(e) => {
                    warn!(path = %root.display(), error = %e, "could not canonicalize starting path");
                    continue;
                }
            };
            let meta = match fs::symlink_metadata(&canon) {
                Ok(m) => m,
                Err(e) => {
                    warn!(path = %canon.display(), error = %e, "could not stat starting path");
                    continue;
                }
            };
            if root_device.is_none() {
                root_device = Some(meta.dev());
            }
            visit(&canon, &meta, 0, queue, metrics, opts, root_device, &mut to_scan, listener);
        }

        while let Some((_, dir, depth)) = to_scan.pop() {
            let entries = match fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(path = %dir.display(), error = %e, "could not read directory");
                    continue;
                }
            };
            for entry in entries {
                let entry = match entry {
                    Ok(e) => e,
                    Err(e) => {
                        warn!(path = %dir.display(), error = %e, "directory entry error");
                        continue;
                    }
                };
                let path = entry.path();
                let meta = match entry.metadata() {
                    Ok(m) => m,
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "could not stat entry");
                        continue;
                    }
                };
                visit(&path, &meta, depth + 1, queue, metrics, opts, root_device, &mut to_scan, listener);
            }
        }

        queue.finish();
    }
}

#[allow(clippy::too_many_arguments)]
fn visit(
    path: &Path,
    meta: &fs::Metadata,
    depth: u16,
    queue: &PathEntryQueue,
    metrics: &Metrics,
    opts: &WalkOptions,
    root_device: Option<u64>,
    to_scan: &mut BinaryHeap<(Reverse<u64>, PathBuf, u16)>,
    listener: &mut dyn ScanListener,
) {
    if is_staging_name(path) {
        return;
    }

    let ty = meta.file_type();
    if ty.is_dir() {
        if depth >= opts.max_depth {
            return;
        }
        if opts.one_file_system {
            if let Some(root_dev) = root_device {
                if meta.dev() != root_dev {
                    return;
                }
            }
        }
        to_scan.push((Reverse(meta.ino()), path.to_path_buf(), depth));
        return;
    }

    if ty.is_symlink() || !ty.is_file() {
        // Traversing symlinks would need loop detection this tool doesn't implement; other
        // non-regular types (devices, sockets, fifos) are never candidates for dedup.
        return;
    }

    if meta.len() == 0 {
        return;
    }

    metrics.record_file_scanned();
    listener.file_scanned(path, metrics);
    queue.push(PathEntry {
        path: path.to_path_buf(),
        device: meta.dev(),
        inode: meta.ino(),
        nlink: meta.nlink(),
        flags: file_flags(meta),
        size: meta.len(),
        depth,
    });
}

fn is_staging_name(path: &Path) -> bool {
    path.file_name().and_then(|n| n.to_str()).is_some_and(|n| n.starts_with(".~."))
}

#[cfg(target_os = "macos")]
fn file_flags(meta: &fs::Metadata) -> u32 {
    use std::os::macos::fs::MetadataExt as _;
    meta.st_flags()
}

#[cfg(not(target_os = "macos"))]
fn file_flags(_meta: &fs::Metadata) -> u32 {
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::tempdir;

    fn drain(queue: &PathEntryQueue) -> Vec<PathEntry> {
        let mut out = Vec::new();
        while let Some(e) = queue.try_pop() {
            out.push(e);
        }
        out
    }

    #[derive(Debug, Default)]
    struct CountingListener {
        scanned: usize,
    }

    impl ScanListener for CountingListener {
        fn file_scanned(&mut self, _path: &Path, _metrics: &Metrics) {
            self.scanned += 1;
        }
        fn scan_over(&mut self, _metrics: &Metrics, _scan_duration: Duration) {}
        fn duplicate_found(&mut self, _member: &Path, _origin: &Path, _reason: crate::origin::OriginReason) {}
        fn replaced(&mut self, _member: &Path, _origin: &Path) {}
        fn already_saved(&mut self, _member: &Path) {}
        fn skipped(&mut self, _member: &Path, _reason: &str) {}
    }

    #[test]
    fn file_scanned_is_called_once_per_file_found() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a"), b"content").unwrap();
        std::fs::write(dir.path().join("b"), b"content").unwrap();

        let queue = Arc::new(PathEntryQueue::new());
        let metrics = Metrics::new();
        let walker = StdFileWalker::new();
        let opts = WalkOptions { one_file_system: false, max_depth: u16::MAX };
        let mut listener = CountingListener::default();
        walker.walk(&[dir.path().to_path_buf()], &opts, &queue, &metrics, &mut listener);

        assert_eq!(listener.scanned, 2);
    }

    #[test]
    fn skips_empty_files_directories_and_staging_names() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("real"), b"content").unwrap();
        std::fs::write(dir.path().join("empty"), b"").unwrap();
        std::fs::write(dir.path().join(".~.staged"), b"content").unwrap();
        std::fs::create_dir(dir.path().join("subdir")).unwrap();
        std::fs::write(dir.path().join("subdir/nested"), b"nested content").unwrap();

        let queue = Arc::new(PathEntryQueue::new());
        let metrics = Metrics::new();
        let walker = StdFileWalker::new();
        let opts = WalkOptions { one_file_system: false, max_depth: u16::MAX };
        walker.walk(&[dir.path().to_path_buf()], &opts, &queue, &metrics, &mut crate::listener::SilentListener);

        let mut names: Vec<_> = drain(&queue)
            .into_iter()
            .map(|e| e.path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec!["nested".to_string(), "real".to_string()]);
        assert!(queue.is_finished());
    }

    #[test]
    fn max_depth_zero_does_not_recurse_into_subdirectories() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("top"), b"content").unwrap();
        std::fs::create_dir(dir.path().join("subdir")).unwrap();
        std::fs::write(dir.path().join("subdir/nested"), b"nested content").unwrap();

        let queue = Arc::new(PathEntryQueue::new());
        let metrics = Metrics::new();
        let walker = StdFileWalker::new();
        let opts = WalkOptions { one_file_system: false, max_depth: 0 };
        walker.walk(&[dir.path().to_path_buf()], &opts, &queue, &metrics, &mut crate::listener::SilentListener);

        assert!(drain(&queue).is_empty(), "depth 0 must not even scan the root directory's own files");
    }
}
