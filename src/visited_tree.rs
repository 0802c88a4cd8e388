//! The centerpiece of the engine: a lazy, nested index that partitions files into
//! equivalence classes while hashing as few of them as possible.
//!
//! `device -> size -> first_byte -> last_byte -> LastNode`, where a [`LastNode`] holds either
//! a single cached "shortcut" [`FileMetadata`] or a `hash -> FileMetadata` map, never both.
//! The shortcut defers hashing a singleton file until a second file collides with it.

use std::collections::BTreeMap;

use parking_lot::Mutex;
use tracing::warn;

use crate::fingerprint::{FileMetadata, Hash};

/// What happened when a [`FileMetadata`] was inserted.
pub enum InsertOutcome {
    /// No prior file shares this fingerprint; `m` now occupies a slot in the tree.
    New,
    /// `m` is a byte-identical duplicate of the returned, previously-inserted file.
    Duplicate(FileMetadata),
}

/// The mutually-exclusive leaf state described by the data model: either nothing has been
/// seen at this (device, size, first, last) prefix yet, a single file is cached awaiting a
/// second arrival, or enough files have arrived that hashing was required to tell them apart.
enum LastNode {
    Empty,
    Shortcut(FileMetadata),
    Children(BTreeMap<Hash, FileMetadata>),
}

impl Default for LastNode {
    fn default() -> Self {
        LastNode::Empty
    }
}

impl LastNode {
    /// Implements Case A/B/C of §4.3. Returns the insertion outcome, mutating `self` in place.
    fn insert(&mut self, mut m: FileMetadata) -> InsertOutcome {
        match std::mem::take(self) {
            LastNode::Empty => {
                *self = LastNode::Shortcut(m);
                InsertOutcome::New
            }
            LastNode::Shortcut(mut s) => {
                let s_hash = s.hash_or_compute();
                let m_hash = m.hash_or_compute();
                match (s_hash, m_hash) {
                    (Ok(sh), Ok(mh)) if sh == mh => {
                        *self = LastNode::Shortcut(s.clone());
                        InsertOutcome::Duplicate(s)
                    }
                    (Ok(sh), Ok(mh)) => {
                        let mut children = BTreeMap::new();
                        children.insert(sh, s);
                        children.insert(mh, m);
                        *self = LastNode::Children(children);
                        InsertOutcome::New
                    }
                    (Err(e), _) => {
                        warn!(path = %s.path.display(), error = %e, "discarding shortcut: hash failed");
                        *self = LastNode::Shortcut(m);
                        InsertOutcome::New
                    }
                    (Ok(_), Err(e)) => {
                        warn!(path = %m.path.display(), error = %e, "dropping file: hash failed");
                        *self = LastNode::Shortcut(s);
                        InsertOutcome::New
                    }
                }
            }
            LastNode::Children(mut children) => {
                let outcome = match m.hash_or_compute() {
                    Ok(hash) => {
                        if let Some(existing) = children.get(&hash) {
                            InsertOutcome::Duplicate(existing.clone())
                        } else {
                            children.insert(hash, m);
                            InsertOutcome::New
                        }
                    }
                    Err(e) => {
                        warn!(path = %m.path.display(), error = %e, "dropping file: hash failed");
                        InsertOutcome::New
                    }
                };
                *self = LastNode::Children(children);
                outcome
            }
        }
    }
}

type LastByteLevel = BTreeMap<u8, LastNode>;
type FirstByteLevel = BTreeMap<u8, LastByteLevel>;
type SizeLevel = BTreeMap<u64, FirstByteLevel>;
type DeviceLevel = BTreeMap<u64, SizeLevel>;

/// The visited tree (C3). A single global mutex serializes every insertion, which is
/// sufficient per §5 — the algorithm only depends on LastNode transitions being strictly
/// serialized, not on any finer-grained locking. A per-LastNode lock is a valid future
/// optimization as long as the shortcut-promotion transition stays linearizable.
#[derive(Default)]
pub struct VisitedTree {
    devices: Mutex<DeviceLevel>,
}

impl VisitedTree {
    pub fn new() -> Self {
        VisitedTree::default()
    }

    /// Inserts `m`, returning whether it's a new equivalence class or a duplicate of an
    /// already-seen file. `m.size` must be > 0 (data-model invariant i); the filesystem
    /// adapter and worker pool are responsible for never enqueueing empty files.
    pub fn insert(&self, m: FileMetadata) -> InsertOutcome {
        debug_assert!(m.size > 0, "empty files must never reach the visited tree");
        let mut devices = self.devices.lock();
        let last_node = devices
            .entry(m.device)
            .or_default()
            .entry(m.size)
            .or_default()
            .entry(m.first_byte)
            .or_default()
            .entry(m.last_byte)
            .or_default();
        last_node.insert(m)
    }

    /// Total number of distinct (device, size, first, last) leaves visited. Exposed for tests
    /// and diagnostics only.
    #[cfg(test)]
    pub fn leaf_count(&self) -> usize {
        self.devices
            .lock()
            .values()
            .flat_map(|sizes| sizes.values())
            .flat_map(|firsts| firsts.values())
            .map(|lasts| lasts.len())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn meta(path: &str, device: u64, size: u64, first: u8, last: u8, content: &str) -> FileMetadata {
        FileMetadata {
            path: PathBuf::from(path),
            device,
            inode: 0,
            nlink: 1,
            flags: 0,
            size,
            depth: 0,
            clone_id: 0,
            first_byte: first,
            last_byte: last,
            hash: Some(blake3::hash(content.as_bytes()).into()),
        }
    }

    #[test]
    fn case_a_first_file_becomes_shortcut_no_duplicate() {
        let tree = VisitedTree::new();
        let m = meta("a", 1, 10, b'H', b'E', "aaaaaaaaaa");
        match tree.insert(m) {
            InsertOutcome::New => {}
            InsertOutcome::Duplicate(_) => panic!("first insert cannot be a duplicate"),
        }
        assert_eq!(tree.leaf_count(), 1);
    }

    #[test]
    fn case_b_equal_content_reports_prior_as_duplicate() {
        let tree = VisitedTree::new();
        let a = meta("a", 1, 10, b'H', b'E', "same-content");
        let b = meta("b", 1, 10, b'H', b'E', "same-content");
        tree.insert(a);
        match tree.insert(b) {
            InsertOutcome::Duplicate(prior) => assert_eq!(prior.path, PathBuf::from("a")),
            InsertOutcome::New => panic!("identical content must be reported as a duplicate"),
        }
    }

    #[test]
    fn case_b_different_content_promotes_shortcut_to_children() {
        let tree = VisitedTree::new();
        let a = meta("a", 1, 10, b'H', b'E', "content-one");
        let b = meta("b", 1, 10, b'H', b'E', "content-two");
        tree.insert(a);
        match tree.insert(b) {
            InsertOutcome::New => {}
            InsertOutcome::Duplicate(_) => panic!("distinct content must not be a duplicate"),
        }
        assert_eq!(tree.leaf_count(), 1);

        let c = meta("c", 1, 10, b'H', b'E', "content-one");
        match tree.insert(c) {
            InsertOutcome::Duplicate(prior) => assert_eq!(prior.path, PathBuf::from("a")),
            InsertOutcome::New => panic!("case C lookup against children must find the match"),
        }
    }

    #[test]
    fn distinct_size_never_collides() {
        let tree = VisitedTree::new();
        let a = meta("a", 1, 10, b'H', b'E', "aaaaaaaaaa");
        let b = meta("b", 1, 11, b'H', b'E', "aaaaaaaaaaa");
        tree.insert(a);
        match tree.insert(b) {
            InsertOutcome::New => {}
            InsertOutcome::Duplicate(_) => panic!("different sizes must never collide"),
        }
    }

    #[test]
    fn distinct_device_never_collides() {
        let tree = VisitedTree::new();
        let a = meta("a", 1, 10, b'H', b'E', "same-content");
        let b = meta("b", 2, 10, b'H', b'E', "same-content");
        tree.insert(a);
        match tree.insert(b) {
            InsertOutcome::New => {}
            InsertOutcome::Duplicate(_) => panic!("different devices must never collide"),
        }
    }
}
