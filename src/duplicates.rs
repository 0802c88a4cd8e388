use std::collections::BTreeMap;

use parking_lot::Mutex;

use crate::fingerprint::{FileMetadata, Hash};

/// Groups files proven byte-identical by the visited tree into replacement sets, keyed by
/// their shared hash. A file only ever enters this map after a collision; singleton files
/// that never collide stay in the visited tree's shortcuts forever.
#[derive(Default)]
pub struct DuplicateMap {
    buckets: Mutex<BTreeMap<Hash, Vec<FileMetadata>>>,
}

impl DuplicateMap {
    pub fn new() -> Self {
        DuplicateMap::default()
    }

    /// Records that `new_file` duplicates `prior`. The first time a given hash collides, both
    /// `prior` and `new_file` are inserted (in that order, so "first seen" tie-breaks in §4.6
    /// remain well defined); subsequent collisions on the same hash just append.
    pub fn record_duplicate(&self, hash: Hash, prior: FileMetadata, new_file: FileMetadata) {
        let mut buckets = self.buckets.lock();
        let set = buckets.entry(hash).or_insert_with(Vec::new);
        if set.is_empty() {
            set.push(prior);
        }
        set.push(new_file);
    }

    /// Drains every equivalence class with two or more members, handing ownership to the
    /// caller (the orchestrator, which runs origin selection and replacement over each one).
    pub fn into_sets(self) -> Vec<Vec<FileMetadata>> {
        self.buckets
            .into_inner()
            .into_values()
            .filter(|set| set.len() >= 2)
            .collect()
    }

    #[cfg(test)]
    pub fn set_count(&self) -> usize {
        self.buckets.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn meta(path: &str) -> FileMetadata {
        FileMetadata {
            path: PathBuf::from(path),
            device: 1,
            inode: 0,
            nlink: 1,
            flags: 0,
            size: 10,
            depth: 0,
            clone_id: 0,
            first_byte: b'a',
            last_byte: b'a',
            hash: Some([0u8; 32]),
        }
    }

    #[test]
    fn first_collision_inserts_both_in_order() {
        let map = DuplicateMap::new();
        let hash = [1u8; 32];
        map.record_duplicate(hash, meta("a"), meta("b"));
        let sets = map.into_sets();
        assert_eq!(sets.len(), 1);
        assert_eq!(sets[0][0].path, PathBuf::from("a"));
        assert_eq!(sets[0][1].path, PathBuf::from("b"));
    }

    #[test]
    fn subsequent_collisions_append_without_reinserting_prior() {
        let map = DuplicateMap::new();
        let hash = [2u8; 32];
        map.record_duplicate(hash, meta("a"), meta("b"));
        map.record_duplicate(hash, meta("a"), meta("c"));
        let sets = map.into_sets();
        assert_eq!(sets[0].len(), 3);
        assert_eq!(sets[0][2].path, PathBuf::from("c"));
    }

    #[test]
    fn singleton_sets_are_never_returned() {
        let map = DuplicateMap::new();
        assert_eq!(map.set_count(), 0);
        assert!(map.into_sets().is_empty());
    }
}
