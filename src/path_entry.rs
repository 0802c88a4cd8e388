use std::path::PathBuf;

/// One file the walker has stat'd but not yet fingerprinted.
///
/// Produced by the filesystem adapter, consumed exactly once by a worker, which destroys it
/// while building a [`crate::fingerprint::FileMetadata`].
#[derive(Debug, Clone)]
pub struct PathEntry {
    pub path: PathBuf,
    pub device: u64,
    pub inode: u64,
    pub nlink: u64,
    pub flags: u32,
    pub size: u64,
    pub depth: u16,
}
