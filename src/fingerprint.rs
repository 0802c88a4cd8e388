use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::clone_os::ClonePrimitive;
use crate::error::FingerprintError;
use crate::path_entry::PathEntry;

pub type Hash = [u8; 32];

/// A fully-stat'd, partially-fingerprinted file: everything [`PathEntry`] knows, plus the
/// cheap discriminators computed without reading the whole file. `hash` is populated lazily,
/// the first time the visited tree actually needs it to break a tie (§4.3 of the design).
#[derive(Debug, Clone)]
pub struct FileMetadata {
    pub path: PathBuf,
    pub device: u64,
    pub inode: u64,
    pub nlink: u64,
    pub flags: u32,
    pub size: u64,
    pub depth: u16,
    pub clone_id: u64,
    pub first_byte: u8,
    pub last_byte: u8,
    pub hash: Option<Hash>,
}

impl FileMetadata {
    /// Compute the hash if it hasn't been computed yet, caching the result. Never recomputes
    /// or mutates an already-populated hash (data-model invariant iii).
    pub fn hash_or_compute(&mut self) -> Result<Hash, std::io::Error> {
        if let Some(h) = self.hash {
            return Ok(h);
        }
        let h = hash_file(&self.path)?;
        self.hash = Some(h);
        Ok(h)
    }
}

/// Hashes an entire file's content with BLAKE3, streaming in fixed-size chunks so memory use
/// is independent of file size. Any I/O failure surfaces as [`std::io::Error`]; the caller
/// (the visited tree) turns that into a [`crate::error::HashError`] with the path attached.
pub fn hash_file(path: &Path) -> Result<Hash, std::io::Error> {
    const CHUNK: usize = 64 * 1024;
    let mut file = File::open(path)?;
    let mut hasher = blake3::Hasher::new();
    let mut buf = vec![0u8; CHUNK];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(*hasher.finalize().as_bytes())
}

/// Builds a [`FileMetadata`] from a [`PathEntry`], consuming it. Queries the clone id through
/// the platform adapter, then reads the first and last byte of the file. Does not hash.
pub fn fingerprint(
    entry: PathEntry,
    clone_os: &dyn ClonePrimitive,
) -> Result<FileMetadata, FingerprintError> {
    let clone_id = clone_os
        .clone_id(&entry.path)
        .map_err(|source| FingerprintError::CloneId { path: entry.path.clone(), source })?;

    let (first_byte, last_byte) = read_first_and_last_byte(&entry.path, entry.size)
        .map_err(|source| FingerprintError::Io { path: entry.path.clone(), source })?;

    Ok(FileMetadata {
        path: entry.path,
        device: entry.device,
        inode: entry.inode,
        nlink: entry.nlink,
        flags: entry.flags,
        size: entry.size,
        depth: entry.depth,
        clone_id,
        first_byte,
        last_byte,
        hash: None,
    })
}

fn read_first_and_last_byte(path: &Path, size: u64) -> Result<(u8, u8), std::io::Error> {
    let mut file = File::open(path)?;
    let mut byte = [0u8; 1];

    file.read_exact(&mut byte)?;
    let first = byte[0];

    if size > 1 {
        file.seek(SeekFrom::Start(size - 1))?;
        file.read_exact(&mut byte)?;
    }
    let last = byte[0];

    Ok((first, last))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clone_os::tests::FakeClonePrimitive;
    use std::io::Write;
    use tempfile::tempdir;

    fn write_file(dir: &Path, name: &str, content: &[u8]) -> PathEntry {
        let path = dir.join(name);
        let mut f = File::create(&path).unwrap();
        f.write_all(content).unwrap();
        drop(f);
        let meta = std::fs::metadata(&path).unwrap();
        use std::os::unix::fs::MetadataExt;
        PathEntry {
            path,
            device: meta.dev(),
            inode: meta.ino(),
            nlink: meta.nlink(),
            flags: 0,
            size: meta.len(),
            depth: 0,
        }
    }

    #[test]
    fn captures_first_and_last_byte() {
        let dir = tempdir().unwrap();
        let entry = write_file(dir.path(), "a", b"Hello, World!E");
        let fake = FakeClonePrimitive::new();
        let fm = fingerprint(entry, &fake).unwrap();
        assert_eq!(fm.first_byte, b'H');
        assert_eq!(fm.last_byte, b'E');
        assert!(fm.hash.is_none());
    }

    #[test]
    fn single_byte_file_has_equal_first_and_last() {
        let dir = tempdir().unwrap();
        let entry = write_file(dir.path(), "a", b"X");
        let fake = FakeClonePrimitive::new();
        let fm = fingerprint(entry, &fake).unwrap();
        assert_eq!(fm.first_byte, b'X');
        assert_eq!(fm.last_byte, b'X');
    }

    #[test]
    fn hash_is_computed_once_and_cached() {
        let dir = tempdir().unwrap();
        let entry = write_file(dir.path(), "a", b"same content");
        let fake = FakeClonePrimitive::new();
        let mut fm = fingerprint(entry, &fake).unwrap();
        let h1 = fm.hash_or_compute().unwrap();
        let h2 = fm.hash_or_compute().unwrap();
        assert_eq!(h1, h2);
    }
}
