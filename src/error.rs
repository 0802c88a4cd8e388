use std::path::PathBuf;

use thiserror::Error;

/// Bad CLI flags or an unusable starting path. Always maps to exit code 1.
#[derive(Debug, Error)]
pub enum UsageError {
    #[error("thread count must not be negative: {0}")]
    NegativeThreads(i64),
    #[error("--link and --symlink are mutually exclusive")]
    ConflictingReplaceModes,
    #[error("path does not exist or is not readable: {path}")]
    BadPath { path: PathBuf, source: std::io::Error },
    #[error("could not start filesystem walk: {0}")]
    WalkerInit(String),
}

/// A single directory entry the walker could not stat or read. Logged and skipped.
#[derive(Debug, Error)]
#[error("{path}: {source}")]
pub struct WalkerError {
    pub path: PathBuf,
    pub source: std::io::Error,
}

/// Failure to build a [`crate::fingerprint::FileMetadata`] for one file. The entry is dropped.
#[derive(Debug, Error)]
pub enum FingerprintError {
    #[error("{path}: could not read clone id: {source}")]
    CloneId { path: PathBuf, source: std::io::Error },
    #[error("{path}: could not read file content: {source}")]
    Io { path: PathBuf, source: std::io::Error },
}

/// Failure while computing the cryptographic hash of a file. The shortcut holder, if any,
/// may be displaced per the visited-tree insertion protocol.
#[derive(Debug, Error)]
#[error("{path}: could not hash file content: {source}")]
pub struct HashError {
    pub path: PathBuf,
    pub source: std::io::Error,
}

/// Failure to clone, hardlink, or symlink a duplicate onto its origin. Per-file, never fatal.
#[derive(Debug, Error)]
pub enum ReplacementError {
    #[error("{path}: staging path too long")]
    NameTooLong { path: PathBuf },
    #[error("staging file already exists: {staging}; remove it to replace {path} with a clone")]
    StagingExists { path: PathBuf, staging: PathBuf },
    #[error("{path}: clone primitive failed: {source}")]
    CloneFailed { path: PathBuf, source: std::io::Error },
    #[error("{path}: clone produced an invalid staging file")]
    InvalidStaging { path: PathBuf },
    #[error("{path}: metadata-copy check reported it would copy file data")]
    MetadataCheckWouldCopyData { path: PathBuf },
    #[error("{path}: could not copy metadata onto staging file: {source}")]
    MetadataCopyFailed { path: PathBuf, source: std::io::Error },
    #[error("{path}: could not replace destination: {source}")]
    ReplaceFailed { path: PathBuf, source: std::io::Error },
    #[error("{path}: hardlink failed: {source}")]
    HardlinkFailed { path: PathBuf, source: std::io::Error },
    #[error("{path}: symlink failed: {source}")]
    SymlinkFailed { path: PathBuf, source: std::io::Error },
}

/// Unrecoverable condition (allocation failure, thread creation failure). The process aborts
/// with a diagnostic; this is never raised for a per-file condition.
#[derive(Debug, Error)]
#[error("fatal: {0}")]
pub struct FatalError(pub String);
