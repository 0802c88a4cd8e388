use std::sync::atomic::{AtomicU64, Ordering};

/// `found`, `saved`, and `already_saved` from §4.8, plus a scan-time file counter the
/// progress listener needs. Each field is its own atomic; per §5 there's no single lock
/// protecting all three because nothing ever needs to read them as one consistent snapshot
/// mid-run, only at the very end.
#[derive(Default)]
pub struct Metrics {
    files_scanned: AtomicU64,
    duplicates_found: AtomicU64,
    bytes_saved: AtomicU64,
    bytes_already_saved: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Metrics::default()
    }

    pub fn record_file_scanned(&self) {
        self.files_scanned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_duplicate_found(&self) {
        self.duplicates_found.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_saved(&self, bytes: u64) {
        self.bytes_saved.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_already_saved(&self, bytes: u64) {
        self.bytes_already_saved.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn files_scanned(&self) -> u64 {
        self.files_scanned.load(Ordering::Relaxed)
    }

    pub fn duplicates_found(&self) -> u64 {
        self.duplicates_found.load(Ordering::Relaxed)
    }

    pub fn bytes_saved(&self) -> u64 {
        self.bytes_saved.load(Ordering::Relaxed)
    }

    pub fn bytes_already_saved(&self) -> u64 {
        self.bytes_already_saved.load(Ordering::Relaxed)
    }

    pub fn summary(&self) -> Summary {
        Summary {
            duplicates_found: self.duplicates_found(),
            bytes_saved: self.bytes_saved(),
            bytes_already_saved: self.bytes_already_saved(),
        }
    }
}

/// A snapshot of the run's final counters, serializable under the `json` feature for
/// machine-readable output (`--json`) alongside the plain-text summary §6 specifies.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "json", derive(serde::Serialize))]
pub struct Summary {
    pub duplicates_found: u64,
    pub bytes_saved: u64,
    pub bytes_already_saved: u64,
}
