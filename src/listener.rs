use std::fmt::Debug;
use std::path::Path;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

use crate::metrics::Metrics;
use crate::origin::OriginReason;

/// Observes scan and replacement progress. The core never decides how (or whether) to render
/// progress; it only calls through this trait, so a headless run, a `--no-progress` run, and
/// an interactive terminal run all drive the same orchestrator code.
pub trait ScanListener: Debug + Send {
    fn file_scanned(&mut self, path: &Path, metrics: &Metrics);
    fn scan_over(&mut self, metrics: &Metrics, scan_duration: Duration);
    fn duplicate_found(&mut self, member: &Path, origin: &Path, reason: OriginReason);
    fn replaced(&mut self, member: &Path, origin: &Path);
    fn already_saved(&mut self, member: &Path);
    fn skipped(&mut self, member: &Path, reason: &str);
}

#[derive(Debug, Default)]
pub struct SilentListener;

impl ScanListener for SilentListener {
    fn file_scanned(&mut self, _: &Path, _: &Metrics) {}
    fn scan_over(&mut self, _: &Metrics, _: Duration) {}
    fn duplicate_found(&mut self, _: &Path, _: &Path, _: OriginReason) {}
    fn replaced(&mut self, _: &Path, _: &Path) {}
    fn already_saved(&mut self, _: &Path) {}
    fn skipped(&mut self, _: &Path, _: &str) {}
}

/// Drives an [`indicatif`] spinner during the walk (the total file count isn't known up
/// front) and logs one line per replacement, matching the original tool's habit of printing
/// `"using %s as the clone origin (%s)"` and `"moved %s to use %s"` as it works.
pub struct IndicatifListener {
    bar: ProgressBar,
    verbose: bool,
}

impl Debug for IndicatifListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndicatifListener").field("verbose", &self.verbose).finish()
    }
}

impl IndicatifListener {
    pub fn new(verbose: bool) -> Self {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.enable_steady_tick(Duration::from_millis(120));
        IndicatifListener { bar, verbose }
    }
}

impl ScanListener for IndicatifListener {
    fn file_scanned(&mut self, path: &Path, metrics: &Metrics) {
        self.bar.set_message(format!(
            "{} dupes, {} scanned - {}",
            metrics.duplicates_found(),
            metrics.files_scanned(),
            path.display()
        ));
    }

    fn scan_over(&mut self, metrics: &Metrics, scan_duration: Duration) {
        self.bar.finish_and_clear();
        if self.verbose {
            println!(
                "scan finished in {:.2}s, {} duplicates found",
                scan_duration.as_secs_f64(),
                metrics.duplicates_found()
            );
        }
    }

    fn duplicate_found(&mut self, member: &Path, origin: &Path, reason: OriginReason) {
        if self.verbose {
            println!("using {} as the clone origin for {} ({})", origin.display(), member.display(), reason.as_str());
        }
    }

    fn replaced(&mut self, member: &Path, origin: &Path) {
        if self.verbose {
            println!("moved {} to use {}", member.display(), origin.display());
        }
    }

    fn already_saved(&mut self, member: &Path) {
        if self.verbose {
            println!("skipping {}, already shares data", member.display());
        }
    }

    fn skipped(&mut self, member: &Path, reason: &str) {
        if self.verbose {
            println!("skipping {}, {}", member.display(), reason);
        }
    }
}
