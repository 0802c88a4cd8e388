//! Owns a single run end to end (C8): spin up the shared state, drive the walker, run the
//! worker pool, then fold every duplicate set through origin selection and replacement.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};

use crate::clone_os::ClonePrimitive;
use crate::duplicates::DuplicateMap;
use crate::error::FatalError;
use crate::listener::ScanListener;
use crate::metrics::Metrics;
use crate::origin::{select_origin, OriginOutcome};
use crate::pool::{run_worker_loop, spawn_workers, WorkerContext};
use crate::queue::PathEntryQueue;
use crate::replace::{replace_member, ReplaceMode, ReplaceOptions};
use crate::visited_tree::VisitedTree;
use crate::walk::{FileWalker, WalkOptions};

pub struct RunConfig {
    pub roots: Vec<PathBuf>,
    pub mode: ReplaceMode,
    pub dry_run: bool,
    pub force: bool,
    pub threads: usize,
    pub one_file_system: bool,
    pub max_depth: u16,
}

pub struct RunReport {
    pub metrics: Arc<Metrics>,
}

/// Runs one full scan-and-replace pass: walk `config.roots` on the calling thread while
/// `config.threads` workers drain the queue concurrently, then replace every duplicate set
/// found once the walk and all fingerprinting is done.
pub fn run(
    config: &RunConfig,
    walker: &dyn FileWalker,
    clone_os: Arc<dyn ClonePrimitive>,
    listener: &mut dyn ScanListener,
) -> Result<RunReport, FatalError> {
    let queue = Arc::new(PathEntryQueue::new());
    let metrics = Arc::new(Metrics::new());

    let ctx = Arc::new(WorkerContext {
        queue: Arc::clone(&queue),
        visited: Arc::new(VisitedTree::new()),
        duplicates: Arc::new(DuplicateMap::new()),
        metrics: Arc::clone(&metrics),
        clone_os: Arc::clone(&clone_os),
    });

    let walk_opts = WalkOptions { one_file_system: config.one_file_system, max_depth: config.max_depth };
    let started = Instant::now();

    // A root whose volume can't produce a CoW clone is useless in clone mode: every member of
    // every duplicate set under it would fail to replace, so the whole subtree is skipped up
    // front rather than fingerprinted only to discover that at replacement time.
    let mut roots = Vec::with_capacity(config.roots.len());
    for root in &config.roots {
        if config.mode != ReplaceMode::Clone {
            roots.push(root.clone());
            continue;
        }
        match clone_os.probe_supports_clone(root) {
            Ok(true) => roots.push(root.clone()),
            Ok(false) => warn!(path = %root.display(), "volume does not support file clones, skipping subtree"),
            Err(e) => warn!(path = %root.display(), error = %e, "could not probe clone support, skipping subtree"),
        }
    }

    if config.threads == 0 {
        walker.walk(&roots, &walk_opts, &queue, &metrics, listener);
        run_worker_loop(&ctx);
    } else {
        let handles = spawn_workers(config.threads, Arc::clone(&ctx));
        walker.walk(&roots, &walk_opts, &queue, &metrics, listener);
        for handle in handles {
            handle.join().map_err(|_| FatalError("a worker thread panicked".to_string()))?;
        }
    }

    listener.scan_over(&metrics, started.elapsed());

    let ctx = Arc::try_unwrap(ctx).unwrap_or_else(|_| {
        panic!("no worker threads outlive their join handles, so this is the only reference left")
    });
    let duplicates = Arc::try_unwrap(ctx.duplicates)
        .unwrap_or_else(|_| panic!("the worker context above was the only other holder of this map"));

    let sets = duplicates.into_sets();
    info!(sets = sets.len(), "replacement phase starting");

    let replace_opts = ReplaceOptions { mode: config.mode, dry_run: config.dry_run, force: config.force };

    for set in sets {
        match select_origin(&set) {
            OriginOutcome::AlreadyUnified(_) => {
                let bytes: u64 = set.iter().skip(1).map(|m| m.size).sum();
                metrics.record_already_saved(bytes);
                for member in set.iter().skip(1) {
                    listener.already_saved(&member.path);
                }
            }
            OriginOutcome::AllCompressed(_) => {
                for member in &set {
                    listener.skipped(&member.path, "every member of this set is compressed");
                }
            }
            OriginOutcome::Selected(selection) => {
                let origin = &set[selection.origin_index];
                for (i, member) in set.iter().enumerate() {
                    if i == selection.origin_index {
                        continue;
                    }
                    listener.duplicate_found(&member.path, &origin.path, selection.reason);
                    match replace_member(origin, member, &replace_opts, clone_os.as_ref()) {
                        Ok(crate::replace::ReplaceOutcome::Replaced { bytes }) => {
                            metrics.record_saved(bytes);
                            listener.replaced(&member.path, &origin.path);
                        }
                        Ok(crate::replace::ReplaceOutcome::AlreadySaved { bytes }) => {
                            metrics.record_already_saved(bytes);
                            listener.already_saved(&member.path);
                        }
                        Ok(crate::replace::ReplaceOutcome::Skipped { reason }) => {
                            listener.skipped(&member.path, reason);
                        }
                        Err(e) => {
                            warn!(path = %member.path.display(), error = %e, "replacement failed");
                            listener.skipped(&member.path, "replacement failed");
                        }
                    }
                }
            }
        }
    }

    Ok(RunReport { metrics })
}
