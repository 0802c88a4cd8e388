//! Parallel consumers of the path-entry queue (C5): each worker fingerprints a file, inserts
//! it into the visited tree, and — on a collision — records it in the duplicate map.

use std::sync::Arc;

use tracing::warn;

use crate::clone_os::ClonePrimitive;
use crate::duplicates::DuplicateMap;
use crate::fingerprint::fingerprint;
use crate::metrics::Metrics;
use crate::queue::PathEntryQueue;
use crate::visited_tree::{InsertOutcome, VisitedTree};

pub struct WorkerContext {
    pub queue: Arc<PathEntryQueue>,
    pub visited: Arc<VisitedTree>,
    pub duplicates: Arc<DuplicateMap>,
    pub metrics: Arc<Metrics>,
    pub clone_os: Arc<dyn ClonePrimitive>,
}

/// One iteration of the worker loop: dequeue, fingerprint, insert, and on a collision record
/// the pair in the duplicate map. Shared between the real blocking loop and tests so both
/// exercise identical logic.
fn process_one(ctx: &WorkerContext, entry: crate::path_entry::PathEntry) {
    let metadata = match fingerprint(entry, ctx.clone_os.as_ref()) {
        Ok(m) => m,
        Err(e) => {
            warn!(error = %e, "dropping entry: fingerprint failed");
            return;
        }
    };

    // The tree takes `metadata` by value and, on a duplicate, only hands back the prior
    // file — so the new file's own record has to be cloned out beforehand if the duplicate
    // map is going to have both members to hand to the replacer later.
    let member = metadata.clone();
    match ctx.visited.insert(metadata) {
        InsertOutcome::New => {}
        InsertOutcome::Duplicate(prior) => {
            ctx.metrics.record_duplicate_found();
            let hash = prior.hash.expect("tree only reports a duplicate once both sides are hashed");
            ctx.duplicates.record_duplicate(hash, prior, member);
        }
    }
}

/// Runs the worker loop on the calling thread until the queue is drained and the walker has
/// finished. Used both by spawned worker threads and by the `threads = 0` synchronous path.
pub fn run_worker_loop(ctx: &WorkerContext) {
    while let Some(entry) = ctx.queue.pop_blocking() {
        process_one(ctx, entry);
    }
}

/// Spawns `thread_count` workers and blocks until all of them have drained the queue. A
/// `thread_count` of 0 is handled by the caller (orchestrator), which runs the loop
/// synchronously instead of calling this function.
pub fn spawn_workers(thread_count: usize, ctx: Arc<WorkerContext>) -> Vec<std::thread::JoinHandle<()>> {
    (0..thread_count)
        .map(|_| {
            let ctx = Arc::clone(&ctx);
            std::thread::spawn(move || run_worker_loop(&ctx))
        })
        .collect()
}
