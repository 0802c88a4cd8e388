use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::path_entry::PathEntry;

/// Backoff between empty-queue polls. Short enough that a worker notices new work almost
/// immediately, long enough that an idle worker doesn't spin a whole core.
const POLL_BACKOFF: Duration = Duration::from_micros(100);

/// Single-producer, multi-consumer FIFO of [`PathEntry`] values.
///
/// The walker is the sole producer and calls [`PathEntryQueue::push`] followed, once the walk
/// is complete, by [`PathEntryQueue::finish`]. Workers call [`PathEntryQueue::pop_blocking`],
/// which returns `None` only once the queue is drained *and* the walker has finished — never
/// on a merely-empty-for-now queue.
#[derive(Debug)]
pub struct PathEntryQueue {
    entries: Mutex<VecDeque<PathEntry>>,
    walker_finished: AtomicBool,
}

impl PathEntryQueue {
    pub fn new() -> Self {
        PathEntryQueue {
            entries: Mutex::new(VecDeque::new()),
            walker_finished: AtomicBool::new(false),
        }
    }

    /// Enqueue one entry. Called only by the walker thread.
    pub fn push(&self, entry: PathEntry) {
        self.entries.lock().unwrap().push_back(entry);
    }

    /// Signal that no more entries will ever be pushed. Idempotent.
    pub fn finish(&self) {
        self.walker_finished.store(true, Ordering::Release);
    }

    pub fn is_finished(&self) -> bool {
        self.walker_finished.load(Ordering::Acquire)
    }

    /// Pop one entry, if any. Never blocks; used by the synchronous (threads = 0) path where
    /// the walker and the single consumer are the same call stack.
    pub fn try_pop(&self) -> Option<PathEntry> {
        self.entries.lock().unwrap().pop_front()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pop one entry, blocking with a short backoff while the queue is empty and the walker
    /// hasn't finished yet. Returns `None` once both conditions hold: the queue is empty and
    /// the walker is done, which is this worker's termination signal.
    pub fn pop_blocking(&self) -> Option<PathEntry> {
        loop {
            if let Some(entry) = self.entries.lock().unwrap().pop_front() {
                return Some(entry);
            }
            if self.is_finished() {
                // One more check: the walker may have pushed a final batch between our failed
                // pop above and observing the finished flag.
                if let Some(entry) = self.entries.lock().unwrap().pop_front() {
                    return Some(entry);
                }
                return None;
            }
            std::thread::sleep(POLL_BACKOFF);
        }
    }
}

impl Default for PathEntryQueue {
    fn default() -> Self {
        Self::new()
    }
}
