// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use threadpool::ThreadPool;
use tracing::{debug, trace};

use crate::channel::CompletionSender;
use crate::submission::Submission;

/// A fixed-size pool of worker threads consuming a single shared FIFO queue of submissions.
///
/// Workers run the blocking callables, capture their outcome (value or panic) and hand the
/// outcome to the completion channel addressed by submission id. Submissions execute in FIFO
/// order of submission; no ordering is implied between their completions.
///
/// Once stopped, submissions that were queued but not yet started are discarded; callables that
/// are already executing run to completion in the background, and their outcomes are left for the
/// channel to drop. Stopping never blocks the calling thread.
pub(crate) struct WorkerPool {
    pool: ThreadPool,
    stopped: Arc<AtomicBool>,
    completions: CompletionSender,
}

impl WorkerPool {
    /// Creates a pool with `max_threads` workers, or one worker per logical processor when no
    /// count is given.
    pub(crate) fn new(max_threads: Option<NonZeroUsize>, completions: CompletionSender) -> Self {
        let pool = match max_threads {
            Some(count) => ThreadPool::new(count.get()),
            None => threadpool::Builder::new().build(),
        };

        debug!(workers = pool.max_count(), "worker pool started");

        Self {
            pool,
            stopped: Arc::new(AtomicBool::new(false)),
            completions: completions.clone(),
        }
    }

    /// Enqueues one submission. Non-blocking, callable from the GUI thread.
    pub(crate) fn submit(&self, submission: Submission) {
        let stopped = Arc::clone(&self.stopped);
        let completions = self.completions.clone();

        self.pool.execute(move || {
            let id = submission.id();

            // A submission that was still queued when the pool stopped is discarded: its awaiting
            // task has already been dropped and nobody may observe the outcome.
            if stopped.load(Ordering::Acquire) {
                trace!(submission = %id, "discarding queued submission - pool stopped");
                return;
            }

            let outcome = submission.execute();
            completions.post(id, outcome);
        });
    }

    /// Stops the pool: queued submissions are discarded, executing callables finish in the
    /// background. Does not block. Safe to call multiple times.
    pub(crate) fn stop(&self) {
        if !self.stopped.swap(true, Ordering::AcqRel) {
            debug!("worker pool stopping - queued submissions will be discarded");
        }
    }

    #[cfg(test)]
    pub(crate) fn worker_count(&self) -> usize {
        self.pool.max_count()
    }
}

impl fmt::Debug for WorkerPool {
    #[cfg_attr(test, mutants::skip)] // We have no contract to test here - can return anything.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.pool.max_count())
            .field("stopped", &self.stopped.load(Ordering::Relaxed))
            .finish()
    }
}
