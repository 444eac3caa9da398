// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::any::Any;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};

/// Type-erased value transported between threads.
///
/// Both successful results and panic payloads travel in this shape - the submitting side knows
/// the concrete type and downcasts when the outcome is consumed.
pub(crate) type Payload = Box<dyn Any + Send + 'static>;

/// The blocking callable of one submission, with its result already erased for transport.
pub(crate) type BlockingJob = Box<dyn FnOnce() -> Payload + Send + 'static>;

/// Identifies one unit of blocking work handed to the worker pool.
///
/// Ids are allocated by the runner from a monotonic counter and are never reused within the
/// lifetime of a runner, so a late completion can never be confused with a newer submission.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub(crate) struct SubmissionId(u64);

impl SubmissionId {
    pub(crate) const fn new(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for SubmissionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One unit of blocking work: an id plus the callable to execute on a worker thread.
pub(crate) struct Submission {
    id: SubmissionId,
    job: BlockingJob,
}

impl Submission {
    pub(crate) fn new(id: SubmissionId, job: BlockingJob) -> Self {
        Self { id, job }
    }

    pub(crate) const fn id(&self) -> SubmissionId {
        self.id
    }

    /// Runs the callable and captures whatever comes out of it, value or panic.
    ///
    /// The panic payload is kept as-is so it can be resumed later on the thread that awaits this
    /// submission; nothing is re-raised here.
    pub(crate) fn execute(self) -> Outcome {
        // We assert unwind safety because the job is moved into this call and its captures are
        // unreachable afterwards - a panicked job leaves no state behind that anyone can observe.
        match catch_unwind(AssertUnwindSafe(|| (self.job)())) {
            Ok(value) => Outcome::Value(value),
            Err(payload) => Outcome::Panicked(payload),
        }
    }
}

impl fmt::Debug for Submission {
    #[cfg_attr(test, mutants::skip)] // We have no contract to test here - can return anything.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Submission").field("id", &self.id).finish()
    }
}

/// What running one submission produced. Consumed exactly once by the awaiting task.
pub(crate) enum Outcome {
    /// The callable returned normally.
    Value(Payload),

    /// The callable panicked; this is the payload the panic carried.
    Panicked(Payload),
}

impl fmt::Debug for Outcome {
    #[cfg_attr(test, mutants::skip)] // We have no contract to test here - can return anything.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(_) => write!(f, "Value"),
            Self::Panicked(_) => write!(f, "Panicked"),
        }
    }
}
