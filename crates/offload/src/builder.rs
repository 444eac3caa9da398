// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt;
use std::num::NonZeroUsize;
use std::panic::resume_unwind;
use std::sync::Arc;

use crate::channel::EventLoopProxy;
use crate::error::UnhandledPanic;
use crate::runner::Runner;

/// Collects configuration for a [`Runner`].
///
/// ```
/// use std::num::NonZeroUsize;
///
/// use offload::{Runner, testing::TestLoop};
///
/// let event_loop = TestLoop::new();
/// let runner = Runner::builder()
///     .with_max_threads(NonZeroUsize::new(2).expect("nonzero"))
///     .build(event_loop.proxy());
/// # runner.close();
/// ```
#[must_use]
pub struct RunnerBuilder {
    max_threads: Option<NonZeroUsize>,
    on_unhandled_error: Option<Box<dyn Fn(UnhandledPanic) + 'static>>,
}

impl RunnerBuilder {
    pub(crate) fn new() -> Self {
        Self {
            max_threads: None,
            on_unhandled_error: None,
        }
    }

    /// Sets the worker count of the pool. The default is one worker per logical processor.
    pub fn with_max_threads(mut self, max_threads: NonZeroUsize) -> Self {
        self.max_threads = Some(max_threads);
        self
    }

    /// Installs `sink` as the receiver of panics that escape root tasks.
    ///
    /// The default sink re-posts the payload to the GUI thread and resumes the unwind there on
    /// the next event-loop turn, so unhandled panics surface instead of vanishing. A custom sink
    /// replaces that behavior entirely - whatever it does not re-raise is considered handled.
    pub fn on_unhandled_error(mut self, sink: impl Fn(UnhandledPanic) + 'static) -> Self {
        self.on_unhandled_error = Some(Box::new(sink));
        self
    }

    /// Builds the runner on the current thread, which becomes its GUI thread.
    ///
    /// `proxy` is the host framework's cross-thread posting primitive; its callbacks must run on
    /// this thread.
    #[must_use]
    pub fn build(self, proxy: impl EventLoopProxy) -> Runner {
        Runner::new_pooled(self.max_threads, self.on_unhandled_error, Arc::new(proxy))
    }

    /// Builds the sequential variant with this configuration.
    ///
    /// `with_max_threads` has no effect here - there is no pool. A configured error sink is
    /// honored; the default sink of the sequential variant resumes root-task panics
    /// synchronously in the caller.
    #[must_use]
    pub fn build_sequential(self) -> Runner {
        match self.on_unhandled_error {
            Some(sink) => Runner::sequential_with_sink(sink),
            None => Runner::sequential_with_sink(Box::new(|panic: UnhandledPanic| {
                resume_unwind(panic.into_payload());
            })),
        }
    }
}

impl fmt::Debug for RunnerBuilder {
    #[cfg_attr(test, mutants::skip)] // We have no contract to test here - can return anything.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunnerBuilder")
            .field("max_threads", &self.max_threads)
            .field("custom_error_sink", &self.on_unhandled_error.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults_are_empty() {
        let builder = RunnerBuilder::new();
        assert!(builder.max_threads.is_none());
        assert!(builder.on_unhandled_error.is_none());
    }

    #[test]
    fn with_max_threads_is_recorded() {
        let builder = RunnerBuilder::new().with_max_threads(NonZeroUsize::new(4).unwrap());
        assert_eq!(builder.max_threads, NonZeroUsize::new(4));
    }

    #[test]
    fn sequential_build_honors_the_sink() {
        let runner = RunnerBuilder::new()
            .on_unhandled_error(|_| { /* swallow */ })
            .build_sequential();

        runner.spawn(async {
            panic!("boom");
        });

        // The panic went to the sink instead of propagating out of spawn.
        assert!(runner.is_idle());
    }
}
