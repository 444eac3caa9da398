// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Test utilities: a deterministic in-process event loop and a tester that drives it.
//!
//! [`TestLoop`] is the reference implementation of the host-glue contract - posted callbacks run
//! in FIFO order on the thread that created the loop, exactly as a GUI framework's queued
//! invocation would. [`AsyncTester`] layers the wait-for-completion patterns on top so tests can
//! start a task and block until it finished or a timeout fired.

use std::cell::Cell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use negative_impl::negative_impl;

use crate::channel::EventLoopProxy;
use crate::error::WaitTimeout;
use crate::runner::Runner;

/// If something (whatever) does not happen in a test within this time, the test will fail.
///
/// Conservative on purpose - this exists to break out of infinite loops, not to bound situations
/// that are actually expected.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

type Callback = Box<dyn FnOnce() + Send + 'static>;

/// A deterministic single-threaded event loop for tests and examples.
///
/// Callbacks posted through [`proxy()`][Self::proxy] (from any thread) are queued and executed,
/// in post order, by [`turn()`][Self::turn] or [`run_until()`][Self::run_until] on the thread
/// that created the loop - the stand-in for the GUI thread.
///
/// # Thread safety
///
/// The loop itself is single-threaded and must stay on its creating thread; only the
/// [`TestLoopProxy`] halves may travel.
pub struct TestLoop {
    shared: Arc<LoopShared>,
}

#[negative_impl]
impl !Send for TestLoop {}
#[negative_impl]
impl !Sync for TestLoop {}

impl TestLoop {
    /// Creates an empty loop bound to the current thread.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(LoopShared {
                queue: Mutex::new(VecDeque::new()),
                posted: Condvar::new(),
            }),
        }
    }

    /// A thread-safe posting handle, suitable for [`Runner`][crate::Runner] construction.
    #[must_use]
    pub fn proxy(&self) -> TestLoopProxy {
        TestLoopProxy {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Runs the oldest posted callback, if any. Returns whether one ran.
    pub fn turn(&self) -> bool {
        let callback = self.shared.pop();

        match callback {
            Some(callback) => {
                callback();
                true
            }
            None => false,
        }
    }

    /// Drives the loop until `predicate` returns true or `timeout` elapses, sleeping while the
    /// queue is empty. Returns whether the predicate was satisfied.
    ///
    /// The predicate is evaluated on the loop's thread, between callbacks.
    pub fn run_until(&self, timeout: Duration, mut predicate: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;

        loop {
            if predicate() {
                return true;
            }

            if self.turn() {
                continue;
            }

            if !self.shared.wait_for_post(deadline) {
                // Deadline passed with an empty queue; one final check so a predicate satisfied
                // by the last callback is not reported as a timeout.
                return predicate();
            }
        }
    }
}

impl Default for TestLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TestLoop {
    #[cfg_attr(test, mutants::skip)] // We have no contract to test here - can return anything.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestLoop")
            .field("queued", &self.shared.queue.lock().map(|q| q.len()).ok())
            .finish()
    }
}

/// The `Send + Sync` posting half of a [`TestLoop`].
pub struct TestLoopProxy {
    shared: Arc<LoopShared>,
}

impl EventLoopProxy for TestLoopProxy {
    fn post(&self, callback: Box<dyn FnOnce() + Send + 'static>) {
        self.shared.push(callback);
    }
}

impl Clone for TestLoopProxy {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl fmt::Debug for TestLoopProxy {
    #[cfg_attr(test, mutants::skip)] // We have no contract to test here - can return anything.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestLoopProxy").finish()
    }
}

struct LoopShared {
    queue: Mutex<VecDeque<Callback>>,
    posted: Condvar,
}

impl LoopShared {
    fn push(&self, callback: Callback) {
        self.queue
            .lock()
            .expect(crate::constants::ERR_POISONED_LOCK)
            .push_back(callback);
        self.posted.notify_all();
    }

    fn pop(&self) -> Option<Callback> {
        // The callback must run with the lock released - it may post further callbacks.
        self.queue
            .lock()
            .expect(crate::constants::ERR_POISONED_LOCK)
            .pop_front()
    }

    /// Blocks until the queue is non-empty or `deadline` passes. Returns whether there is
    /// something to run.
    fn wait_for_post(&self, deadline: Instant) -> bool {
        let mut queue = self
            .queue
            .lock()
            .expect(crate::constants::ERR_POISONED_LOCK);

        loop {
            if !queue.is_empty() {
                return true;
            }

            let Some(remaining) = deadline.checked_duration_since(Instant::now()).filter(|d| !d.is_zero()) else {
                return false;
            };

            let (guard, _result) = self
                .posted
                .wait_timeout(queue, remaining)
                .expect(crate::constants::ERR_POISONED_LOCK);
            queue = guard;
        }
    }
}

/// Starts tasks and drives a [`TestLoop`] until they finish, with a bounded wait.
///
/// The per-tester default timeout applies to every call that does not bring its own; it can be
/// adjusted with [`with_default_timeout`][Self::with_default_timeout].
#[derive(Debug)]
pub struct AsyncTester {
    default_timeout: Duration,
}

impl AsyncTester {
    /// Creates a tester with the default timeout of [`TEST_TIMEOUT`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            default_timeout: TEST_TIMEOUT,
        }
    }

    /// Replaces the per-tester default timeout.
    #[must_use]
    pub fn with_default_timeout(mut self, default_timeout: Duration) -> Self {
        self.default_timeout = default_timeout;
        self
    }

    /// Starts `task` on `runner` and drives `event_loop` until the task finished.
    ///
    /// # Errors
    ///
    /// Returns [`WaitTimeout`] if the task did not finish within the tester's default timeout.
    pub fn start_and_wait(
        &self,
        event_loop: &TestLoop,
        runner: &Runner,
        task: impl Future<Output = ()> + 'static,
    ) -> Result<(), WaitTimeout> {
        self.start_and_wait_with(event_loop, runner, task, self.default_timeout)
    }

    /// Like [`start_and_wait`][Self::start_and_wait], with a per-call timeout that overrides the
    /// tester default.
    ///
    /// # Errors
    ///
    /// Returns [`WaitTimeout`] if the task did not finish within `timeout`.
    pub fn start_and_wait_with(
        &self,
        event_loop: &TestLoop,
        runner: &Runner,
        task: impl Future<Output = ()> + 'static,
        timeout: Duration,
    ) -> Result<(), WaitTimeout> {
        let finished = Rc::new(Cell::new(false));

        let flag = Rc::clone(&finished);
        runner.spawn(async move {
            task.await;
            flag.set(true);
        });

        if event_loop.run_until(timeout, || finished.get()) {
            Ok(())
        } else {
            Err(WaitTimeout { timeout })
        }
    }

    /// Drives `event_loop` until `runner` reports idle.
    ///
    /// Only reliable with direct (synchronous) signal connections - see
    /// [`Runner::is_idle`][crate::Runner::is_idle].
    ///
    /// # Errors
    ///
    /// Returns [`WaitTimeout`] if the runner was not idle within the tester's default timeout.
    pub fn wait_until_idle(
        &self,
        event_loop: &TestLoop,
        runner: &Runner,
    ) -> Result<(), WaitTimeout> {
        if event_loop.run_until(self.default_timeout, || runner.is_idle()) {
            Ok(())
        } else {
            Err(WaitTimeout {
                timeout: self.default_timeout,
            })
        }
    }
}

impl Default for AsyncTester {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;

    // The loop stays on its creating thread; only the proxy halves may travel.
    assert_not_impl_any!(TestLoop: Send, Sync);
    assert_impl_all!(TestLoopProxy: Send, Sync);

    #[test]
    fn callbacks_run_in_post_order() {
        let event_loop = TestLoop::new();
        let proxy = event_loop.proxy();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for label in ["first", "second", "third"] {
            let seen = Arc::clone(&seen);
            proxy.post(Box::new(move || seen.lock().unwrap().push(label)));
        }

        assert!(event_loop.turn());
        assert!(event_loop.turn());
        assert!(event_loop.turn());
        assert!(!event_loop.turn());

        assert_eq!(
            seen.lock().unwrap().as_slice(),
            &["first", "second", "third"]
        );
    }

    #[test]
    fn callbacks_may_post_more_callbacks() {
        let event_loop = TestLoop::new();
        let proxy = event_loop.proxy();
        let count = Arc::new(AtomicUsize::new(0));

        let inner_count = Arc::clone(&count);
        let inner_proxy = proxy.clone();
        proxy.post(Box::new(move || {
            inner_count.fetch_add(1, Ordering::Relaxed);
            let innermost_count = Arc::clone(&inner_count);
            inner_proxy.post(Box::new(move || {
                innermost_count.fetch_add(1, Ordering::Relaxed);
            }));
        }));

        assert!(event_loop.run_until(TEST_TIMEOUT, || count.load(Ordering::Relaxed) == 2));
    }

    #[test]
    fn run_until_times_out_with_an_idle_queue() {
        let event_loop = TestLoop::new();
        assert!(!event_loop.run_until(Duration::from_millis(50), || false));
    }

    #[test]
    fn cross_thread_posts_wake_the_loop() {
        let event_loop = TestLoop::new();
        let proxy = event_loop.proxy();
        let posted = Arc::new(AtomicUsize::new(0));

        let worker = thread::spawn({
            let posted = Arc::clone(&posted);
            move || {
                thread::sleep(Duration::from_millis(20));
                proxy.post(Box::new(move || {
                    posted.fetch_add(1, Ordering::Relaxed);
                }));
            }
        });

        assert!(event_loop.run_until(TEST_TIMEOUT, || posted.load(Ordering::Relaxed) == 1));
        worker.join().unwrap();
    }

    #[test]
    fn tester_reports_timeouts() {
        let event_loop = TestLoop::new();
        let runner = Runner::new(event_loop.proxy());
        let tester = AsyncTester::new().with_default_timeout(Duration::from_millis(50));

        let result = tester.start_and_wait(&event_loop, &runner, futures::future::pending());
        assert!(result.is_err(), "a never-finishing task must time out");

        runner.close();
    }

    #[test]
    fn tester_waits_for_completion() {
        let event_loop = TestLoop::new();
        let runner = Runner::new(event_loop.proxy());
        let tester = AsyncTester::new();

        let handle = runner.clone();
        tester
            .start_and_wait(&event_loop, &runner, async move {
                let value = handle.run(|| 2 + 2).await;
                assert_eq!(value, 4);
            })
            .unwrap();

        tester.wait_until_idle(&event_loop, &runner).unwrap();
        runner.close();
    }
}
