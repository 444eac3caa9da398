// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Steps a single root task forward. The driver is the only place in the crate that knows tasks
//! are futures: everything above it works against the three-way [`Step`] result. Values and
//! errors awaited by the task are injected through its await-state slots *before* the step, so
//! polling is all it takes to resume.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::task::noop_waker;

use crate::submission::Payload;

/// Drives one root task. Owned by the runner's live-task table.
///
/// Tasks are polled with a no-op waker: the runner advances a task exactly when one of its
/// awaited outcomes has been delivered, never in response to a wakeup. Awaiting anything that
/// relies on a real waker therefore suspends the task forever; only the awaitables produced by
/// [`run`][crate::Runner::run] and [`run_parallel`][crate::Runner::run_parallel] are supported
/// suspension points.
pub(crate) struct TaskDriver {
    /// `None` once the task has finished or failed; the future is dropped eagerly at that point
    /// so its captures (widgets, runner handles) are released before the outcome is reported.
    future: Option<Pin<Box<dyn Future<Output = ()>>>>,
}

impl TaskDriver {
    pub(crate) fn new(future: impl Future<Output = ()> + 'static) -> Self {
        Self {
            future: Some(Box::pin(future)),
        }
    }

    /// Resumes the task and reports where it ended up. The first call drives the task from its
    /// start to its first suspension or straight to a terminal state.
    ///
    /// # Panics
    ///
    /// Panics if called again after a terminal step was returned.
    pub(crate) fn advance(&mut self) -> Step {
        let future = self
            .future
            .as_mut()
            .expect("task advanced after reaching a terminal state");

        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);

        // We assert unwind safety because a panicking task is removed from the table and its
        // future dropped without ever being polled again - no one can observe broken state.
        match catch_unwind(AssertUnwindSafe(|| future.as_mut().poll(&mut cx))) {
            Ok(Poll::Pending) => Step::Suspended,
            Ok(Poll::Ready(())) => {
                self.future = None;
                Step::Finished
            }
            Err(payload) => {
                self.future = None;
                Step::Failed(payload)
            }
        }
    }
}

impl fmt::Debug for TaskDriver {
    #[cfg_attr(test, mutants::skip)] // We have no contract to test here - can return anything.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskDriver")
            .field("terminal", &self.future.is_none())
            .finish()
    }
}

/// Where one [`TaskDriver::advance`] call left the task.
pub(crate) enum Step {
    /// The task is waiting for outcomes it awaited; advance it again once one is delivered.
    Suspended,

    /// The task ran to completion.
    Finished,

    /// A panic escaped past the top of the task; the payload is reported to the error sink.
    Failed(Payload),
}

impl fmt::Debug for Step {
    #[cfg_attr(test, mutants::skip)] // We have no contract to test here - can return anything.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Suspended => write!(f, "Suspended"),
            Self::Finished => write!(f, "Finished"),
            Self::Failed(_) => write!(f, "Failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use futures::future;

    use super::*;

    #[test]
    fn task_without_suspension_finishes_on_first_advance() {
        let witness = Rc::new(Cell::new(false));
        let witness_clone = Rc::clone(&witness);

        let mut driver = TaskDriver::new(async move {
            witness_clone.set(true);
        });

        assert!(matches!(driver.advance(), Step::Finished));
        assert!(witness.get());
    }

    #[test]
    fn pending_task_reports_suspended() {
        let mut driver = TaskDriver::new(future::pending::<()>());

        assert!(matches!(driver.advance(), Step::Suspended));
        assert!(matches!(driver.advance(), Step::Suspended));
    }

    #[test]
    fn panicking_task_reports_failure_with_payload() {
        let mut driver = TaskDriver::new(async {
            panic!("boom");
        });

        match driver.advance() {
            Step::Failed(payload) => {
                assert_eq!(*payload.downcast::<&str>().unwrap(), "boom");
            }
            step => panic!("expected failure, got {step:?}"),
        }
    }

    #[test]
    fn finished_task_drops_its_future() {
        struct DropWitness(Rc<Cell<bool>>);

        impl Drop for DropWitness {
            fn drop(&mut self) {
                self.0.set(true);
            }
        }

        let dropped = Rc::new(Cell::new(false));
        let witness = DropWitness(Rc::clone(&dropped));

        let mut driver = TaskDriver::new(async move {
            let _witness = witness;
        });

        assert!(matches!(driver.advance(), Step::Finished));
        assert!(dropped.get(), "captures must be released at completion");
        drop(driver);
    }

    #[test]
    #[should_panic]
    fn advancing_a_finished_task_panics() {
        let mut driver = TaskDriver::new(async {});

        assert!(matches!(driver.advance(), Step::Finished));
        drop(driver.advance());
    }
}
