// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::marker::PhantomData;
use std::panic::resume_unwind;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use futures::{Stream, StreamExt};

use crate::runner::Runner;
use crate::submission::{BlockingJob, Outcome, Payload};

/// The slot one suspension waits on: outcomes land here in delivery order until every submission
/// of the await has reported back.
///
/// Shared between the awaitable (which consumes outcomes) and the runner's pending-submission
/// table (which holds a weak reference per in-flight submission so late outcomes can be drained
/// when the awaitable is gone).
pub(crate) struct AwaitState {
    arrived: VecDeque<Outcome>,
    outstanding: usize,
}

impl AwaitState {
    pub(crate) fn new(outstanding: usize) -> Self {
        Self {
            arrived: VecDeque::new(),
            outstanding,
        }
    }

    /// Records one delivered outcome.
    pub(crate) fn deliver(&mut self, outcome: Outcome) {
        self.outstanding = self
            .outstanding
            .checked_sub(1)
            .expect("more outcomes delivered than submissions were registered");
        self.arrived.push_back(outcome);
    }

    fn pop(&mut self) -> Option<Outcome> {
        self.arrived.pop_front()
    }

    fn is_exhausted(&self) -> bool {
        self.arrived.is_empty() && self.outstanding == 0
    }
}

impl fmt::Debug for AwaitState {
    #[cfg_attr(test, mutants::skip)] // We have no contract to test here - can return anything.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwaitState")
            .field("arrived", &self.arrived.len())
            .field("outstanding", &self.outstanding)
            .finish()
    }
}

/// Turns a type-erased outcome back into the value the caller submitted, or resumes the panic
/// the callable died with - at the await point, on the GUI thread.
fn resolve<T: 'static>(outcome: Outcome) -> T {
    match outcome {
        Outcome::Value(payload) => *payload
            .downcast::<T>()
            .expect("delivered outcome does not match the awaited submission's result type"),
        Outcome::Panicked(payload) => resume_unwind(payload),
    }
}

/// The result of one blocking callable shipped to the worker pool by
/// [`Runner::run`][crate::Runner::run].
///
/// Awaiting it suspends the task until the worker has produced the callable's value, which is
/// then returned on the GUI thread. If the callable panicked, the panic resumes at the `.await`
/// with its original payload, so the task observes exactly what the callable raised.
///
/// The callable is submitted when this future is first polled, i.e. at the `.await`.
///
/// # Panics
///
/// Polling this future anywhere other than inside a task driven by the owning runner (started
/// via [`spawn`][crate::Runner::spawn] or a [`to_sync`][crate::Runner::to_sync] adapter) panics:
/// there is no event loop to resume the caller anywhere else.
#[must_use = "the callable is only submitted once this is awaited"]
pub struct Offloaded<T> {
    runner: Runner,
    state: OffloadedState,
    _result: PhantomData<fn() -> T>,
}

enum OffloadedState {
    /// Holds the callable until the first poll submits it.
    Unsubmitted(Option<BlockingJob>),

    /// Submitted; waiting for the single outcome to land in the slot.
    Waiting(Rc<RefCell<AwaitState>>),

    /// The outcome has been consumed.
    Consumed,
}

impl<T> Offloaded<T> {
    pub(crate) fn new(runner: Runner, job: BlockingJob) -> Self {
        Self {
            runner,
            state: OffloadedState::Unsubmitted(Some(job)),
            _result: PhantomData,
        }
    }
}

impl<T> Future for Offloaded<T>
where
    T: Send + 'static,
{
    type Output = T;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        loop {
            match &mut this.state {
                OffloadedState::Unsubmitted(job) => {
                    let job = job
                        .take()
                        .expect("unsubmitted state always holds the callable");
                    let state = this.runner.register(vec![job]);

                    // Loop around: with the sequential runner the outcome is already in the slot.
                    this.state = OffloadedState::Waiting(state);
                }
                OffloadedState::Waiting(state) => {
                    let outcome = state.borrow_mut().pop();

                    return match outcome {
                        Some(outcome) => {
                            this.state = OffloadedState::Consumed;
                            Poll::Ready(resolve::<T>(outcome))
                        }
                        None => Poll::Pending,
                    };
                }
                OffloadedState::Consumed => {
                    panic!("offloaded result polled after it was already consumed")
                }
            }
        }
    }
}

impl<T> fmt::Debug for Offloaded<T> {
    #[cfg_attr(test, mutants::skip)] // We have no contract to test here - can return anything.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.state {
            OffloadedState::Unsubmitted(_) => "unsubmitted",
            OffloadedState::Waiting(_) => "waiting",
            OffloadedState::Consumed => "consumed",
        };
        f.debug_struct("Offloaded").field("state", &state).finish()
    }
}

/// The results of a [`Runner::run_parallel`][crate::Runner::run_parallel] fan-out, yielded in
/// completion order.
///
/// This is a finite [`Stream`]: each item is the value of whichever callable finished next, not
/// of the callable at that position in the submitted sequence. A callable that panicked resumes
/// its panic at the iteration point where its completion was delivered; the remaining callables
/// keep executing and their outcomes are quietly drained so the runner returns to idle.
///
/// All callables are submitted together when the stream is first polled.
///
/// # Panics
///
/// Like [`Offloaded`], this may only be polled inside a task driven by the owning runner.
#[must_use = "the callables are only submitted once this is polled"]
pub struct Completions<T> {
    runner: Runner,
    state: CompletionsState,
    _item: PhantomData<fn() -> T>,
}

enum CompletionsState {
    /// Holds the callables until the first poll submits the whole batch.
    Unsubmitted(Option<Vec<BlockingJob>>),

    /// Submitted; outcomes are consumed from the slot as they arrive.
    Streaming(Rc<RefCell<AwaitState>>),
}

impl<T> Completions<T> {
    pub(crate) fn new(runner: Runner, jobs: Vec<BlockingJob>) -> Self {
        Self {
            runner,
            state: CompletionsState::Unsubmitted(Some(jobs)),
            _item: PhantomData,
        }
    }

    /// Resolves to the next value in completion order, or `None` once every callable has
    /// reported back. Shorthand for [`StreamExt::next`].
    pub fn next(&mut self) -> futures::stream::Next<'_, Self>
    where
        T: Send + 'static,
    {
        StreamExt::next(self)
    }
}

impl<T> Stream for Completions<T>
where
    T: Send + 'static,
{
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            match &mut this.state {
                CompletionsState::Unsubmitted(jobs) => {
                    let jobs = jobs
                        .take()
                        .expect("unsubmitted state always holds the callables");
                    let state = this.runner.register(jobs);

                    // Loop around: an empty batch (or the sequential runner) is ready right away.
                    this.state = CompletionsState::Streaming(state);
                }
                CompletionsState::Streaming(state) => {
                    let (outcome, exhausted) = {
                        let mut state = state.borrow_mut();
                        let outcome = state.pop();
                        let exhausted = state.is_exhausted();
                        (outcome, exhausted)
                    };

                    return match outcome {
                        Some(outcome) => Poll::Ready(Some(resolve::<T>(outcome))),
                        None if exhausted => Poll::Ready(None),
                        None => Poll::Pending,
                    };
                }
            }
        }
    }
}

impl<T> fmt::Debug for Completions<T> {
    #[cfg_attr(test, mutants::skip)] // We have no contract to test here - can return anything.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.state {
            CompletionsState::Unsubmitted(_) => "unsubmitted",
            CompletionsState::Streaming(_) => "streaming",
        };
        f.debug_struct("Completions").field("state", &state).finish()
    }
}

/// Erases a typed callable into the transport shape used by submissions.
pub(crate) fn erase_job<T, F>(f: F) -> BlockingJob
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    Box::new(move || Box::new(f()) as Payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value_of(outcome: Option<Outcome>) -> &'static str {
        match outcome.expect("expected an arrived outcome") {
            Outcome::Value(payload) => *payload.downcast::<&str>().unwrap(),
            Outcome::Panicked(_) => panic!("expected a value outcome"),
        }
    }

    #[test]
    fn await_state_delivers_in_arrival_order() {
        let mut state = AwaitState::new(2);

        state.deliver(Outcome::Value(Box::new("late")));
        state.deliver(Outcome::Value(Box::new("later")));

        assert_eq!(value_of(state.pop()), "late");
        assert_eq!(value_of(state.pop()), "later");
        assert!(state.is_exhausted());
    }

    #[test]
    fn await_state_is_not_exhausted_while_outcomes_are_outstanding() {
        let mut state = AwaitState::new(2);
        assert!(!state.is_exhausted());

        state.deliver(Outcome::Value(Box::new(1)));
        drop(state.pop());
        assert!(!state.is_exhausted());

        state.deliver(Outcome::Value(Box::new(2)));
        drop(state.pop());
        assert!(state.is_exhausted());
    }

    #[test]
    fn empty_await_state_is_exhausted_immediately() {
        let state = AwaitState::new(0);
        assert!(state.is_exhausted());
    }

    #[test]
    #[should_panic]
    fn excess_delivery_panics() {
        let mut state = AwaitState::new(0);
        state.deliver(Outcome::Value(Box::new(1)));
    }

    #[test]
    fn resolve_returns_the_submitted_value() {
        let value: i32 = resolve(Outcome::Value(Box::new(42)));
        assert_eq!(value, 42);
    }

    #[test]
    #[should_panic(expected = "boom")]
    fn resolve_resumes_the_captured_panic() {
        let _: i32 = resolve(Outcome::Panicked(Box::new("boom")));
    }
}
