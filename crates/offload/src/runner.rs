// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::mem;
use std::num::NonZeroUsize;
use std::panic::resume_unwind;
use std::rc::{Rc, Weak};
use std::sync::Arc;

use tracing::{debug, trace};

use crate::builder::RunnerBuilder;
use crate::channel::{CompletionChannel, EventLoopProxy};
use crate::driver::{Step, TaskDriver};
use crate::error::UnhandledPanic;
use crate::join::{AwaitState, Completions, Offloaded, erase_job};
use crate::pool::WorkerPool;
use crate::submission::{BlockingJob, Outcome, Submission, SubmissionId};

/// Bridges suspendable GUI event handlers to a worker thread pool.
///
/// Handlers are written as plain futures that stay on the GUI thread; blocking work is shipped to
/// the pool with [`run`][Self::run] / [`run_parallel`][Self::run_parallel] and the handler
/// resumes on the GUI thread once the result is back, so all widget access remains
/// single-threaded. [`to_sync`][Self::to_sync] adapts such a handler into a plain callable that
/// can be connected directly to a GUI signal.
///
/// Construct with [`Runner::new`] (or [`Runner::builder`] for configuration) on the GUI thread,
/// passing the host framework's [`EventLoopProxy`]. For deterministic tests there is
/// [`Runner::sequential`], which executes everything inline in the caller's thread under the same
/// contract.
///
/// `Runner` is a cheap handle: clones share one underlying runner. It is deliberately not `Send`;
/// every operation happens on the thread that created it.
///
/// # Shutdown
///
/// [`close`][Self::close] is a hard stop: tasks that are suspended at that moment are dropped and
/// never resumed, queued submissions are discarded, and outcomes still in flight evaporate. This
/// is what makes teardown safe - after `close` returns, no widget can be touched by a stale
/// resumption. Dropping the last handle closes the runner as well.
pub struct Runner {
    inner: Rc<Inner>,
}

impl Runner {
    /// Creates a runner with default configuration: one worker per logical processor and the
    /// default error sink (panics from root tasks resume on the GUI thread at the next
    /// event-loop turn).
    ///
    /// Must be called on the GUI thread; `proxy` must post its callbacks back to this thread.
    #[must_use]
    pub fn new(proxy: impl EventLoopProxy) -> Self {
        Self::builder().build(proxy)
    }

    /// Starts configuring a runner. See [`RunnerBuilder`].
    #[must_use]
    pub fn builder() -> RunnerBuilder {
        RunnerBuilder::new()
    }

    /// Creates the sequential variant: same contract, but callables run synchronously in the
    /// caller's thread at the await point and [`run_parallel`][Self::run_parallel] delivers in
    /// submission order instead of completion order.
    ///
    /// Intended as a deterministic substitute in unit tests, where scheduling variance is noise.
    /// The default error sink resumes root-task panics synchronously.
    #[must_use]
    pub fn sequential() -> Self {
        Self::builder().build_sequential()
    }

    pub(crate) fn sequential_with_sink(sink: ErrorSink) -> Self {
        Self::assemble(Backend::Sequential, sink)
    }

    pub(crate) fn new_pooled(
        max_threads: Option<NonZeroUsize>,
        sink: Option<ErrorSink>,
        proxy: Arc<dyn EventLoopProxy>,
    ) -> Self {
        let channel = CompletionChannel::new(proxy);
        let pool = WorkerPool::new(max_threads, channel.sender());

        let sink = sink.unwrap_or_else(|| {
            let proxy = channel.proxy();
            Box::new(move |panic: UnhandledPanic| {
                let payload = panic.into_payload();
                proxy.post(Box::new(move || resume_unwind(payload)));
            })
        });

        let runner = Self::assemble(Backend::Pooled { pool, channel }, sink);

        // The channel holds the runner weakly: completions arriving after the last handle is
        // gone are dropped, not resumed.
        let weak = Rc::downgrade(&runner.inner);
        if let Backend::Pooled { channel, .. } = &runner.inner.backend {
            channel.install_handler(Rc::new(move |id, outcome| match weak.upgrade() {
                Some(inner) => Inner::deliver(&inner, id, outcome),
                None => trace!(submission = %id, "dropping completion - runner no longer exists"),
            }));
        }

        runner
    }

    fn assemble(backend: Backend, sink: ErrorSink) -> Self {
        Self {
            inner: Rc::new(Inner {
                core: RefCell::new(Core {
                    tasks: HashMap::new(),
                    pending: HashMap::new(),
                    current: None,
                    next_task: 0,
                    next_submission: 0,
                    closed: false,
                }),
                backend,
                sink,
            }),
        }
    }

    /// Ships `f` to the worker pool and returns its result as an awaitable.
    ///
    /// Must be awaited from within a task driven by this runner; the task suspends at the
    /// `.await` and resumes on the GUI thread with the callable's value. A panic in `f` resumes
    /// at the `.await` with its original payload - fallible work should simply return a
    /// [`Result`] and handle it after the await.
    ///
    /// Equivalent to a single-callable [`run_parallel`][Self::run_parallel] consumed as one item.
    pub fn run<T, F>(&self, f: F) -> Offloaded<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        Offloaded::new(self.clone(), erase_job(f))
    }

    /// Ships every callable in `fns` to the worker pool at once and returns their results as a
    /// stream in *completion order* - whichever callable finishes first is yielded first,
    /// regardless of its position in `fns`.
    ///
    /// An empty `fns` yields an immediately-exhausted stream. See [`Completions`] for the error
    /// and drop semantics.
    pub fn run_parallel<T, I, F>(&self, fns: I) -> Completions<T>
    where
        I: IntoIterator<Item = F>,
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        Completions::new(self.clone(), fns.into_iter().map(erase_job).collect())
    }

    /// Schedules `task` as a root task and drives it to its first suspension (or completion)
    /// before returning.
    ///
    /// Fire-and-forget: there is no handle to await. A panic escaping the task is delivered to
    /// the configured error sink instead of being swallowed. After [`close`][Self::close] this
    /// is inert.
    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + 'static,
    {
        let id = {
            let mut core = self.inner.core.borrow_mut();

            if core.closed {
                trace!("ignoring task spawned after close");
                return;
            }

            let id = TaskId(core.next_task);
            core.next_task += 1;
            core.tasks.insert(id, Some(TaskDriver::new(task)));
            id
        };

        trace!(task = id.0, "root task started");
        Inner::advance_task(&self.inner, id);
    }

    /// Adapts an async event handler into a plain callable suitable for direct connection to a
    /// GUI signal.
    ///
    /// Invoking the returned callable builds the task by calling `handler` with the signal's
    /// argument and hands it to [`spawn`][Self::spawn]; it returns nothing, as a slot's return
    /// value carries no task result. Handlers without arguments take `()`.
    ///
    /// The callable keeps the runner alive while it is connected. Invocations after
    /// [`close`][Self::close] do nothing.
    pub fn to_sync<A, F, Fut>(&self, handler: F) -> impl Fn(A) + 'static
    where
        F: Fn(A) -> Fut + 'static,
        Fut: Future<Output = ()> + 'static,
        A: 'static,
    {
        let runner = self.clone();
        move |args| runner.spawn(handler(args))
    }

    /// True when no task is live and no submission is unresolved.
    ///
    /// Cheap; intended for test code that drives the event loop until the runner is quiescent.
    ///
    /// This predicate is only reliable when GUI signals are connected to
    /// [`to_sync`][Self::to_sync] adapters with *direct* (synchronous) connections: a
    /// queued-mode connection can hold a not-yet-dispatched invocation that `is_idle` cannot
    /// see, so the runner may look idle while work is still on its way.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        let core = self.inner.core.borrow();
        core.tasks.is_empty() && core.pending.is_empty()
    }

    /// Shuts the runner down, dropping every suspended task without resuming it.
    ///
    /// Queued submissions are discarded; callables already executing on workers run to completion
    /// in the background, and their outcomes are dropped on arrival. The call never blocks and
    /// the runner reports idle as soon as it returns. Idempotent; also performed when the last
    /// handle is dropped.
    ///
    /// This is deliberately a hard stop: resuming tasks during teardown risks touching widgets
    /// that no longer exist. A `wait`-style shutdown that first drains in-flight work is a
    /// possible future extension and would compose with [`is_idle`][Self::is_idle]; it does not
    /// exist today.
    pub fn close(&self) {
        self.inner.close();
    }

    /// Registers one suspension: allocates the await slot, submits the jobs, and (for the
    /// sequential backend) resolves them on the spot. Called from the awaitables' first poll.
    ///
    /// # Panics
    ///
    /// Panics when no task of this runner is currently being advanced - awaiting offloaded work
    /// anywhere else can never be resumed.
    pub(crate) fn register(&self, jobs: Vec<BlockingJob>) -> Rc<RefCell<AwaitState>> {
        let state = Rc::new(RefCell::new(AwaitState::new(jobs.len())));

        match &self.inner.backend {
            Backend::Pooled { pool, .. } => {
                let submissions = {
                    let mut core = self.inner.core.borrow_mut();

                    let task = core.current.expect(
                        "offloaded work must be awaited from within a task driven by this runner",
                    );

                    jobs.into_iter()
                        .map(|job| {
                            let id = SubmissionId::new(core.next_submission);
                            core.next_submission += 1;
                            core.pending.insert(
                                id,
                                PendingSubmission {
                                    task,
                                    request: Rc::downgrade(&state),
                                },
                            );
                            Submission::new(id, job)
                        })
                        .collect::<Vec<_>>()
                };

                for submission in submissions {
                    pool.submit(submission);
                }
            }
            Backend::Sequential => {
                {
                    let core = self.inner.core.borrow();
                    core.current.expect(
                        "offloaded work must be awaited from within a task driven by this runner",
                    );
                }

                // Submission order is delivery order here - that is the variant's whole point.
                let mut slot = state.borrow_mut();
                for (index, job) in jobs.into_iter().enumerate() {
                    let submission = Submission::new(SubmissionId::new(index as u64), job);
                    slot.deliver(submission.execute());
                }
            }
        }

        state
    }
}

impl Clone for Runner {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl fmt::Debug for Runner {
    #[cfg_attr(test, mutants::skip)] // We have no contract to test here - can return anything.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core = self.inner.core.borrow();
        f.debug_struct("Runner")
            .field("live_tasks", &core.tasks.len())
            .field("pending_submissions", &core.pending.len())
            .field("closed", &core.closed)
            .finish()
    }
}

type ErrorSink = Box<dyn Fn(UnhandledPanic) + 'static>;

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
struct TaskId(u64);

struct Inner {
    core: RefCell<Core>,
    backend: Backend,
    sink: ErrorSink,
}

enum Backend {
    /// The real thing: a worker pool plus the completion channel back to the GUI thread.
    Pooled {
        pool: WorkerPool,
        channel: CompletionChannel,
    },

    /// Everything inline, in the caller's thread, in submission order.
    Sequential,
}

struct Core {
    /// Live root tasks. The driver is taken out of its slot while the task is being advanced, so
    /// the entry itself stays visible to `is_idle` and re-entrant deliveries.
    tasks: HashMap<TaskId, Option<TaskDriver>>,

    /// One entry per submission whose outcome has not arrived yet.
    pending: HashMap<SubmissionId, PendingSubmission>,

    /// The task currently being advanced, if any. Await registration routes through this.
    current: Option<TaskId>,

    next_task: u64,
    next_submission: u64,
    closed: bool,
}

struct PendingSubmission {
    task: TaskId,

    /// Weak so that a dropped awaitable (task failed, stream abandoned) turns late outcomes into
    /// silent drains instead of keeping the slot alive.
    request: Weak<RefCell<AwaitState>>,
}

impl Inner {
    /// The completion channel's handler: runs on the GUI thread, once per delivered outcome.
    fn deliver(inner: &Rc<Self>, id: SubmissionId, outcome: Outcome) {
        let resume = {
            let mut core = inner.core.borrow_mut();

            if core.closed {
                trace!(submission = %id, "dropping completion - runner closed");
                return;
            }

            let Some(pending) = core.pending.remove(&id) else {
                trace!(submission = %id, "dropping completion - submission no longer pending");
                return;
            };

            match pending.request.upgrade() {
                Some(state) => {
                    state.borrow_mut().deliver(outcome);
                    Some(pending.task)
                }
                None => {
                    trace!(submission = %id, "draining completion - awaitable already gone");
                    None
                }
            }
        };

        if let Some(task) = resume {
            Self::advance_task(inner, task);
        }
    }

    /// Advances one task and applies the state machine to the result. The driver is taken out of
    /// the table for the duration of the poll so the core stays borrowable from within the task.
    fn advance_task(inner: &Rc<Self>, id: TaskId) {
        let (mut driver, previous) = {
            let mut core = inner.core.borrow_mut();

            let Some(slot) = core.tasks.get_mut(&id) else {
                // The task was dropped (close, or a stale resume for a finished task).
                return;
            };
            let Some(driver) = slot.take() else {
                // Already being advanced further up the stack.
                return;
            };

            (driver, core.current.replace(id))
        };

        let step = driver.advance();

        let failure = {
            let mut core = inner.core.borrow_mut();
            core.current = previous;

            match step {
                Step::Suspended => {
                    if core.closed {
                        // The task closed the runner from inside its own poll; the driver is
                        // dropped below, outside the borrow.
                        None
                    } else if let Some(slot) = core.tasks.get_mut(&id) {
                        *slot = Some(driver);
                        return;
                    } else {
                        None
                    }
                }
                Step::Finished => {
                    core.tasks.remove(&id);
                    trace!(task = id.0, "root task finished");
                    None
                }
                Step::Failed(payload) => {
                    core.tasks.remove(&id);
                    Some(payload)
                }
            }
        };

        // The driver (and with it the task's captures) is dropped here, with the core
        // unborrowed: user drop code may call back into the runner.
        drop(driver);

        if let Some(payload) = failure {
            debug!(task = id.0, "root task panicked - forwarding to error sink");
            (inner.sink)(UnhandledPanic::new(payload));
        }
    }

    fn close(&self) {
        let (tasks, pending) = {
            let mut core = self.core.borrow_mut();

            if core.closed {
                return;
            }
            core.closed = true;

            (mem::take(&mut core.tasks), mem::take(&mut core.pending))
        };

        if let Backend::Pooled { pool, channel } = &self.backend {
            pool.stop();
            channel.clear_handler();
        }

        debug!(dropped_tasks = tasks.len(), "runner closed");

        // Dropped outside the borrow: the tasks' drop code may call back into the runner, where
        // it finds the shutdown flag set and does nothing.
        drop(tasks);
        drop(pending);
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.close();
    }
}
