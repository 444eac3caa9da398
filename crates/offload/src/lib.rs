// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![warn(missing_docs)]

//! Awaitable offloading of blocking work from single-threaded GUI event loops to a worker
//! thread pool.
//!
//! GUI frameworks dispatch events on one thread, and that thread must never block - yet event
//! handlers constantly want to do blocking things: read files, talk to databases, crunch data.
//! This crate lets such handlers be written as plain, linear `async` functions that stay on the
//! GUI thread: blocking calls are shipped to a worker pool with [`Runner::run`], the handler
//! suspends, and it resumes on the GUI thread once the result is back. Widget access therefore
//! remains single-threaded throughout.
//!
//! # Design Philosophy
//!
//! - **Single-threaded by construction**: handlers and all runner bookkeeping live on the GUI
//!   thread; only the submitted callables run elsewhere. The [`Runner`] is not `Send`.
//! - **One narrow host dependency**: the crate knows nothing about any particular GUI framework.
//!   It needs exactly one primitive - [`EventLoopProxy`], "run this callback on the GUI thread
//!   soon" - which every framework provides in some form.
//! - **Hard shutdown**: [`Runner::close`] drops suspended handlers instead of resuming them, so
//!   teardown can never touch dead widgets.
//!
//! # Quick Start
//!
//! ```
//! use offload::{Runner, testing::TestLoop};
//!
//! // The TestLoop stands in for the host GUI event loop.
//! let event_loop = TestLoop::new();
//! let runner = Runner::new(event_loop.proxy());
//!
//! // An async event handler, connected as a plain callable.
//! let on_clicked = runner.to_sync({
//!     let runner = runner.clone();
//!     move |()| {
//!         let runner = runner.clone();
//!         async move {
//!             let total = runner.run(|| (1..=100).sum::<i32>()).await;
//!             assert_eq!(total, 5050);
//!         }
//!     }
//! });
//!
//! on_clicked(());
//! assert!(event_loop.run_until(offload::testing::TEST_TIMEOUT, || runner.is_idle()));
//! runner.close();
//! ```
//!
//! # Parallel fan-out
//!
//! [`Runner::run_parallel`] submits a batch of callables at once and yields their results *in
//! completion order*, so a handler can process whichever download (or query, or computation)
//! finishes first.
//!
//! # Limitations
//!
//! - The only supported suspension points inside a handler are awaits of [`Runner::run`] and
//!   [`Runner::run_parallel`] values. Futures from other async ecosystems will suspend the
//!   handler forever: tasks are resumed by outcome delivery, not by wakers.
//! - [`Runner::is_idle`] is only reliable when signals are connected to
//!   [`to_sync`][Runner::to_sync] adapters in direct (synchronous) mode; queued connections can
//!   hide in-flight invocations from the predicate.
//! - Submissions cannot be cancelled individually; the only cancellation is the runner-wide
//!   [`close`][Runner::close].

mod builder;
mod channel;
mod constants;
mod driver;
mod error;
mod gui_thread;
mod join;
mod pool;
mod runner;
mod submission;

pub mod testing;

pub use builder::RunnerBuilder;
pub use channel::EventLoopProxy;
pub use error::{UnhandledPanic, WaitTimeout};
pub use join::{Completions, Offloaded};
pub use runner::Runner;
