// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt;
use std::rc::Rc;
use std::sync::{Arc, Mutex};

use tracing::trace;

use crate::constants::ERR_POISONED_LOCK;
use crate::gui_thread::GuiThreadCell;
use crate::submission::{Outcome, SubmissionId};

/// The host GUI framework's cross-thread posting primitive.
///
/// This is the single boundary-crossing dependency of the crate: an implementation must schedule
/// the callback to run on the GUI thread at the next event-loop turn, must be callable from any
/// thread, and must not block the caller. Every GUI framework has such a primitive (Qt's queued
/// invocation, GTK's idle sources, winit's event-loop proxy); the host glue wraps it in this
/// trait when constructing a [`Runner`][crate::Runner].
///
/// Callbacks must run on the thread that created the runner. Delivering them anywhere else is
/// detected at runtime and panics rather than letting a task resume off the GUI thread.
///
/// For tests and examples, [`TestLoop`][crate::testing::TestLoop] provides a deterministic
/// in-process implementation.
pub trait EventLoopProxy: Send + Sync + 'static {
    /// Posts `callback` to run on the GUI thread at the next event-loop turn.
    fn post(&self, callback: Box<dyn FnOnce() + Send + 'static>);
}

/// The GUI-side handler invoked with each delivered outcome. Installed once by the runner.
pub(crate) type CompletionHandler = Rc<dyn Fn(SubmissionId, Outcome)>;

/// Delivers outcomes from worker threads to the GUI thread.
///
/// Each `post()` wraps the outcome in a callback and hands it to the host's [`EventLoopProxy`],
/// so delivery order on the GUI side follows post order per worker while posts from different
/// workers interleave arbitrarily. The GUI-side handler slot is cleared during runner shutdown;
/// outcomes that arrive afterwards are dropped without effect.
pub(crate) struct CompletionChannel {
    shared: Arc<ChannelShared>,
}

impl CompletionChannel {
    pub(crate) fn new(proxy: Arc<dyn EventLoopProxy>) -> Self {
        Self {
            shared: Arc::new(ChannelShared {
                proxy,
                handler: Mutex::new(None),
            }),
        }
    }

    /// Installs the single GUI-side handler. Must be called on the GUI thread, before any
    /// submission is in flight.
    pub(crate) fn install_handler(&self, handler: CompletionHandler) {
        let mut slot = self.shared.handler.lock().expect(ERR_POISONED_LOCK);

        assert!(
            slot.is_none(),
            "completion handler installed twice - the runner owns this channel exclusively"
        );

        *slot = Some(GuiThreadCell::new(handler));
    }

    /// Removes the handler so that in-flight completions are dropped on arrival.
    ///
    /// Must be called on the GUI thread: this is where the handler (and the runner state it
    /// captures) is destroyed. Safe to call when no handler is installed.
    pub(crate) fn clear_handler(&self) {
        let handler = self.shared.handler.lock().expect(ERR_POISONED_LOCK).take();

        // The handler is dropped here, outside the lock, on the GUI thread.
        drop(handler);
    }

    /// A thread-safe sender half for worker threads.
    pub(crate) fn sender(&self) -> CompletionSender {
        CompletionSender {
            shared: Arc::clone(&self.shared),
        }
    }

    /// The raw posting primitive, shared with the default error sink.
    pub(crate) fn proxy(&self) -> Arc<dyn EventLoopProxy> {
        Arc::clone(&self.shared.proxy)
    }
}

impl fmt::Debug for CompletionChannel {
    #[cfg_attr(test, mutants::skip)] // We have no contract to test here - can return anything.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionChannel").finish()
    }
}

/// Worker-side handle: posts one outcome to the GUI thread. Cheap to clone.
pub(crate) struct CompletionSender {
    shared: Arc<ChannelShared>,
}

impl CompletionSender {
    /// Posts the outcome of `id` to the GUI thread. Safe from any thread; never blocks.
    pub(crate) fn post(&self, id: SubmissionId, outcome: Outcome) {
        let shared = Arc::clone(&self.shared);

        self.shared
            .proxy
            .post(Box::new(move || shared.deliver(id, outcome)));
    }
}

impl Clone for CompletionSender {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl fmt::Debug for CompletionSender {
    #[cfg_attr(test, mutants::skip)] // We have no contract to test here - can return anything.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionSender").finish()
    }
}

struct ChannelShared {
    proxy: Arc<dyn EventLoopProxy>,

    /// The runner's handler, guarded so it is only touched from the GUI thread. `None` before
    /// installation and again after shutdown.
    handler: Mutex<Option<GuiThreadCell<CompletionHandler>>>,
}

impl ChannelShared {
    /// Runs on the GUI thread, inside the posted callback.
    fn deliver(&self, id: SubmissionId, outcome: Outcome) {
        // We clone the handler out of the slot and release the lock before invoking it: the
        // handler may re-enter the channel (e.g. a resumed task closing the runner clears the
        // slot) and must not find the lock held.
        let handler = {
            let slot = self.handler.lock().expect(ERR_POISONED_LOCK);
            slot.as_ref().map(|cell| cell.with(Rc::clone))
        };

        match handler {
            Some(handler) => handler(id, outcome),
            None => trace!(submission = %id, "dropping completion - runner already shut down"),
        }
    }
}
