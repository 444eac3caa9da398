// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::any::Any;
use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::submission::Payload;

/// A panic that escaped past the top of a root task.
///
/// Instances are handed to the error sink configured on the runner (see
/// [`RunnerBuilder::on_unhandled_error`][crate::RunnerBuilder::on_unhandled_error]). The default
/// sink re-posts the payload to the GUI thread and resumes the unwind there on the next
/// event-loop turn, so the panic surfaces as an ordinary unhandled panic instead of being
/// silently swallowed.
#[derive(Error)]
#[error("root task panicked: {}", panic_message(.payload))]
pub struct UnhandledPanic {
    payload: Payload,
}

impl UnhandledPanic {
    pub(crate) fn new(payload: Payload) -> Self {
        Self { payload }
    }

    /// The panic message, if the payload was a string (the common case for `panic!` with a
    /// message). Returns `None` for non-string payloads.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        string_payload(&self.payload)
    }

    /// Consumes the error, returning the original panic payload.
    ///
    /// This is the exact value `std::panic::catch_unwind` captured on the worker that ran the
    /// root task's last step, suitable for `std::panic::resume_unwind`.
    #[must_use]
    pub fn into_payload(self) -> Box<dyn Any + Send + 'static> {
        self.payload
    }
}

impl fmt::Debug for UnhandledPanic {
    #[cfg_attr(test, mutants::skip)] // We have no contract to test here - can return anything.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnhandledPanic")
            .field("message", &self.message())
            .finish()
    }
}

fn string_payload(payload: &Payload) -> Option<&str> {
    payload
        .downcast_ref::<&'static str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
}

fn panic_message(payload: &Payload) -> &str {
    string_payload(payload).unwrap_or("<non-string panic payload>")
}

/// A task did not finish within the time the test harness allowed for it.
///
/// Produced by [`AsyncTester`][crate::testing::AsyncTester] when driving the event loop past the
/// configured deadline. The event loop may still hold undelivered completions at that point; the
/// tester makes no attempt to drain them.
#[derive(Debug, Error)]
#[error("task did not finish within {timeout:?}")]
pub struct WaitTimeout {
    /// The timeout that elapsed.
    pub timeout: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_from_str_payload() {
        let error = UnhandledPanic::new(Box::new("boom"));
        assert_eq!(error.message(), Some("boom"));
        assert_eq!(error.to_string(), "root task panicked: boom");
    }

    #[test]
    fn message_from_string_payload() {
        let error = UnhandledPanic::new(Box::new(String::from("formatted boom")));
        assert_eq!(error.message(), Some("formatted boom"));
    }

    #[test]
    fn message_from_opaque_payload() {
        let error = UnhandledPanic::new(Box::new(42_i32));
        assert_eq!(error.message(), None);
        assert_eq!(
            error.to_string(),
            "root task panicked: <non-string panic payload>"
        );
    }

    #[test]
    fn payload_round_trips() {
        let error = UnhandledPanic::new(Box::new("boom"));
        let payload = error.into_payload();
        assert_eq!(*payload.downcast::<&str>().unwrap(), "boom");
    }

    #[test]
    fn wait_timeout_displays_duration() {
        let error = WaitTimeout {
            timeout: Duration::from_millis(250),
        };
        assert_eq!(error.to_string(), "task did not finish within 250ms");
    }
}
