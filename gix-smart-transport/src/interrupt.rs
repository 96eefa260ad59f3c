//! Cooperative cancellation for in-flight sessions.

use std::sync::atomic::{AtomicBool, Ordering};

/// A thread-safe cancellation flag shared between the thread driving a
/// session and any thread wishing to abort it.
///
/// Setting the flag never interrupts a blocking read or write; operations
/// observe it at their next poll point and unwind with
/// [`Error::Cancelled`](crate::Error::Cancelled). Once set it stays set
/// until the session is reset by a new connect.
#[derive(Debug, Default)]
pub struct CancellationFlag(AtomicBool);

impl CancellationFlag {
    /// Create a new flag in the non-cancelled state.
    pub fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    /// Request cancellation of the in-flight operation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Check if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Clear the flag; only a session reset does this.
    pub(crate) fn reset(&self) {
        self.0.store(false, Ordering::Relaxed);
    }

    /// Poll point: error out if cancellation was requested.
    pub fn check(&self) -> crate::Result<()> {
        if self.is_cancelled() {
            Err(crate::Error::Cancelled)
        } else {
            Ok(())
        }
    }
}
