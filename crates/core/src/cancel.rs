//! Cancellation scopes for in-flight dispatches.
//!
//! A `CancelScope` is a resettable cancellation domain: every dispatch
//! started while a generation of the scope is current observes that
//! generation's token, and `cancel()` trips all of them at once while
//! installing a fresh token so later dispatches start clean.
//!
//! The dispatcher holds one process-wide scope for the coarse-grained
//! "stop everything" contract; callers needing isolation can create their
//! own scope per logical task group.

use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// A resettable cancellation domain.
#[derive(Debug, Default)]
pub struct CancelScope {
    current: Mutex<CancellationToken>,
}

impl CancelScope {
    /// Create a new scope with a fresh token.
    pub fn new() -> Self {
        Self {
            current: Mutex::new(CancellationToken::new()),
        }
    }

    /// Get the current generation's token.
    ///
    /// Calls in flight keep the token they grabbed even after a
    /// `cancel()`, which is what makes the cut immediate for them and
    /// invisible to calls started afterwards.
    pub fn token(&self) -> CancellationToken {
        self.current
            .lock()
            .expect("cancel scope lock poisoned")
            .clone()
    }

    /// Cancel everything observing the current token and start a fresh
    /// generation.
    pub fn cancel(&self) {
        let mut guard = self.current.lock().expect("cancel scope lock poisoned");
        guard.cancel();
        *guard = CancellationToken::new();
    }
}
