//! Capability context (`Cx`) threaded through blocking object-layer calls.
//!
//! A `Cx` carries:
//! - a cancellation flag that blocked waits and copy loops observe at each
//!   [`Cx::checkpoint`]
//! - a [`Budget`] whose `deadline` bounds how long a single wait may block
//!
//! Cancellation is sticky: observing it never clears the flag, so a caller
//! that gets [`OdbError::Interrupted`] still sees `is_cancel_requested()`.
//! Clones share the flag.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use odb_error::OdbError;

/// Limits on how long an operation may block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Budget {
    pub deadline: Option<Duration>,
}

impl Budget {
    /// No constraints.
    pub const INFINITE: Self = Self { deadline: None };

    #[must_use]
    pub const fn with_deadline(self, deadline: Duration) -> Self {
        Self {
            deadline: Some(deadline),
        }
    }
}

impl Default for Budget {
    fn default() -> Self {
        Self::INFINITE
    }
}

/// Capability context passed through all potentially blocking operations.
#[derive(Debug, Clone)]
pub struct Cx {
    cancel_requested: Arc<AtomicBool>,
    budget: Budget,
}

impl Default for Cx {
    fn default() -> Self {
        Self::new()
    }
}

impl Cx {
    #[must_use]
    pub fn new() -> Self {
        Self::with_budget(Budget::INFINITE)
    }

    #[must_use]
    pub fn with_budget(budget: Budget) -> Self {
        Self {
            cancel_requested: Arc::new(AtomicBool::new(false)),
            budget,
        }
    }

    #[must_use]
    pub fn budget(&self) -> Budget {
        self.budget
    }

    #[must_use]
    pub fn is_cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::Acquire)
    }

    /// Request cancellation. Every clone observes it.
    pub fn cancel(&self) {
        self.cancel_requested.store(true, Ordering::Release);
    }

    /// Check for cancellation at a yield point.
    ///
    /// Returns [`OdbError::Interrupted`] once cancellation has been requested.
    /// The request stays set.
    pub fn checkpoint(&self) -> Result<(), OdbError> {
        if self.is_cancel_requested() {
            Err(OdbError::Interrupted)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    #[test]
    fn test_cx_checkpoint_observes_cancellation() {
        let cx = Cx::new();
        assert!(cx.checkpoint().is_ok());
        cx.cancel();
        assert_eq!(cx.checkpoint(), Err(OdbError::Interrupted));
        // Sticky: observing does not clear the request.
        assert!(cx.is_cancel_requested());
        assert_eq!(cx.checkpoint(), Err(OdbError::Interrupted));
    }

    #[test]
    fn test_cx_clones_share_cancellation() {
        let cx = Cx::new();
        let remote = cx.clone();
        thread::spawn(move || remote.cancel()).join().unwrap();
        assert_eq!(cx.checkpoint(), Err(OdbError::Interrupted));
        assert!(Cx::new().checkpoint().is_ok());
    }

    #[test]
    fn test_budget_deadline() {
        let cx = Cx::with_budget(Budget::INFINITE.with_deadline(Duration::from_millis(50)));
        assert_eq!(cx.budget().deadline, Some(Duration::from_millis(50)));
        assert_eq!(Cx::new().budget(), Budget::default());
        assert_eq!(Budget::default().deadline, None);
    }
}
