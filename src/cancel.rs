//! Cooperative cancellation.
//!
//! Long-running stages (correction, distribution) poll a [`CancelCheck`]
//! between batches. Nothing is ever interrupted mid-call; a positive check
//! makes the stage return [`Outcome::Cancelled`] with whatever partial result
//! it has, and the caller decides what to keep.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Polled between batches by long-running stages.
pub trait CancelCheck: Send + Sync {
    fn is_cancelled(&self) -> bool;
}

/// A shared, externally-settable cancellation flag.
///
/// Clones share the same flag, so the job dispatcher can keep one handle and
/// give another to the running job.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

impl CancelCheck for CancelFlag {
    fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A check that never fires, for callers without a dispatcher.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverCancel;

impl CancelCheck for NeverCancel {
    fn is_cancelled(&self) -> bool {
        false
    }
}

/// Result of a cancellable stage.
///
/// `Cancelled` carries the partial result accumulated before the check fired.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Completed(T),
    Cancelled(T),
}

impl<T> Outcome<T> {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Outcome::Cancelled(_))
    }

    /// The completed value, or `None` when cancelled.
    pub fn completed(self) -> Option<T> {
        match self {
            Outcome::Completed(v) => Some(v),
            Outcome::Cancelled(_) => None,
        }
    }

    /// The value regardless of how the stage ended.
    pub fn into_inner(self) -> T {
        match self {
            Outcome::Completed(v) | Outcome::Cancelled(v) => v,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Outcome::Completed(v) => Outcome::Completed(f(v)),
            Outcome::Cancelled(v) => Outcome::Cancelled(f(v)),
        }
    }
}
