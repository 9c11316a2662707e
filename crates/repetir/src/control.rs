//! Cooperative cancellation and pause tokens.
//!
//! Run loops receive explicit tokens instead of sharing mutable flags on the
//! engine instance. Both tokens are advisory: they are observed at step and
//! row boundaries only, so an in-flight find attempt or action dispatch
//! always completes before cancellation takes effect.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative stop signal checked between steps and rows.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create a new, un-cancelled token
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Observed at the next step/row boundary.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Check whether cancellation was requested
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Cooperative pause signal checked between steps (never mid-step).
#[derive(Debug, Clone, Default)]
pub struct PauseToken {
    flag: Arc<AtomicBool>,
}

impl PauseToken {
    /// Create a new, un-paused token
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a pause at the next step boundary
    pub fn pause(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Resume execution
    pub fn resume(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }

    /// Check whether a pause is requested
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Combined control handle for one run.
///
/// Clones share the same underlying flags, so a caller can keep a clone and
/// stop or pause a run that borrowed the original.
#[derive(Debug, Clone, Default)]
pub struct RunControl {
    cancel: CancelToken,
    pause: PauseToken,
}

impl RunControl {
    /// Create a fresh control handle
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a cooperative stop
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Request a cooperative pause
    pub fn pause(&self) {
        self.pause.pause();
    }

    /// Resume from a pause
    pub fn resume(&self) {
        self.pause.resume();
    }

    /// The stop token
    #[must_use]
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// The pause token
    #[must_use]
    pub fn pause_token(&self) -> &PauseToken {
        &self.pause
    }
}
