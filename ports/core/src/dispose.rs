//! Idempotent Disposal
//!
//! Ports, endpoints and connections are torn down from several places at once
//! (explicit dispose, drop, peer EOF, sweep). [`DisposeFlag`] lets exactly one
//! of them run the teardown; the rest are counted and logged at trace level.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// One-way disposed marker
#[derive(Debug, Default)]
pub struct DisposeFlag {
    disposed: AtomicBool,
    attempts: AtomicU32,
}

impl DisposeFlag {
    /// Create a flag in the live state
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the teardown
    ///
    /// Returns `true` for the first caller only.
    pub fn try_begin(&self, owner: &str) -> bool {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        let first = self
            .disposed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if !first {
            tracing::trace!(owner, "Dispose called again, ignoring");
        }
        first
    }

    /// Whether teardown has begun
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Total number of dispose calls, including the first
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::Relaxed)
    }
}
