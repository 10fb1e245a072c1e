//! Shared progress counters.
//!
//! A `(current, max)` pair updated with atomics so workers can advance it
//! without taking a lock. `max == 0` means the amount of work is not known.

use std::sync::atomic::{AtomicU32, Ordering};

/// Progress counter for one stage of work.
#[derive(Debug, Default)]
pub struct Progress {
    current: AtomicU32,
    max: AtomicU32,
}

impl Progress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new stage with `max` units of work.
    pub fn reset(&self, max: u32) {
        self.current.store(0, Ordering::SeqCst);
        self.max.store(max, Ordering::SeqCst);
    }

    /// Change the total without touching the current count.
    pub fn set_max(&self, max: u32) {
        self.max.store(max, Ordering::SeqCst);
    }

    /// Record one finished unit of work.
    pub fn advance(&self) -> u32 {
        self.advance_by(1)
    }

    /// Record `n` finished units of work.
    pub fn advance_by(&self, n: u32) -> u32 {
        self.current.fetch_add(n, Ordering::SeqCst) + n
    }

    pub fn current(&self) -> u32 {
        self.current.load(Ordering::SeqCst)
    }

    pub fn max(&self) -> u32 {
        self.max.load(Ordering::SeqCst)
    }

    /// `(current, max)` snapshot.
    pub fn snapshot(&self) -> (u32, u32) {
        (self.current(), self.max())
    }

    /// Whether the total is unknown.
    pub fn is_indeterminate(&self) -> bool {
        self.max() == 0
    }
}
