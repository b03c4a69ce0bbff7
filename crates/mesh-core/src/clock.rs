//! Millisecond time source
//!
//! Timestamps are `u32` milliseconds that wrap roughly every 49 days.
//! Elapsed time is always computed with [`elapsed_ms`].

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Instant;

/// Monotonic millisecond clock
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u32;
}

/// Wrap-safe elapsed time between two timestamps
pub fn elapsed_ms(now: u32, then: u32) -> u32 {
    now.wrapping_sub(then)
}

/// Clock backed by [`Instant`], counting from construction
#[derive(Debug)]
pub struct SystemClock {
    start: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u32 {
        // truncation is the wrap-around
        self.start.elapsed().as_millis() as u32
    }
}

/// Manually advanced clock for tests and simulation
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU32,
}

impl ManualClock {
    pub fn new(start_ms: u32) -> Self {
        Self {
            now: AtomicU32::new(start_ms),
        }
    }

    pub fn set(&self, ms: u32) {
        self.now.store(ms, Ordering::SeqCst);
    }

    pub fn advance(&self, ms: u32) {
        // fetch_add wraps on overflow
        self.now.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u32 {
        self.now.load(Ordering::SeqCst)
    }
}
