//! Millisecond tick sources.
//!
//! Expiry and fades are wall-clock timers checked once per mixing pass, so the
//! mixer only ever asks "what time is it" and never sleeps.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// A monotonic millisecond counter.
pub trait Clock: Send + Sync {
    /// Milliseconds since some fixed origin. Must never go backwards.
    fn ticks(&self) -> u64;
}

/// Ticks measured from the moment the clock was created.
#[derive(Debug)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    #[inline]
    fn ticks(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

/// A clock that only moves when told to.
///
/// Useful for driving fades and expiry deterministically from tests or from
/// an offline renderer.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start: u64) -> Self {
        Self { now: AtomicU64::new(start) }
    }

    /// Move the clock forward by `ms`.
    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }

    /// Jump to an absolute tick. Earlier values are ignored.
    pub fn set(&self, ms: u64) {
        self.now.fetch_max(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    #[inline]
    fn ticks(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}
