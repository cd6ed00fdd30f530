/*

THIS SOFTWARE IS OPEN SOURCE UNDER THE MIT LICENSE

Copyright 2025 Vincent Maciejewski, & M2 Tech
Contact:
v@m2te.ch
mayeski@gmail.com
https://www.linkedin.com/in/vmayeski/
http://m2te.ch/

*/

//! Request timing.
//!
//! Every reactor owns a `Timer` that accumulates how long its requests spent
//! in `eval()`, split by success and failure. Time comes from a `TimeSource`
//! so tests can drive the clock by hand.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Monotonic nanosecond clock.
pub trait TimeSource: Send + Sync {
    fn nano_time(&self) -> u64;
}

/// `TimeSource` backed by `Instant`, counting from its creation.
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        MonotonicClock {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for MonotonicClock {
    fn nano_time(&self) -> u64 {
        self.origin.elapsed().as_nanos() as u64
    }
}

/// Hand-driven clock.
///
/// # Example
/// ```
/// use reactors::{ManualClock, TimeSource};
/// use std::time::Duration;
///
/// let clock = ManualClock::new();
/// clock.advance(Duration::from_micros(3));
/// assert_eq!(clock.nano_time(), 3_000);
/// ```
#[derive(Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        ManualClock {
            now: AtomicU64::new(0),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(by.as_nanos() as u64, Ordering::SeqCst);
    }
}

impl TimeSource for ManualClock {
    fn nano_time(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Success/failure counters for one reactor.
#[derive(Default)]
pub struct Timer {
    success_count: AtomicU64,
    success_nanos: AtomicU64,
    failure_count: AtomicU64,
    failure_nanos: AtomicU64,
}

/// Point-in-time copy of a `Timer`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerStats {
    pub success_count: u64,
    pub success_nanos: u64,
    pub failure_count: u64,
    pub failure_nanos: u64,
}

impl Timer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a request that finished normally.
    pub fn success(&self, elapsed_nanos: u64) {
        self.success_count.fetch_add(1, Ordering::Relaxed);
        self.success_nanos.fetch_add(elapsed_nanos, Ordering::Relaxed);
    }

    /// Record a request whose body panicked.
    pub fn failure(&self, elapsed_nanos: u64) {
        self.failure_count.fetch_add(1, Ordering::Relaxed);
        self.failure_nanos.fetch_add(elapsed_nanos, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TimerStats {
        TimerStats {
            success_count: self.success_count.load(Ordering::Relaxed),
            success_nanos: self.success_nanos.load(Ordering::Relaxed),
            failure_count: self.failure_count.load(Ordering::Relaxed),
            failure_nanos: self.failure_nanos.load(Ordering::Relaxed),
        }
    }
}
