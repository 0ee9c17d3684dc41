//! Tick sources used to stamp buffer recency

use crate::types::Tick;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// A monotonically non-decreasing counter read when a buffer is released
pub trait TickSource: Send + Sync {
    /// Returns the current tick value
    fn now(&self) -> Tick;
}

/// Manually advanced tick counter.
///
/// Plays the role of a timer interrupt incrementing a global `ticks`
/// variable; deterministic, which makes eviction order testable.
#[derive(Debug, Default)]
pub struct TickCounter {
    ticks: AtomicU64,
}

impl TickCounter {
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    pub fn starting_at(tick: Tick) -> Self {
        TickCounter {
            ticks: AtomicU64::new(tick),
        }
    }

    /// Advances the counter by one and returns the new value
    pub fn tick(&self) -> Tick {
        self.ticks.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Advances the counter by `n`
    pub fn advance(&self, n: Tick) -> Tick {
        self.ticks.fetch_add(n, Ordering::AcqRel) + n
    }
}

impl TickSource for TickCounter {
    fn now(&self) -> Tick {
        self.ticks.load(Ordering::Acquire)
    }
}

/// Milliseconds elapsed since construction
#[derive(Debug)]
pub struct MonotonicTicks {
    origin: Instant,
}

impl MonotonicTicks {
    pub fn new() -> Self {
        MonotonicTicks {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicTicks {
    fn default() -> Self {
        Self::new()
    }
}

impl TickSource for MonotonicTicks {
    fn now(&self) -> Tick {
        self.origin.elapsed().as_millis() as Tick
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_tick_counter_advances() {
        let ticks = TickCounter::new();
        assert_eq!(ticks.now(), 0);
        assert_eq!(ticks.tick(), 1);
        assert_eq!(ticks.advance(9), 10);
        assert_eq!(ticks.now(), 10);
    }

    #[test]
    fn test_tick_counter_starting_at() {
        let ticks = TickCounter::starting_at(41);
        assert_eq!(ticks.tick(), 42);
    }

    #[test]
    fn test_monotonic_ticks_never_decrease() {
        let ticks = MonotonicTicks::new();
        let first = ticks.now();
        std::thread::sleep(Duration::from_millis(5));
        let second = ticks.now();
        assert!(second >= first + 1);
    }
}
