//! Time sources
//!
//! Sighting timestamps must survive wall-clock jumps from user time changes,
//! so the production clock reads the wall clock exactly once and advances it
//! with a monotonic delta from then on. Components take the clock as an
//! injected capability so tests can drive time by hand.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Millisecond time source for sighting timestamps and staleness checks.
pub trait Clock: Send + Sync {
    /// Current time in milliseconds since the Unix epoch (one wall-clock
    /// anchor, monotonic thereafter).
    fn now_millis(&self) -> u64;
}

/// Monotonic-anchored system clock.
pub struct SystemClock {
    wall_anchor_millis: u64,
    mono_anchor: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        let wall_anchor_millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self {
            wall_anchor_millis,
            mono_anchor: Instant::now(),
        }
    }

    /// Timestamp for an observation made at `seen`, in the same timebase as
    /// [`Clock::now_millis`]. Equivalent to
    /// `wallNow - monotonicNow + sightingMonotonic`.
    pub fn timestamp_at(&self, seen: Instant) -> u64 {
        self.now_millis()
            .saturating_sub(seen.elapsed().as_millis() as u64)
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        self.wall_anchor_millis + self.mono_anchor.elapsed().as_millis() as u64
    }
}

/// Hand-driven clock for tests.
#[derive(Default)]
pub struct ManualClock {
    millis: AtomicU64,
}

impl ManualClock {
    pub fn new(start_millis: u64) -> Self {
        Self {
            millis: AtomicU64::new(start_millis),
        }
    }

    pub fn advance(&self, delta_millis: u64) {
        self.millis.fetch_add(delta_millis, Ordering::SeqCst);
    }

    pub fn set(&self, millis: u64) {
        self.millis.store(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.millis.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_does_not_go_backwards() {
        let clock = SystemClock::new();
        let a = clock.now_millis();
        let b = clock.now_millis();
        assert!(b >= a);
    }

    #[test]
    fn timestamp_at_is_not_in_the_future() {
        let clock = SystemClock::new();
        let seen = Instant::now();
        assert!(clock.timestamp_at(seen) <= clock.now_millis());
    }

    #[test]
    fn manual_clock_advances_on_demand() {
        let clock = ManualClock::new(1_000);
        assert_eq!(clock.now_millis(), 1_000);
        clock.advance(500);
        assert_eq!(clock.now_millis(), 1_500);
        clock.set(10);
        assert_eq!(clock.now_millis(), 10);
    }
}
