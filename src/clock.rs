//! Time sources used for frame timing.

use std::cell::Cell;
use std::rc::Rc;

use web_time::{Duration, Instant};

/// A source of session time in seconds.
pub trait Clock {
    /// Seconds since the clock's epoch.
    fn now(&self) -> f64;

    /// Block until `now() >= t`.
    fn sleep_until(&self, t: f64);
}

/// Wall clock backed by a monotonic `Instant`.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    start: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    fn sleep_until(&self, t: f64) {
        let remaining = t - self.now();
        if remaining > 0.0 {
            // spin for the last stretch so vblank simulation stays sub-millisecond
            spin_sleep::sleep(Duration::from_secs_f64(remaining));
        }
    }
}

/// A clock that only moves when told to. Sleeping jumps straight to the target time.
#[derive(Debug, Default)]
pub struct ManualClock {
    t: Cell<f64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at(t: f64) -> Self {
        Self { t: Cell::new(t) }
    }

    pub fn advance(&self, dt: f64) {
        self.t.set(self.t.get() + dt);
    }

    pub fn set(&self, t: f64) {
        self.t.set(t);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        self.t.get()
    }

    fn sleep_until(&self, t: f64) {
        if t > self.t.get() {
            self.t.set(t);
        }
    }
}

/// Elapsed time relative to a resettable start point on a shared clock.
#[derive(Clone)]
pub struct Stopwatch {
    clock: Rc<dyn Clock>,
    start: f64,
}

impl Stopwatch {
    pub fn new(clock: Rc<dyn Clock>) -> Self {
        let start = clock.now();
        Self { clock, start }
    }

    pub fn elapsed(&self) -> f64 {
        self.clock.now() - self.start
    }

    pub fn reset(&mut self) {
        self.start = self.clock.now();
    }
}

impl std::fmt::Debug for Stopwatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stopwatch").field("start", &self.start).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_sleep_only_moves_forward() {
        let clock = ManualClock::starting_at(2.0);
        clock.sleep_until(1.0);
        assert_eq!(clock.now(), 2.0);
        clock.sleep_until(2.5);
        assert_eq!(clock.now(), 2.5);
    }

    #[test]
    fn stopwatch_reset_restarts_elapsed() {
        let clock = Rc::new(ManualClock::new());
        let mut watch = Stopwatch::new(clock.clone());
        clock.advance(0.25);
        assert!((watch.elapsed() - 0.25).abs() < 1e-12);
        watch.reset();
        assert_eq!(watch.elapsed(), 0.0);
    }

    #[test]
    fn monotonic_clock_is_non_decreasing() {
        let clock = MonotonicClock::new();
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }
}
