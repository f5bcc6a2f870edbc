//! Time source abstraction for supporting both real-time and simulated time.
//!
//! Relays never call `Utc::now()` or `thread::sleep` directly; they go through
//! the [`TimeSource`] held in their [`RelayContext`](crate::relay::RelayContext).
//! Production code uses [`RealTimeSource`]. Tests drive a
//! [`ManualTimeSource`], advancing the clock explicitly so that schedule
//! firings, day boundaries and hold-duration reversions can be exercised
//! without waiting for wall-clock time to pass.

use chrono::{DateTime, Utc};
use std::time::Duration as StdDuration;

/// Trait for abstracting time operations
pub trait TimeSource: Send + Sync {
    /// Get the current instant
    fn now(&self) -> DateTime<Utc>;

    /// Sleep for the specified duration (or until simulated time has advanced by it)
    fn sleep(&self, duration: StdDuration);

    /// Check if this is a simulated time source
    fn is_simulated(&self) -> bool;
}

/// Real-time implementation that uses actual system time
pub struct RealTimeSource;

impl TimeSource for RealTimeSource {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: StdDuration) {
        std::thread::sleep(duration);
    }

    fn is_simulated(&self) -> bool {
        false
    }
}

#[cfg(any(test, feature = "testing-support"))]
pub use manual::ManualTimeSource;

#[cfg(any(test, feature = "testing-support"))]
mod manual {
    use super::TimeSource;
    use chrono::{DateTime, TimeDelta, Utc};
    use std::sync::{Condvar, Mutex};
    use std::time::Duration as StdDuration;

    /// Clock that only moves when told to.
    ///
    /// `sleep` blocks the calling thread until [`advance`](Self::advance) or
    /// [`set`](Self::set) has moved the clock past the sleeper's deadline.
    pub struct ManualTimeSource {
        state: Mutex<ClockState>,
        moved: Condvar,
    }

    struct ClockState {
        now: DateTime<Utc>,
        sleepers: usize,
    }

    impl ManualTimeSource {
        pub fn new(start: DateTime<Utc>) -> Self {
            Self {
                state: Mutex::new(ClockState {
                    now: start,
                    sleepers: 0,
                }),
                moved: Condvar::new(),
            }
        }

        /// Move the clock forward and wake every sleeper.
        pub fn advance(&self, delta: TimeDelta) {
            let mut state = self.state.lock().unwrap();
            state.now += delta;
            self.moved.notify_all();
        }

        /// Jump the clock to an absolute instant and wake every sleeper.
        pub fn set(&self, instant: DateTime<Utc>) {
            let mut state = self.state.lock().unwrap();
            state.now = instant;
            self.moved.notify_all();
        }

        /// Block until at least `count` threads are parked in `sleep`.
        pub fn wait_for_sleepers(&self, count: usize) {
            let mut state = self.state.lock().unwrap();
            while state.sleepers < count {
                state = self.moved.wait(state).unwrap();
            }
        }

        /// Number of threads currently parked in `sleep`.
        pub fn sleepers(&self) -> usize {
            self.state.lock().unwrap().sleepers
        }
    }

    impl TimeSource for ManualTimeSource {
        fn now(&self) -> DateTime<Utc> {
            self.state.lock().unwrap().now
        }

        fn sleep(&self, duration: StdDuration) {
            let delta = TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX);
            let mut state = self.state.lock().unwrap();
            let deadline = state
                .now
                .checked_add_signed(delta)
                .unwrap_or(DateTime::<Utc>::MAX_UTC);
            state.sleepers += 1;
            self.moved.notify_all();
            while state.now < deadline {
                state = self.moved.wait(state).unwrap();
            }
            state.sleepers -= 1;
        }

        fn is_simulated(&self) -> bool {
            true
        }
    }
}
