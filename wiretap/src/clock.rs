//! Wall-clock and monotonic time behind one injectable trait.
//!
//! The engine needs both kinds of time: wall-clock for the ingest config TTL
//! and delivery timestamps, monotonic time for session idle detection, which
//! must not be fooled by wall-clock changes. The monotonic value is relative
//! to an arbitrary boot origin, so a persisted activity time larger than the
//! current reading means the clock restarted.

use std::fmt;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

/// A source of wall-clock and monotonic time.
pub trait Clock: fmt::Debug + Send + Sync {
    /// The current wall-clock time.
    fn wall(&self) -> DateTime<Utc>;

    /// Monotonic time elapsed since the clock's boot origin.
    fn boot_elapsed(&self) -> Duration;

    /// The current wall-clock time in milliseconds since the Unix epoch.
    fn wall_millis(&self) -> i64 {
        self.wall().timestamp_millis()
    }

    /// Monotonic time in milliseconds since the boot origin.
    fn boot_elapsed_millis(&self) -> i64 {
        i64::try_from(self.boot_elapsed().as_millis()).unwrap_or(i64::MAX)
    }
}

/// The production clock.
///
/// The monotonic origin is anchored when the clock is created, which on a
/// fresh process makes all activity times persisted by earlier process runs
/// read as restarted. Hosts with access to a true boot-relative clock can
/// provide their own [`Clock`] instead.
#[derive(Debug)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    /// Creates a clock anchored at the current instant.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn wall(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn boot_elapsed(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// A deterministic clock for tests.
#[derive(Debug)]
pub struct ManualClock {
    state: Mutex<(DateTime<Utc>, Duration)>,
}

impl ManualClock {
    /// Creates a clock at the given wall time with a fresh boot origin.
    pub fn new(wall: DateTime<Utc>) -> Self {
        Self {
            state: Mutex::new((wall, Duration::ZERO)),
        }
    }

    /// Advances both the wall clock and the monotonic clock.
    pub fn advance(&self, duration: Duration) {
        let mut state = self.state.lock().unwrap_or_else(|poison| poison.into_inner());
        state.0 += duration;
        state.1 += duration;
    }

    /// Moves the wall clock without touching the monotonic clock.
    pub fn set_wall(&self, wall: DateTime<Utc>) {
        let mut state = self.state.lock().unwrap_or_else(|poison| poison.into_inner());
        state.0 = wall;
    }

    /// Resets the monotonic clock to zero, as a device reboot would.
    pub fn simulate_reboot(&self) {
        let mut state = self.state.lock().unwrap_or_else(|poison| poison.into_inner());
        state.1 = Duration::ZERO;
    }
}

impl Clock for ManualClock {
    fn wall(&self) -> DateTime<Utc> {
        self.state.lock().unwrap_or_else(|poison| poison.into_inner()).0
    }

    fn boot_elapsed(&self) -> Duration {
        self.state.lock().unwrap_or_else(|poison| poison.into_inner()).1
    }
}
