// Time sources for the scheduler

use chrono::{DateTime, Duration, Utc};
use tokio::time::Instant;

/// Source of "now" for trigger computation
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Wall time anchored at creation and advanced by tokio's monotonic clock.
///
/// Under a paused tokio runtime this clock moves only when tokio time is
/// advanced, which keeps trigger timestamps and timer wakeups in step.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    origin_wall: DateTime<Utc>,
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self::starting_at(Utc::now())
    }

    pub fn starting_at(origin_wall: DateTime<Utc>) -> Self {
        Self {
            origin_wall,
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = Duration::from_std(self.origin.elapsed()).unwrap_or_else(|_| Duration::zero());
        self.origin_wall + elapsed
    }
}
