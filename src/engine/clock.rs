//! Wall-clock sources for the engine.

use chrono::{DateTime, Utc};

/// Source of "now" for staleness and snooze arithmetic.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Wall clock derived from tokio's monotonic clock, anchored at creation.
///
/// Under a paused test runtime it advances together with tokio timers.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeClock {
    anchor: DateTime<Utc>,
    origin: tokio::time::Instant,
}

impl RuntimeClock {
    pub fn starting_at(anchor: DateTime<Utc>) -> Self {
        Self {
            anchor,
            origin: tokio::time::Instant::now(),
        }
    }
}

impl Clock for RuntimeClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = tokio::time::Instant::now().duration_since(self.origin);
        self.anchor + chrono::Duration::from_std(elapsed).unwrap_or_else(|_| chrono::Duration::zero())
    }
}
