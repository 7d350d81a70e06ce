//! Independent liveness check over the polling loop.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::time::Duration;
use tracing::{debug, warn};

use crate::engine::scheduler::RestartReason;

/// What the watchdog saw of the poll loop on this tick.
#[derive(Debug, Clone, Copy)]
pub struct WatchdogProbe {
    /// The poll timer exists
    pub poll_timer_armed: bool,
    /// When the poll timer last fired (or was armed)
    pub last_poll_tick_at: Option<DateTime<Utc>>,
    pub poll_interval: Duration,
    /// When data newer than the previous reading last arrived. A fetch that
    /// succeeds with a cached reading does not count.
    pub last_fresh_reading_at: Option<DateTime<Utc>>,
    /// An emergency restart is already counting down
    pub restart_pending: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogVerdict {
    Healthy,
    /// The poll timer is gone or silent; arm a fresh one
    RearmPollTimer,
    EmergencyRestart(RestartReason),
}

/// Supervises the scheduler from its own fixed-interval timer.
#[derive(Debug, Clone)]
pub struct HealthWatchdog {
    interval: Duration,
    stall_after: ChronoDuration,
    armed_at: DateTime<Utc>,
}

impl HealthWatchdog {
    pub fn new(interval: Duration, stall_after_minutes: i64, now: DateTime<Utc>) -> Self {
        Self {
            interval,
            stall_after: ChronoDuration::minutes(stall_after_minutes),
            armed_at: now,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Restart the stall clock. Called at startup and after each emergency
    /// restart so a long outage restarts once per stall window.
    pub fn rearm(&mut self, now: DateTime<Utc>) {
        self.armed_at = now;
    }

    pub fn inspect(&self, probe: &WatchdogProbe, now: DateTime<Utc>) -> WatchdogVerdict {
        if probe.restart_pending {
            return WatchdogVerdict::Healthy;
        }

        let baseline = probe
            .last_fresh_reading_at
            .map_or(self.armed_at, |fresh| fresh.max(self.armed_at));
        let since_fresh = now - baseline;
        if since_fresh > self.stall_after {
            warn!(
                "Watchdog: no fresh reading for {} minutes",
                since_fresh.num_minutes()
            );
            return WatchdogVerdict::EmergencyRestart(RestartReason::WatchdogStall {
                minutes_since_fresh_reading: since_fresh.num_minutes(),
            });
        }

        if !probe.poll_timer_armed {
            warn!("Watchdog: poll timer is not armed");
            return WatchdogVerdict::RearmPollTimer;
        }

        if let Some(last_tick) = probe.last_poll_tick_at {
            let allowance = ChronoDuration::from_std(probe.poll_interval * 2 + self.interval)
                .unwrap_or_else(|_| ChronoDuration::days(365));
            if now - last_tick > allowance {
                warn!(
                    "Watchdog: poll timer silent since {} (interval {:?})",
                    last_tick, probe.poll_interval
                );
                return WatchdogVerdict::RearmPollTimer;
            }
        }

        debug!("Watchdog: healthy");
        WatchdogVerdict::Healthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap()
    }

    fn healthy_probe(now: DateTime<Utc>) -> WatchdogProbe {
        WatchdogProbe {
            poll_timer_armed: true,
            last_poll_tick_at: Some(now),
            poll_interval: Duration::from_secs(300),
            last_fresh_reading_at: Some(now),
            restart_pending: false,
        }
    }

    #[test]
    fn test_healthy_loop() {
        let watchdog = HealthWatchdog::new(Duration::from_secs(120), 10, t0());
        assert_eq!(
            watchdog.inspect(&healthy_probe(t0()), t0() + ChronoDuration::minutes(2)),
            WatchdogVerdict::Healthy
        );
    }

    #[test]
    fn test_stall_triggers_restart_regardless_of_failures() {
        let watchdog = HealthWatchdog::new(Duration::from_secs(120), 10, t0());
        let now = t0() + ChronoDuration::minutes(11);
        let probe = WatchdogProbe {
            last_poll_tick_at: Some(now),
            ..healthy_probe(t0())
        };

        assert_eq!(
            watchdog.inspect(&probe, now),
            WatchdogVerdict::EmergencyRestart(RestartReason::WatchdogStall {
                minutes_since_fresh_reading: 11
            })
        );
    }

    #[test]
    fn test_rearm_moves_stall_baseline() {
        let mut watchdog = HealthWatchdog::new(Duration::from_secs(120), 10, t0());
        let probe = WatchdogProbe {
            last_fresh_reading_at: None,
            last_poll_tick_at: Some(t0() + ChronoDuration::minutes(11)),
            ..healthy_probe(t0())
        };
        watchdog.rearm(t0() + ChronoDuration::minutes(5));
        assert_eq!(
            watchdog.inspect(&probe, t0() + ChronoDuration::minutes(11)),
            WatchdogVerdict::Healthy
        );
    }

    #[test]
    fn test_dead_or_silent_poll_timer() {
        let watchdog = HealthWatchdog::new(Duration::from_secs(120), 10, t0());
        let now = t0() + ChronoDuration::minutes(2);

        let dead = WatchdogProbe {
            poll_timer_armed: false,
            ..healthy_probe(t0())
        };
        assert_eq!(watchdog.inspect(&dead, now), WatchdogVerdict::RearmPollTimer);

        let silent = WatchdogProbe {
            poll_interval: Duration::from_secs(60),
            last_poll_tick_at: Some(t0()),
            last_fresh_reading_at: Some(t0() + ChronoDuration::minutes(4)),
            ..healthy_probe(t0())
        };
        assert_eq!(
            watchdog.inspect(&silent, t0() + ChronoDuration::minutes(5)),
            WatchdogVerdict::RearmPollTimer
        );
    }

    #[test]
    fn test_pending_restart_is_left_alone() {
        let watchdog = HealthWatchdog::new(Duration::from_secs(120), 10, t0());
        let probe = WatchdogProbe {
            poll_timer_armed: false,
            restart_pending: true,
            ..healthy_probe(t0())
        };
        assert_eq!(
            watchdog.inspect(&probe, t0() + ChronoDuration::hours(1)),
            WatchdogVerdict::Healthy
        );
    }
}
