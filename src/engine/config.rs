//! Engine configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::engine::thresholds::ThresholdConfig;
use crate::error::{MonitorError, Result};

pub const DEFAULT_NORMAL_INTERVAL_SECS: u64 = 300;
pub const DEFAULT_CRITICAL_INTERVAL_SECS: u64 = 120;
/// Floor for either polling cadence.
pub const MIN_POLL_INTERVAL_SECS: u64 = 60;
pub const WATCHDOG_INTERVAL_SECS: u64 = 120;

/// Tunables for the scheduler, watchdog and escalation policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub thresholds: ThresholdConfig,
    /// Poll interval while nothing is urgent
    pub normal_interval_secs: u64,
    /// Poll interval while a reading is critical or data is missing
    pub critical_interval_secs: u64,
    pub watchdog_interval_secs: u64,
    /// Display value is flagged stale at this age
    pub stale_after_minutes: i64,
    /// Missing data becomes an urgent condition at this age
    pub missed_readings_minutes: i64,
    /// Loop device counts as unresponsive after this much silence
    pub loop_stale_minutes: i64,
    /// Watchdog restarts the engine after this long without a success
    pub watchdog_restart_minutes: i64,
    pub degraded_after_failures: u32,
    pub restart_after_failures: u32,
    pub restart_delay_secs: u64,
    /// Also fetch device status on every tick
    pub monitor_loop: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            thresholds: ThresholdConfig::default(),
            normal_interval_secs: DEFAULT_NORMAL_INTERVAL_SECS,
            critical_interval_secs: DEFAULT_CRITICAL_INTERVAL_SECS,
            watchdog_interval_secs: WATCHDOG_INTERVAL_SECS,
            stale_after_minutes: 10,
            missed_readings_minutes: 15,
            loop_stale_minutes: 15,
            watchdog_restart_minutes: 10,
            degraded_after_failures: 3,
            restart_after_failures: 5,
            restart_delay_secs: 5,
            monitor_loop: false,
        }
    }
}

impl EngineConfig {
    pub fn new(thresholds: ThresholdConfig) -> Self {
        Self {
            thresholds,
            ..Default::default()
        }
    }

    /// Set the normal and critical poll intervals.
    pub fn with_intervals(mut self, normal_secs: u64, critical_secs: u64) -> Self {
        self.normal_interval_secs = normal_secs;
        self.critical_interval_secs = critical_secs;
        self
    }

    /// Enable or disable device status polling.
    pub fn with_loop_monitoring(mut self, enabled: bool) -> Self {
        self.monitor_loop = enabled;
        self
    }

    pub fn normal_interval(&self) -> Duration {
        Duration::from_secs(self.normal_interval_secs)
    }

    pub fn critical_interval(&self) -> Duration {
        Duration::from_secs(self.critical_interval_secs)
    }

    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_secs(self.watchdog_interval_secs)
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_secs(self.restart_delay_secs)
    }

    /// Validate once at startup; nothing is silently clamped.
    pub fn validate(&self) -> Result<()> {
        if self.critical_interval_secs < MIN_POLL_INTERVAL_SECS
            || self.normal_interval_secs < MIN_POLL_INTERVAL_SECS
        {
            return Err(MonitorError::config_error(format!(
                "poll intervals must be at least {}s (normal {}s, critical {}s)",
                MIN_POLL_INTERVAL_SECS, self.normal_interval_secs, self.critical_interval_secs
            )));
        }
        if self.critical_interval_secs > self.normal_interval_secs {
            return Err(MonitorError::config_error(format!(
                "critical interval ({}s) must not exceed normal interval ({}s)",
                self.critical_interval_secs, self.normal_interval_secs
            )));
        }
        if self.watchdog_interval_secs == 0 {
            return Err(MonitorError::config_error("watchdog interval must be positive"));
        }
        if self.stale_after_minutes <= 0 || self.missed_readings_minutes < self.stale_after_minutes {
            return Err(MonitorError::config_error(
                "missed-readings threshold must be at or above a positive stale threshold",
            ));
        }
        if self.degraded_after_failures == 0
            || self.restart_after_failures <= self.degraded_after_failures
        {
            return Err(MonitorError::config_error(
                "restart threshold must be above the degraded threshold",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.normal_interval(), Duration::from_secs(300));
        assert_eq!(config.critical_interval(), Duration::from_secs(120));
        assert_eq!(config.watchdog_interval(), Duration::from_secs(120));
    }

    #[test]
    fn test_interval_validation() {
        assert!(EngineConfig::default().with_intervals(300, 60).validate().is_ok());
        assert!(EngineConfig::default().with_intervals(300, 30).validate().is_err());
        assert!(EngineConfig::default().with_intervals(120, 300).validate().is_err());
    }

    #[test]
    fn test_escalation_validation() {
        let mut config = EngineConfig::default();
        config.restart_after_failures = 3;
        assert!(config.validate().is_err());
    }
}
