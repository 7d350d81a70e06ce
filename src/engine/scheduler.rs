//! Polling state machine: cadence, condition checks and failure escalation.
//!
//! The scheduler never touches timers or the network itself. The engine
//! driver feeds it fetch completions and clock ticks, and reads back what
//! to do next through [`TickOutcome`]. Raised alarms queue up until the
//! driver drains them with [`PollingScheduler::take_alarms`].

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::{info, warn};

use crate::engine::alarm::{AlarmEvent, AlarmKind};
use crate::engine::config::EngineConfig;
use crate::engine::history::{
    HistoryPoint, ReadingHistory, FROZEN_MIN_SAMPLES, FROZEN_WINDOW_MINUTES,
};
use crate::engine::snooze::{AlarmSnoozeRegistry, SnoozeEntry, AUTO_SNOOZE_MINUTES};
use crate::engine::state::{MonitoringState, PersistedReading};
use crate::engine::thresholds::{classify, Severity};
use crate::error::{FetchError, Result};
use crate::source::{DeviceStatus, Reading};

/// Polling cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PollMode {
    Normal,
    Critical,
}

/// Why the engine is restarting itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RestartReason {
    ConsecutiveFailures(u32),
    WatchdogStall { minutes_since_fresh_reading: i64 },
}

impl fmt::Display for RestartReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConsecutiveFailures(count) => write!(f, "{} consecutive fetch failures", count),
            Self::WatchdogStall {
                minutes_since_fresh_reading,
            } => write!(f, "no fresh reading for {} minutes", minutes_since_fresh_reading),
        }
    }
}

/// Result of one poll tick.
#[derive(Debug, Clone)]
pub struct TickPayload {
    pub reading: Reading,
    pub device_status: Option<DeviceStatus>,
}

impl TickPayload {
    pub fn reading(reading: Reading) -> Self {
        Self {
            reading,
            device_status: None,
        }
    }
}

/// What the driver must do after a scheduler step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickOutcome {
    /// Cadence changed; re-arm the poll timer at the new interval
    pub transition: Option<PollMode>,
    /// Perform an emergency restart
    pub restart: Option<RestartReason>,
    /// Write the last reading to durable storage
    pub persist: bool,
}

/// Observable engine state, republished after every step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub state: MonitoringState,
    pub mode: PollMode,
    pub severity: Option<Severity>,
    pub is_stale: bool,
    pub minutes_since_last_reading: Option<i64>,
    pub loop_unresponsive: bool,
    pub snoozes: Vec<SnoozeEntry>,
    pub recent: Vec<HistoryPoint>,
    pub restarts: u32,
    pub taken_at: DateTime<Utc>,
}

pub struct PollingScheduler {
    config: EngineConfig,
    state: MonitoringState,
    history: ReadingHistory,
    snoozes: AlarmSnoozeRegistry,
    mode: PollMode,
    loop_unresponsive: bool,
    /// When a reading newer than the previous one last arrived
    last_fresh_reading_at: Option<DateTime<Utc>>,
    restarts: u32,
    outbox: Vec<AlarmEvent>,
}

impl PollingScheduler {
    pub fn new(config: EngineConfig, seed: Option<PersistedReading>) -> Self {
        let state = MonitoringState::seeded(seed, config.normal_interval_secs);
        Self {
            config,
            state,
            history: ReadingHistory::new(),
            snoozes: AlarmSnoozeRegistry::new(),
            mode: PollMode::Normal,
            loop_unresponsive: false,
            last_fresh_reading_at: None,
            restarts: 0,
            outbox: Vec::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn state(&self) -> &MonitoringState {
        &self.state
    }

    pub fn history(&self) -> &ReadingHistory {
        &self.history
    }

    pub fn mode(&self) -> PollMode {
        self.mode
    }

    pub fn restarts(&self) -> u32 {
        self.restarts
    }

    /// Successful fetches that keep returning the same cached reading do not
    /// move this forward.
    pub fn last_fresh_reading_at(&self) -> Option<DateTime<Utc>> {
        self.last_fresh_reading_at
    }

    pub fn poll_interval(&self) -> Duration {
        match self.mode {
            PollMode::Normal => self.config.normal_interval(),
            PollMode::Critical => self.config.critical_interval(),
        }
    }

    /// Classification of the last known reading.
    pub fn severity(&self) -> Option<Severity> {
        self.state
            .last_reading
            .as_ref()
            .map(|reading| classify(reading.value, &self.config.thresholds))
    }

    fn elapsed_since_reading(&self, now: DateTime<Utc>) -> Option<ChronoDuration> {
        self.state
            .last_reading
            .as_ref()
            .map(|reading| now - reading.timestamp)
    }

    pub fn minutes_since_last_reading(&self, now: DateTime<Utc>) -> Option<i64> {
        self.elapsed_since_reading(now)
            .map(|elapsed| elapsed.num_minutes().max(0))
    }

    /// The displayed value is stale once it is `stale_after_minutes` old
    /// (inclusive).
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        self.elapsed_since_reading(now)
            .is_some_and(|elapsed| elapsed >= ChronoDuration::minutes(self.config.stale_after_minutes))
    }

    fn readings_missing(&self, now: DateTime<Utc>) -> bool {
        self.elapsed_since_reading(now).is_some_and(|elapsed| {
            elapsed >= ChronoDuration::minutes(self.config.missed_readings_minutes)
        })
    }

    /// Any condition that calls for the critical cadence.
    pub fn is_urgent(&self, now: DateTime<Utc>) -> bool {
        self.severity().is_some_and(|severity| severity.is_urgent())
            || self.readings_missing(now)
            || self.loop_unresponsive
    }

    pub fn on_fetch_success(&mut self, payload: TickPayload, now: DateTime<Utc>) -> TickOutcome {
        let TickPayload {
            reading,
            device_status,
        } = payload;

        self.state.consecutive_failure_count = 0;
        self.state.last_successful_fetch_at = Some(now);

        // Older or repeated readings leave the display and the history alone.
        let is_newer = self
            .state
            .last_reading
            .as_ref()
            .map_or(true, |last| reading.timestamp > last.timestamp);
        if is_newer {
            self.history.record(&reading);
            self.last_fresh_reading_at = Some(now);
            self.state.last_reading = Some(reading);
        }

        if let Some(status) = device_status {
            self.loop_unresponsive = status.is_loop_stale(now, self.config.loop_stale_minutes);
        }

        self.evaluate_glucose(now);
        self.evaluate_missed_readings(now);
        self.evaluate_frozen(now);
        self.evaluate_loop(now);

        TickOutcome {
            transition: self.update_mode(now),
            restart: None,
            persist: self.state.last_reading.is_some(),
        }
    }

    /// Count a failed fetch. The last known reading stays in place.
    pub fn on_fetch_failure(&mut self, error: &FetchError, now: DateTime<Utc>) -> TickOutcome {
        self.state.consecutive_failure_count += 1;
        let failures = self.state.consecutive_failure_count;
        warn!("Fetch failed ({} in a row): {}", failures, error);

        if failures == self.config.degraded_after_failures {
            let message = format!(
                "Connection to the data source is degraded: {} failed fetches in a row ({})",
                failures, error
            );
            self.raise(AlarmKind::ConnectivityDegraded, message, now);
        }

        self.evaluate_missed_readings(now);

        let restart = (failures >= self.config.restart_after_failures)
            .then_some(RestartReason::ConsecutiveFailures(failures));

        TickOutcome {
            transition: self.update_mode(now),
            restart,
            persist: false,
        }
    }

    /// Re-evaluate time-driven conditions without new data.
    pub fn check_staleness(&mut self, now: DateTime<Utc>) -> TickOutcome {
        self.evaluate_missed_readings(now);

        TickOutcome {
            transition: self.update_mode(now),
            ..Default::default()
        }
    }

    /// Re-check only the conditions whose snooze has lifted by `now`, against
    /// the last known data. Kinds that are not snoozed already fired on the
    /// data they were evaluated against.
    pub fn reevaluate_lifted(&mut self, now: DateTime<Utc>) -> TickOutcome {
        for kind in self.snoozes.take_expired(now) {
            match kind {
                AlarmKind::CriticalLow
                | AlarmKind::Low
                | AlarmKind::High
                | AlarmKind::CriticalHigh => {
                    if self.severity().and_then(AlarmKind::for_severity) == Some(kind) {
                        self.evaluate_glucose(now);
                    }
                }
                AlarmKind::MissedReadings => self.evaluate_missed_readings(now),
                AlarmKind::ReadingFrozen => self.evaluate_frozen(now),
                AlarmKind::LoopNotResponding => self.evaluate_loop(now),
                AlarmKind::ConnectivityDegraded | AlarmKind::AutomaticRecovery => {}
            }
        }

        TickOutcome {
            transition: self.update_mode(now),
            ..Default::default()
        }
    }

    /// Reset escalation state and announce the recovery.
    pub fn emergency_restart(&mut self, reason: RestartReason, now: DateTime<Utc>) {
        warn!("Emergency restart: {}", reason);
        self.state.consecutive_failure_count = 0;
        self.restarts += 1;

        let message = format!("Monitoring restarted automatically after {}", reason);
        self.raise(AlarmKind::AutomaticRecovery, message, now);
    }

    pub fn snooze(
        &mut self,
        kind: AlarmKind,
        minutes: i64,
        now: DateTime<Utc>,
    ) -> Result<SnoozeEntry> {
        let entry = self.snoozes.snooze(kind, minutes, now)?.clone();
        info!(
            "Snoozed {} until {} ({} times)",
            kind, entry.muted_until, entry.times_snoozed
        );
        Ok(entry)
    }

    pub fn clear_snooze(&mut self, kind: AlarmKind) -> bool {
        self.snoozes.clear(kind)
    }

    pub fn is_suppressed(&mut self, kind: AlarmKind, now: DateTime<Utc>) -> bool {
        self.snoozes.is_suppressed(kind, now)
    }

    /// Instant at which the earliest snooze lifts.
    pub fn next_recheck(&self) -> Option<DateTime<Utc>> {
        self.snoozes.next_expiry()
    }

    pub fn take_alarms(&mut self) -> Vec<AlarmEvent> {
        std::mem::take(&mut self.outbox)
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> EngineSnapshot {
        EngineSnapshot {
            state: self.state.clone(),
            mode: self.mode,
            severity: self.severity(),
            is_stale: self.is_stale(now),
            minutes_since_last_reading: self.minutes_since_last_reading(now),
            loop_unresponsive: self.loop_unresponsive,
            snoozes: self.snoozes.entries(),
            recent: self.history.points(),
            restarts: self.restarts,
            taken_at: now,
        }
    }

    fn evaluate_glucose(&mut self, now: DateTime<Utc>) {
        let Some(reading) = self.state.last_reading.clone() else {
            return;
        };
        let severity = classify(reading.value, &self.config.thresholds);
        let Some(kind) = AlarmKind::for_severity(severity) else {
            return;
        };

        let label = match severity {
            Severity::CriticalLow => "Urgent low",
            Severity::Low => "Low",
            Severity::High => "High",
            Severity::CriticalHigh => "Urgent high",
            Severity::Normal => return,
        };
        self.raise(kind, format!("{}: {}", label, reading), now);
    }

    fn evaluate_missed_readings(&mut self, now: DateTime<Utc>) {
        if !self.readings_missing(now) {
            return;
        }
        let minutes = self.minutes_since_last_reading(now).unwrap_or_default();
        self.raise(
            AlarmKind::MissedReadings,
            format!("No new readings for {} minutes", minutes),
            now,
        );
    }

    fn evaluate_frozen(&mut self, now: DateTime<Utc>) {
        if !self.history.is_frozen(FROZEN_WINDOW_MINUTES, FROZEN_MIN_SAMPLES) {
            return;
        }
        let value = self.history.latest().map(|p| p.value).unwrap_or_default();
        self.raise(
            AlarmKind::ReadingFrozen,
            format!(
                "Sensor value has not changed from {} for at least {} minutes",
                value, FROZEN_WINDOW_MINUTES
            ),
            now,
        );
    }

    fn evaluate_loop(&mut self, now: DateTime<Utc>) {
        if !self.loop_unresponsive {
            return;
        }
        self.raise(
            AlarmKind::LoopNotResponding,
            format!(
                "Loop has not reported for at least {} minutes",
                self.config.loop_stale_minutes
            ),
            now,
        );
    }

    /// Queue one alarm unless its kind is muted. Diagnostic kinds mute
    /// themselves immediately after firing.
    fn raise(&mut self, kind: AlarmKind, message: String, now: DateTime<Utc>) {
        if self.snoozes.is_suppressed(kind, now) {
            return;
        }

        let reading = self.state.last_reading.as_ref();
        let severity = self.severity();
        self.outbox
            .push(AlarmEvent::new(kind, reading, severity, message, now));

        if kind.is_auto_snoozed() {
            if let Err(e) = self.snoozes.snooze(kind, AUTO_SNOOZE_MINUTES, now) {
                warn!("Could not auto-snooze {}: {}", kind, e);
            }
        }
    }

    fn update_mode(&mut self, now: DateTime<Utc>) -> Option<PollMode> {
        let target = if self.is_urgent(now) {
            PollMode::Critical
        } else {
            PollMode::Normal
        };
        if target == self.mode {
            return None;
        }

        info!("Polling mode {:?} -> {:?}", self.mode, target);
        self.mode = target;
        self.state.is_critical = target == PollMode::Critical;
        self.state.poll_interval_seconds = self.poll_interval().as_secs();
        Some(target)
    }
}
