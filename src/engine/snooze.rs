//! Per-kind alarm suppression with lazy expiry.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::engine::alarm::AlarmKind;
use crate::error::{MonitorError, Result};

/// Mute window applied to diagnostic alarms right after they fire.
pub const AUTO_SNOOZE_MINUTES: i64 = 15;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnoozeEntry {
    pub alarm_kind: AlarmKind,
    pub muted_until: DateTime<Utc>,
    pub times_snoozed: u32,
}

/// Independent snooze state for every alarm kind.
#[derive(Debug, Clone, Default)]
pub struct AlarmSnoozeRegistry {
    entries: BTreeMap<AlarmKind, SnoozeEntry>,
}

impl AlarmSnoozeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// True while `now` is before the kind's `muted_until`. An elapsed entry
    /// is removed on the way out.
    pub fn is_suppressed(&mut self, kind: AlarmKind, now: DateTime<Utc>) -> bool {
        match self.entries.get(&kind) {
            Some(entry) if now < entry.muted_until => true,
            Some(_) => {
                self.entries.remove(&kind);
                false
            }
            None => false,
        }
    }

    /// Mute `kind` for `minutes` from `now`, overwriting any current window.
    /// A window that ends past the representable date range is rejected and
    /// leaves the registry untouched.
    pub fn snooze(
        &mut self,
        kind: AlarmKind,
        minutes: i64,
        now: DateTime<Utc>,
    ) -> Result<&SnoozeEntry> {
        let muted_until = Duration::try_minutes(minutes)
            .and_then(|window| now.checked_add_signed(window))
            .ok_or_else(|| {
                MonitorError::config_error(format!("snooze of {} minutes is out of range", minutes))
            })?;
        let entry = self.entries.entry(kind).or_insert(SnoozeEntry {
            alarm_kind: kind,
            muted_until,
            times_snoozed: 0,
        });
        entry.muted_until = muted_until;
        entry.times_snoozed += 1;
        Ok(entry)
    }

    /// Drop the entry for `kind`. Returns whether one existed.
    pub fn clear(&mut self, kind: AlarmKind) -> bool {
        self.entries.remove(&kind).is_some()
    }

    pub fn get(&self, kind: AlarmKind) -> Option<&SnoozeEntry> {
        self.entries.get(&kind)
    }

    /// Remove every elapsed entry and return the kinds that were released.
    pub fn take_expired(&mut self, now: DateTime<Utc>) -> Vec<AlarmKind> {
        let expired: Vec<AlarmKind> = self
            .entries
            .values()
            .filter(|entry| now >= entry.muted_until)
            .map(|entry| entry.alarm_kind)
            .collect();
        for kind in &expired {
            self.entries.remove(kind);
        }
        expired
    }

    /// Earliest instant at which a current suppression lifts.
    pub fn next_expiry(&self) -> Option<DateTime<Utc>> {
        self.entries.values().map(|entry| entry.muted_until).min()
    }

    pub fn entries(&self) -> Vec<SnoozeEntry> {
        self.entries.values().cloned().collect()
    }
}
