//! Alarm kinds, outbound alarm events and the notifier seam.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{error, warn};

use crate::engine::thresholds::Severity;
use crate::error::MonitorError;
use crate::source::Reading;

/// Identifies an independent alarm with its own snooze state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AlarmKind {
    CriticalLow,
    Low,
    High,
    CriticalHigh,
    MissedReadings,
    LoopNotResponding,
    ReadingFrozen,
    /// Three consecutive fetch failures
    ConnectivityDegraded,
    /// The engine restarted itself
    AutomaticRecovery,
}

impl AlarmKind {
    pub const ALL: [AlarmKind; 9] = [
        AlarmKind::CriticalLow,
        AlarmKind::Low,
        AlarmKind::High,
        AlarmKind::CriticalHigh,
        AlarmKind::MissedReadings,
        AlarmKind::LoopNotResponding,
        AlarmKind::ReadingFrozen,
        AlarmKind::ConnectivityDegraded,
        AlarmKind::AutomaticRecovery,
    ];

    /// Alarm raised for a glucose classification, if any.
    pub fn for_severity(severity: Severity) -> Option<Self> {
        match severity {
            Severity::Normal => None,
            Severity::Low => Some(Self::Low),
            Severity::CriticalLow => Some(Self::CriticalLow),
            Severity::High => Some(Self::High),
            Severity::CriticalHigh => Some(Self::CriticalHigh),
        }
    }

    /// Diagnostic kinds that snooze themselves right after being raised.
    pub fn is_auto_snoozed(&self) -> bool {
        matches!(
            self,
            Self::MissedReadings | Self::LoopNotResponding | Self::ReadingFrozen
        )
    }

    /// Kinds emitted once per threshold crossing rather than per condition.
    pub fn is_system(&self) -> bool {
        matches!(self, Self::ConnectivityDegraded | Self::AutomaticRecovery)
    }

    /// Kinds that should break through quiet modes on the device.
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            Self::CriticalLow | Self::CriticalHigh | Self::MissedReadings
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CriticalLow => "critical-low",
            Self::Low => "low",
            Self::High => "high",
            Self::CriticalHigh => "critical-high",
            Self::MissedReadings => "missed-readings",
            Self::LoopNotResponding => "loop-not-responding",
            Self::ReadingFrozen => "reading-frozen",
            Self::ConnectivityDegraded => "connectivity-degraded",
            Self::AutomaticRecovery => "automatic-recovery",
        }
    }
}

impl fmt::Display for AlarmKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlarmKind {
    type Err = MonitorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| MonitorError::config_error(format!("unknown alarm kind: {}", s)))
    }
}

/// A discrete alarm handed to the notifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlarmEvent {
    pub kind: AlarmKind,
    /// Classification of the reading at the time of the alarm
    pub severity: Option<Severity>,
    /// Last known reading when the alarm was raised
    pub reading: Option<Reading>,
    pub message: String,
    pub is_critical: bool,
    pub raised_at: DateTime<Utc>,
}

impl AlarmEvent {
    pub fn new(
        kind: AlarmKind,
        reading: Option<&Reading>,
        severity: Option<Severity>,
        message: impl Into<String>,
        raised_at: DateTime<Utc>,
    ) -> Self {
        Self {
            kind,
            severity,
            reading: reading.cloned(),
            message: message.into(),
            is_critical: kind.is_critical(),
            raised_at,
        }
    }
}

/// External collaborator that presents alarms to the user.
pub trait Notifier: Send + Sync {
    fn notify(&self, event: &AlarmEvent);
}

/// Writes alarms to the tracing log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, event: &AlarmEvent) {
        if event.is_critical {
            error!("[{}] {}", event.kind, event.message);
        } else {
            warn!("[{}] {}", event.kind, event.message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_round_trips_through_str() {
        for kind in AlarmKind::ALL {
            assert_eq!(kind.as_str().parse::<AlarmKind>().unwrap(), kind);
            assert_eq!(
                serde_json::to_string(&kind).unwrap(),
                format!("\"{}\"", kind.as_str())
            );
        }
        assert!("sideways".parse::<AlarmKind>().is_err());
    }

    #[test]
    fn test_kind_classes() {
        assert!(AlarmKind::ReadingFrozen.is_auto_snoozed());
        assert!(!AlarmKind::CriticalLow.is_auto_snoozed());
        assert!(AlarmKind::AutomaticRecovery.is_system());
        assert!(AlarmKind::MissedReadings.is_critical());
        assert_eq!(AlarmKind::for_severity(Severity::Normal), None);
        assert_eq!(
            AlarmKind::for_severity(Severity::CriticalHigh),
            Some(AlarmKind::CriticalHigh)
        );
    }
}
