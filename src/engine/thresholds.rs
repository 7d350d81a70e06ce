//! Glucose thresholds and severity classification.

use serde::{Deserialize, Serialize};

use crate::error::{MonitorError, Result};

pub const DEFAULT_CRITICAL_LOW: i32 = 55;
pub const DEFAULT_LOW: i32 = 70;
pub const DEFAULT_HIGH: i32 = 180;
pub const DEFAULT_CRITICAL_HIGH: i32 = 250;

/// Classification of a single reading, in ascending order of concern per side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Severity {
    Normal,
    Low,
    CriticalLow,
    High,
    CriticalHigh,
}

impl Severity {
    pub fn is_urgent(&self) -> bool {
        is_urgent(*self)
    }
}

/// True for the two critical classifications.
pub fn is_urgent(severity: Severity) -> bool {
    matches!(severity, Severity::CriticalLow | Severity::CriticalHigh)
}

/// How a zero in the raw configuration is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ZeroThresholdPolicy {
    /// Zero is a configured value like any other
    #[default]
    Literal,
    /// Zero means unset and takes the documented default for that slot
    UseDefault,
}

/// Validated, strictly ordered thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawThresholds", into = "RawThresholds")]
pub struct ThresholdConfig {
    critical_low: i32,
    low: i32,
    high: i32,
    critical_high: i32,
}

/// Thresholds as they arrive from configuration, before validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawThresholds {
    pub critical_low: i32,
    pub low: i32,
    pub high: i32,
    pub critical_high: i32,
    #[serde(default)]
    pub zero_policy: ZeroThresholdPolicy,
}

impl Default for RawThresholds {
    fn default() -> Self {
        Self {
            critical_low: DEFAULT_CRITICAL_LOW,
            low: DEFAULT_LOW,
            high: DEFAULT_HIGH,
            critical_high: DEFAULT_CRITICAL_HIGH,
            zero_policy: ZeroThresholdPolicy::Literal,
        }
    }
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            critical_low: DEFAULT_CRITICAL_LOW,
            low: DEFAULT_LOW,
            high: DEFAULT_HIGH,
            critical_high: DEFAULT_CRITICAL_HIGH,
        }
    }
}

impl ThresholdConfig {
    /// Build a configuration, rejecting anything not strictly ordered.
    pub fn new(critical_low: i32, low: i32, high: i32, critical_high: i32) -> Result<Self> {
        if !(critical_low < low && low < high && high < critical_high) {
            return Err(MonitorError::config_error(format!(
                "thresholds must satisfy critical_low < low < high < critical_high, got {} / {} / {} / {}",
                critical_low, low, high, critical_high
            )));
        }
        Ok(Self {
            critical_low,
            low,
            high,
            critical_high,
        })
    }

    /// Apply the zero policy, then validate.
    pub fn from_raw(raw: RawThresholds) -> Result<Self> {
        let fill = |value: i32, default: i32| match (value, raw.zero_policy) {
            (0, ZeroThresholdPolicy::UseDefault) => default,
            (value, _) => value,
        };

        Self::new(
            fill(raw.critical_low, DEFAULT_CRITICAL_LOW),
            fill(raw.low, DEFAULT_LOW),
            fill(raw.high, DEFAULT_HIGH),
            fill(raw.critical_high, DEFAULT_CRITICAL_HIGH),
        )
    }

    pub fn critical_low(&self) -> i32 {
        self.critical_low
    }

    pub fn low(&self) -> i32 {
        self.low
    }

    pub fn high(&self) -> i32 {
        self.high
    }

    pub fn critical_high(&self) -> i32 {
        self.critical_high
    }

    pub fn classify(&self, value: i32) -> Severity {
        classify(value, self)
    }
}

impl TryFrom<RawThresholds> for ThresholdConfig {
    type Error = MonitorError;

    fn try_from(raw: RawThresholds) -> Result<Self> {
        Self::from_raw(raw)
    }
}

impl From<ThresholdConfig> for RawThresholds {
    fn from(config: ThresholdConfig) -> Self {
        Self {
            critical_low: config.critical_low,
            low: config.low,
            high: config.high,
            critical_high: config.critical_high,
            zero_policy: ZeroThresholdPolicy::Literal,
        }
    }
}

/// Classify a value. Order matters: critical bounds are inclusive and
/// checked first, the plain low/high bounds are exclusive.
pub fn classify(value: i32, config: &ThresholdConfig) -> Severity {
    if value <= config.critical_low {
        Severity::CriticalLow
    } else if value < config.low {
        Severity::Low
    } else if value >= config.critical_high {
        Severity::CriticalHigh
    } else if value > config.high {
        Severity::High
    } else {
        Severity::Normal
    }
}
