//! Data structures for readings and treatment events.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::FetchError;

/// Direction and rate of glucose change as reported by the sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum TrendDirection {
    DoubleUp,
    SingleUp,
    FortyFiveUp,
    Flat,
    FortyFiveDown,
    SingleDown,
    DoubleDown,
    #[default]
    Unknown,
}

impl TrendDirection {
    /// Parse the upstream `direction` string. Anything unrecognized
    /// (`"NOT COMPUTABLE"`, `"RATE OUT OF RANGE"`, `"NONE"`) is `Unknown`.
    pub fn from_wire(direction: &str) -> Self {
        match direction {
            "DoubleUp" => Self::DoubleUp,
            "SingleUp" => Self::SingleUp,
            "FortyFiveUp" => Self::FortyFiveUp,
            "Flat" => Self::Flat,
            "FortyFiveDown" => Self::FortyFiveDown,
            "SingleDown" => Self::SingleDown,
            "DoubleDown" => Self::DoubleDown,
            _ => Self::Unknown,
        }
    }

    /// Arrow used when printing a reading.
    pub fn arrow(&self) -> &'static str {
        match self {
            Self::DoubleUp => "⇈",
            Self::SingleUp => "↑",
            Self::FortyFiveUp => "↗",
            Self::Flat => "→",
            Self::FortyFiveDown => "↘",
            Self::SingleDown => "↓",
            Self::DoubleDown => "⇊",
            Self::Unknown => "?",
        }
    }
}

/// One glucose measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Glucose concentration in the source unit (mg/dL upstream)
    pub value: i32,
    /// Trend reported alongside the value
    pub trend: TrendDirection,
    /// Sensor timestamp
    pub timestamp: DateTime<Utc>,
    /// Change since the previous reading, when the uploader computed one
    pub delta: Option<f64>,
}

impl Reading {
    pub fn new(value: i32, trend: TrendDirection, timestamp: DateTime<Utc>) -> Self {
        Self {
            value,
            trend,
            timestamp,
            delta: None,
        }
    }

    pub fn with_delta(mut self, delta: f64) -> Self {
        self.delta = Some(delta);
        self
    }

    /// Whole minutes elapsed between the reading and `now`, never negative.
    pub fn minutes_old(&self, now: DateTime<Utc>) -> i64 {
        (now - self.timestamp).num_minutes().max(0)
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.value, self.trend.arrow())?;
        if let Some(delta) = self.delta {
            write!(f, " ({:+.1})", delta)?;
        }
        Ok(())
    }
}

/// Raw `entries.json` record. Calibration and meter records carry no `sgv`.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct EntryRecord {
    pub sgv: Option<i32>,
    pub date: Option<f64>,
    pub direction: Option<String>,
    pub delta: Option<f64>,
}

impl EntryRecord {
    /// Convert to a `Reading`, or `None` for records without a glucose value.
    pub fn into_reading(self) -> Option<Reading> {
        let value = self.sgv?;
        let millis = self.date?;
        let timestamp = Utc.timestamp_millis_opt(millis as i64).single()?;
        let trend = self
            .direction
            .as_deref()
            .map(TrendDirection::from_wire)
            .unwrap_or_default();

        Some(Reading {
            value,
            trend,
            timestamp,
            delta: self.delta,
        })
    }
}

/// Decode an `entries.json` body into readings, newest first as served.
pub(crate) fn parse_entries(body: &str) -> Result<Vec<Reading>, FetchError> {
    let records: Vec<EntryRecord> =
        serde_json::from_str(body).map_err(|e| FetchError::malformed(e.to_string()))?;

    let readings: Vec<Reading> = records
        .into_iter()
        .filter_map(EntryRecord::into_reading)
        .collect();

    if readings.is_empty() {
        return Err(FetchError::EmptyResult);
    }
    Ok(readings)
}

/// A treatment, bolus, carb or temp basal event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreatmentEvent {
    #[serde(rename = "_id", default)]
    pub id: Option<String>,
    #[serde(default)]
    pub event_type: String,
    #[serde(rename = "created_at")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub insulin: Option<f64>,
    #[serde(default)]
    pub carbs: Option<f64>,
    #[serde(rename = "duration", default)]
    pub duration_minutes: Option<f64>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Decode a `treatments.json` body. Records with an unparsable
/// `created_at` are skipped rather than failing the whole batch.
pub(crate) fn parse_treatments(body: &str) -> Result<Vec<TreatmentEvent>, FetchError> {
    let records: Vec<serde_json::Value> =
        serde_json::from_str(body).map_err(|e| FetchError::malformed(e.to_string()))?;

    let mut events: Vec<TreatmentEvent> = records
        .into_iter()
        .filter_map(|record| match serde_json::from_value(record) {
            Ok(event) => Some(event),
            Err(e) => {
                tracing::debug!("Skipping undecodable treatment: {}", e);
                None
            }
        })
        .collect();

    events.sort_by_key(|event| event.created_at);
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trend_from_wire() {
        assert_eq!(TrendDirection::from_wire("DoubleDown"), TrendDirection::DoubleDown);
        assert_eq!(TrendDirection::from_wire("Flat"), TrendDirection::Flat);
        assert_eq!(TrendDirection::from_wire("NOT COMPUTABLE"), TrendDirection::Unknown);
        assert_eq!(TrendDirection::from_wire(""), TrendDirection::Unknown);
    }

    #[test]
    fn test_parse_entries_skips_calibrations() {
        let body = r#"[
            {"sgv": 120, "date": 1700000300000.0, "direction": "Flat", "delta": -1.5},
            {"type": "cal", "date": 1700000200000.0, "slope": 850.0},
            {"sgv": 118, "date": 1700000000000, "direction": "FortyFiveUp"}
        ]"#;

        let readings = parse_entries(body).unwrap();
        assert_eq!(readings.len(), 2);
        assert_eq!(readings[0].value, 120);
        assert_eq!(readings[0].delta, Some(-1.5));
        assert_eq!(readings[0].timestamp.timestamp_millis(), 1_700_000_300_000);
        assert_eq!(readings[1].trend, TrendDirection::FortyFiveUp);
        assert_eq!(readings[1].delta, None);
    }

    #[test]
    fn test_parse_entries_errors() {
        assert_eq!(parse_entries("[]"), Err(FetchError::EmptyResult));
        assert_eq!(
            parse_entries(r#"[{"type": "mbg", "date": 1700000000000}]"#),
            Err(FetchError::EmptyResult)
        );
        assert!(matches!(
            parse_entries("<html>bad gateway</html>"),
            Err(FetchError::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_parse_treatments_sorted_and_tolerant() {
        let body = r#"[
            {"_id": "b", "eventType": "Meal Bolus", "created_at": "2024-03-01T12:30:00Z", "insulin": 4.5, "carbs": 45},
            {"_id": "x", "eventType": "Note", "created_at": "not a date"},
            {"_id": "a", "eventType": "Temp Basal", "created_at": "2024-03-01T11:00:00.000Z", "duration": 30}
        ]"#;

        let events = parse_treatments(body).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].id.as_deref(), Some("a"));
        assert_eq!(events[0].duration_minutes, Some(30.0));
        assert_eq!(events[1].event_type, "Meal Bolus");
        assert_eq!(events[1].carbs, Some(45.0));
    }

    #[test]
    fn test_reading_display() {
        let reading = Reading::new(142, TrendDirection::SingleUp, Utc::now()).with_delta(6.0);
        assert_eq!(reading.to_string(), "142 ↑ (+6.0)");
    }
}
