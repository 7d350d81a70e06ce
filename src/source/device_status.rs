//! Pump and loop telemetry from `devicestatus.json`.
//!
//! Uploaders disagree on where they put things: Loop nests under `loop`,
//! OpenAPS under `openaps`, and older uploaders flatten battery onto the
//! root. The document is kept as raw JSON and every concept has a helper
//! that walks its candidate paths in priority order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::FetchError;

const RESERVOIR_PATHS: &[&str] = &["/pump/reservoir"];
const BATTERY_PATHS: &[&str] = &["/uploader/battery", "/pump/battery/percent", "/uploaderBattery"];
const IOB_PATHS: &[&str] = &["/loop/iob/iob", "/openaps/iob/iob", "/pump/iob/bolusiob"];
const COB_PATHS: &[&str] = &["/loop/cob/cob", "/openaps/suggested/COB", "/openaps/enacted/COB"];
const BASAL_PATHS: &[&str] = &["/loop/enacted/rate", "/openaps/enacted/rate"];
const LOOP_TIMESTAMP_PATHS: &[&str] = &[
    "/loop/timestamp",
    "/openaps/suggested/timestamp",
    "/openaps/enacted/timestamp",
    "/created_at",
];

/// Permissive view over one device status document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceStatus {
    raw: Value,
}

impl DeviceStatus {
    pub fn from_value(raw: Value) -> Self {
        Self { raw }
    }

    /// Decode a `devicestatus.json?count=1` body, which is either a single
    /// object or an array holding one.
    pub fn parse(body: &str) -> Result<Self, FetchError> {
        let value: Value =
            serde_json::from_str(body).map_err(|e| FetchError::malformed(e.to_string()))?;

        match value {
            Value::Array(items) => items
                .into_iter()
                .next()
                .map(Self::from_value)
                .ok_or(FetchError::EmptyResult),
            Value::Object(_) => Ok(Self::from_value(value)),
            other => Err(FetchError::malformed(format!(
                "expected object or array, got {}",
                other
            ))),
        }
    }

    pub fn raw(&self) -> &Value {
        &self.raw
    }

    /// Insulin units left in the pump reservoir.
    pub fn reservoir_units(&self) -> Option<f64> {
        self.first_number(RESERVOIR_PATHS)
    }

    /// Battery level of the uploader or pump, in percent.
    pub fn battery_percent(&self) -> Option<f64> {
        self.first_number(BATTERY_PATHS)
    }

    pub fn insulin_on_board(&self) -> Option<f64> {
        self.first_number(IOB_PATHS)
    }

    pub fn carbs_on_board(&self) -> Option<f64> {
        self.first_number(COB_PATHS)
    }

    /// Temp basal rate the loop last enacted, U/h.
    pub fn enacted_basal_rate(&self) -> Option<f64> {
        self.first_number(BASAL_PATHS)
    }

    /// When the closed loop last reported in.
    pub fn loop_timestamp(&self) -> Option<DateTime<Utc>> {
        LOOP_TIMESTAMP_PATHS
            .iter()
            .filter_map(|path| self.raw.pointer(path))
            .filter_map(Value::as_str)
            .find_map(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|ts| ts.with_timezone(&Utc))
    }

    /// True when the loop has not reported for at least `stale_minutes`.
    /// A document without any loop timestamp is not considered stale.
    pub fn is_loop_stale(&self, now: DateTime<Utc>, stale_minutes: i64) -> bool {
        self.loop_timestamp()
            .map(|ts| (now - ts).num_minutes() >= stale_minutes)
            .unwrap_or(false)
    }

    fn first_number(&self, paths: &[&str]) -> Option<f64> {
        paths
            .iter()
            .filter_map(|path| self.raw.pointer(path))
            .find_map(number_like)
    }
}

/// Numbers sometimes arrive as strings (`"12.5"`, `"85%"`).
fn number_like(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches('%').parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn loop_status() -> DeviceStatus {
        DeviceStatus::from_value(json!({
            "created_at": "2024-03-01T12:00:00Z",
            "pump": {
                "reservoir": 112.4,
                "battery": {"percent": 75},
                "iob": {"bolusiob": 0.9}
            },
            "uploader": {"battery": 58},
            "loop": {
                "timestamp": "2024-03-01T11:58:30Z",
                "iob": {"iob": 2.35},
                "cob": {"cob": 18},
                "enacted": {"rate": 0.65}
            }
        }))
    }

    #[test]
    fn test_loop_paths_win() {
        let status = loop_status();
        assert_eq!(status.reservoir_units(), Some(112.4));
        assert_eq!(status.battery_percent(), Some(58.0));
        assert_eq!(status.insulin_on_board(), Some(2.35));
        assert_eq!(status.carbs_on_board(), Some(18.0));
        assert_eq!(status.enacted_basal_rate(), Some(0.65));
        assert_eq!(
            status.loop_timestamp().unwrap().to_rfc3339(),
            "2024-03-01T11:58:30+00:00"
        );
    }

    #[test]
    fn test_openaps_fallbacks() {
        let status = DeviceStatus::from_value(json!({
            "openaps": {
                "iob": {"iob": "1.2"},
                "suggested": {"COB": 30, "timestamp": "2024-03-01T12:01:00.000Z"},
                "enacted": {"rate": 1.1}
            },
            "uploaderBattery": "91%"
        }));

        assert_eq!(status.insulin_on_board(), Some(1.2));
        assert_eq!(status.carbs_on_board(), Some(30.0));
        assert_eq!(status.enacted_basal_rate(), Some(1.1));
        assert_eq!(status.battery_percent(), Some(91.0));
        assert_eq!(status.reservoir_units(), None);
        assert!(status.loop_timestamp().is_some());
    }

    #[test]
    fn test_missing_and_mistyped_keys() {
        let status = DeviceStatus::from_value(json!({
            "pump": {"reservoir": null, "battery": "unknown"},
            "loop": {"timestamp": 12345}
        }));

        assert_eq!(status.reservoir_units(), None);
        assert_eq!(status.battery_percent(), None);
        assert_eq!(status.loop_timestamp(), None);
        assert!(!status.is_loop_stale(Utc::now(), 15));
    }

    #[test]
    fn test_parse_array_and_object() {
        let from_array = DeviceStatus::parse(r#"[{"pump": {"reservoir": 50}}]"#).unwrap();
        assert_eq!(from_array.reservoir_units(), Some(50.0));

        let from_object = DeviceStatus::parse(r#"{"pump": {"reservoir": 40}}"#).unwrap();
        assert_eq!(from_object.reservoir_units(), Some(40.0));

        assert_eq!(DeviceStatus::parse("[]"), Err(FetchError::EmptyResult));
        assert!(matches!(
            DeviceStatus::parse("42"),
            Err(FetchError::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_loop_staleness() {
        let status = loop_status();
        let ts = status.loop_timestamp().unwrap();
        assert!(!status.is_loop_stale(ts + chrono::Duration::minutes(14), 15));
        assert!(status.is_loop_stale(ts + chrono::Duration::minutes(15), 15));
    }
}
