//! Basal schedule from `profile.json`.

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::FetchError;

/// One step of a basal schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BasalEntry {
    /// Start of the step, `"HH:MM"`
    pub time: String,
    /// Rate in U/h
    pub value: f64,
    #[serde(default)]
    pub time_as_seconds: Option<u32>,
}

impl BasalEntry {
    /// Start of the step as a time of day. `timeAsSeconds` wins over `time`.
    pub fn start(&self) -> Option<NaiveTime> {
        if let Some(secs) = self.time_as_seconds {
            return NaiveTime::from_num_seconds_from_midnight_opt(secs, 0);
        }
        NaiveTime::parse_from_str(&self.time, "%H:%M").ok()
    }
}

/// Basal steps ordered by start time.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BasalSchedule {
    steps: Vec<(NaiveTime, f64)>,
}

impl BasalSchedule {
    pub fn from_entries(entries: &[BasalEntry]) -> Self {
        let mut steps: Vec<(NaiveTime, f64)> = entries
            .iter()
            .filter_map(|entry| entry.start().map(|start| (start, entry.value)))
            .collect();
        steps.sort_by_key(|(start, _)| *start);
        Self { steps }
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Scheduled rate at `time`: the latest step starting at or before it.
    /// Before the first step of the day the previous day's last step is
    /// still running.
    pub fn rate_at(&self, time: NaiveTime) -> Option<f64> {
        self.steps
            .iter()
            .rev()
            .find(|(start, _)| *start <= time)
            .or_else(|| self.steps.last())
            .map(|(_, rate)| *rate)
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ProfileStore {
    #[serde(default)]
    basal: Vec<BasalEntry>,
    #[serde(default)]
    timezone: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProfileDocument {
    default_profile: Option<String>,
    #[serde(default)]
    store: HashMap<String, ProfileStore>,
}

/// The active therapy profile.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Profile {
    pub name: String,
    pub timezone: Option<String>,
    pub basal: BasalSchedule,
}

impl Profile {
    /// Decode a `profile.json` body: an array of documents (newest first) or
    /// a single document. The default store of the first document is used.
    pub fn parse(body: &str) -> Result<Self, FetchError> {
        let value: serde_json::Value =
            serde_json::from_str(body).map_err(|e| FetchError::malformed(e.to_string()))?;

        let document = match value {
            serde_json::Value::Array(items) => {
                items.into_iter().next().ok_or(FetchError::EmptyResult)?
            }
            other => other,
        };

        let document: ProfileDocument =
            serde_json::from_value(document).map_err(|e| FetchError::malformed(e.to_string()))?;

        let name = document
            .default_profile
            .filter(|name| document.store.contains_key(name))
            .or_else(|| {
                let mut names: Vec<&String> = document.store.keys().collect();
                names.sort();
                names.first().map(|name| name.to_string())
            })
            .ok_or(FetchError::EmptyResult)?;

        let store = &document.store[&name];
        Ok(Self {
            timezone: store.timezone.clone(),
            basal: BasalSchedule::from_entries(&store.basal),
            name,
        })
    }

    pub fn scheduled_basal(&self, time: NaiveTime) -> Option<f64> {
        self.basal.rate_at(time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    const PROFILE_BODY: &str = r#"[{
        "defaultProfile": "Weekday",
        "store": {
            "Weekday": {
                "timezone": "Europe/Berlin",
                "basal": [
                    {"time": "06:00", "value": 0.9, "timeAsSeconds": 21600},
                    {"time": "00:00", "value": 0.6},
                    {"time": "22:30", "value": 0.75}
                ]
            },
            "Sick": {"basal": [{"time": "00:00", "value": 1.5}]}
        }
    }]"#;

    #[test]
    fn test_profile_parse_uses_default_store() {
        let profile = Profile::parse(PROFILE_BODY).unwrap();
        assert_eq!(profile.name, "Weekday");
        assert_eq!(profile.timezone.as_deref(), Some("Europe/Berlin"));
        assert_eq!(profile.scheduled_basal(at(5, 59)), Some(0.6));
        assert_eq!(profile.scheduled_basal(at(6, 0)), Some(0.9));
        assert_eq!(profile.scheduled_basal(at(23, 0)), Some(0.75));
    }

    #[test]
    fn test_schedule_wraps_before_first_step() {
        let schedule = BasalSchedule::from_entries(&[
            BasalEntry { time: "04:00".into(), value: 1.0, time_as_seconds: None },
            BasalEntry { time: "20:00".into(), value: 0.5, time_as_seconds: None },
        ]);
        assert_eq!(schedule.rate_at(at(2, 0)), Some(0.5));
        assert_eq!(schedule.rate_at(at(4, 0)), Some(1.0));
        assert_eq!(BasalSchedule::default().rate_at(at(4, 0)), None);
    }

    #[test]
    fn test_profile_parse_errors() {
        assert_eq!(Profile::parse("[]"), Err(FetchError::EmptyResult));
        assert_eq!(
            Profile::parse(r#"{"defaultProfile": "x", "store": {}}"#),
            Err(FetchError::EmptyResult)
        );
        assert!(matches!(Profile::parse("{"), Err(FetchError::MalformedPayload(_))));
    }
}
