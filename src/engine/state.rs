//! Monitoring state and its durable last-known-good handoff.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::{MonitorError, Result};
use crate::source::Reading;

/// Scheduler-owned view of the monitoring loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoringState {
    pub last_reading: Option<Reading>,
    pub last_successful_fetch_at: Option<DateTime<Utc>>,
    pub consecutive_failure_count: u32,
    pub is_critical: bool,
    pub poll_interval_seconds: u64,
}

impl MonitoringState {
    /// Fresh state, optionally seeded with a persisted reading so consumers
    /// can show a value before the first round trip.
    pub fn seeded(seed: Option<PersistedReading>, poll_interval_seconds: u64) -> Self {
        Self {
            last_reading: seed.map(|persisted| persisted.reading),
            last_successful_fetch_at: None,
            consecutive_failure_count: 0,
            is_critical: false,
            poll_interval_seconds,
        }
    }

    pub fn persisted(&self) -> Option<PersistedReading> {
        self.last_reading.clone().map(|reading| PersistedReading { reading })
    }
}

/// What survives a relaunch: the last reading, bit-for-bit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedReading {
    pub reading: Reading,
}

/// Last-writer-wins key/value persistence.
pub trait StateStore: Send + Sync {
    fn load(&self) -> Result<Option<PersistedReading>>;
    fn save(&self, state: &PersistedReading) -> Result<()>;
}

/// Stores the last reading as a JSON file.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StateStore for JsonFileStore {
    fn load(&self) -> Result<Option<PersistedReading>> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => Ok(Some(serde_json::from_str(&contents)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Written to a `.partial` sibling and renamed into place.
    fn save(&self, state: &PersistedReading) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let tmp_path = self.path.with_extension("partial");
        let json = serde_json::to_string_pretty(state)?;
        let result = fs::write(&tmp_path, json).and_then(|_| fs::rename(&tmp_path, &self.path));

        if result.is_err() {
            let _ = fs::remove_file(&tmp_path);
        }
        result.map_err(MonitorError::from)
    }
}

/// In-process store for tests and ephemeral runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    slot: Mutex<Option<PersistedReading>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reading(reading: Reading) -> Self {
        Self {
            slot: Mutex::new(Some(PersistedReading { reading })),
        }
    }
}

impl StateStore for MemoryStore {
    fn load(&self) -> Result<Option<PersistedReading>> {
        self.slot
            .lock()
            .map(|slot| slot.clone())
            .map_err(|_| MonitorError::engine_error("state store lock poisoned"))
    }

    fn save(&self, state: &PersistedReading) -> Result<()> {
        let mut slot = self
            .slot
            .lock()
            .map_err(|_| MonitorError::engine_error("state store lock poisoned"))?;
        *slot = Some(state.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::TrendDirection;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn sample() -> PersistedReading {
        let timestamp = Utc.timestamp_millis_opt(1_709_280_123_456).unwrap();
        PersistedReading {
            reading: Reading::new(97, TrendDirection::FortyFiveDown, timestamp).with_delta(-3.25),
        }
    }

    #[test]
    fn test_file_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(dir.path().join("nested").join("state.json"));

        assert_eq!(store.load().unwrap(), None);
        store.save(&sample()).unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded, sample());
        assert_eq!(loaded.reading.timestamp, sample().reading.timestamp);
        assert!(!store.path().with_extension("partial").exists());
    }

    #[test]
    fn test_last_writer_wins() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(dir.path().join("state.json"));
        store.save(&sample()).unwrap();

        let mut newer = sample();
        newer.reading.value = 140;
        store.save(&newer).unwrap();
        assert_eq!(store.load().unwrap().unwrap().reading.value, 140);
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{ nope").unwrap();
        assert!(matches!(
            JsonFileStore::new(path).load(),
            Err(MonitorError::Serialization(_))
        ));
    }

    #[test]
    fn test_seeded_state() {
        let state = MonitoringState::seeded(Some(sample()), 300);
        assert_eq!(state.last_reading.as_ref().unwrap().value, 97);
        assert_eq!(state.consecutive_failure_count, 0);
        assert_eq!(state.persisted(), Some(sample()));

        let memory = MemoryStore::new();
        memory.save(&sample()).unwrap();
        assert_eq!(memory.load().unwrap(), Some(sample()));
    }
}
