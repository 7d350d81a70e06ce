//! Bounded window of recent readings for frozen-sensor detection.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::source::Reading;

/// One hour of five-minute readings.
pub const HISTORY_CAPACITY: usize = 12;

pub const FROZEN_WINDOW_MINUTES: i64 = 15;
pub const FROZEN_MIN_SAMPLES: usize = 3;

/// A (value, timestamp) pair kept in the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryPoint {
    pub value: i32,
    pub timestamp: DateTime<Utc>,
}

/// Insertion-ordered ring of recent readings.
#[derive(Debug, Clone)]
pub struct ReadingHistory {
    points: VecDeque<HistoryPoint>,
    capacity: usize,
}

impl Default for ReadingHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadingHistory {
    pub fn new() -> Self {
        Self::with_capacity(HISTORY_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            points: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a reading, evicting the oldest beyond capacity. Returns `false`
    /// when the reading repeats the newest timestamp (a duplicate fetch).
    pub fn record(&mut self, reading: &Reading) -> bool {
        if self
            .points
            .back()
            .is_some_and(|last| last.timestamp == reading.timestamp)
        {
            return false;
        }

        self.points.push_back(HistoryPoint {
            value: reading.value,
            timestamp: reading.timestamp,
        });
        while self.points.len() > self.capacity {
            self.points.pop_front();
        }
        true
    }

    /// True iff at least `min_samples` of the most recent entries share one
    /// value and those entries span at least `window_minutes`.
    pub fn is_frozen(&self, window_minutes: i64, min_samples: usize) -> bool {
        if min_samples == 0 || self.points.len() < min_samples {
            return false;
        }

        let newest = match self.points.back() {
            Some(point) => *point,
            None => return false,
        };
        let run: Vec<&HistoryPoint> = self
            .points
            .iter()
            .rev()
            .take_while(|point| point.value == newest.value)
            .collect();

        if run.len() < min_samples {
            return false;
        }

        let oldest = run[run.len() - 1];
        newest.timestamp - oldest.timestamp >= Duration::minutes(window_minutes)
    }

    pub fn latest(&self) -> Option<&HistoryPoint> {
        self.points.back()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Points oldest first.
    pub fn points(&self) -> Vec<HistoryPoint> {
        self.points.iter().copied().collect()
    }

    pub fn clear(&mut self) {
        self.points.clear();
    }
}
