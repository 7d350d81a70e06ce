//! The monitoring engine.
//!
//! [`PollingScheduler`] holds the pure decision logic: classification,
//! staleness, escalation and snoozes. [`EngineBuilder`] wraps it in a single
//! tokio task that owns the poll and watchdog timers, talks to a
//! [`DataSource`](crate::source::DataSource), and publishes snapshots and
//! alarms through an [`EngineHandle`].

pub mod alarm;
pub mod clock;
pub mod config;
pub mod driver;
pub mod history;
pub mod scheduler;
pub mod snooze;
pub mod state;
pub mod thresholds;
pub mod watchdog;

// Re-export commonly used items
pub use alarm::{AlarmEvent, AlarmKind, LogNotifier, Notifier};
pub use clock::{Clock, RuntimeClock, SystemClock};
pub use config::EngineConfig;
pub use driver::{EngineBuilder, EngineHandle, LifecycleEvent};
pub use history::{HistoryPoint, ReadingHistory};
pub use scheduler::{EngineSnapshot, PollMode, PollingScheduler, RestartReason, TickOutcome, TickPayload};
pub use snooze::{AlarmSnoozeRegistry, SnoozeEntry};
pub use state::{JsonFileStore, MemoryStore, MonitoringState, PersistedReading, StateStore};
pub use thresholds::{classify, Severity, ThresholdConfig, ZeroThresholdPolicy};
pub use watchdog::{HealthWatchdog, WatchdogProbe, WatchdogVerdict};
