//! # glucowatch - glucose polling and alerting engine
//!
//! A companion client that polls a remote glucose-monitoring site, decides
//! how urgently to re-poll, and raises alarms when values are dangerous or
//! data goes stale.
//!
//! ## Features
//!
//! - **Adaptive polling**: five minute cadence, two minutes while anything is urgent
//! - **Alarm policy**: threshold classification, snoozes, frozen-sensor and loop checks
//! - **Self-healing**: failure escalation and an independent watchdog
//! - **Status API**: JSON snapshot, snooze controls and a WebSocket stream
//! - **Library + Binary**: embed the engine or run the `glucowatch` daemon
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use glucowatch::{DataSourceClient, EngineBuilder, EngineConfig, SourceConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let source = DataSourceClient::new(&SourceConfig::new("https://cgm.example.com", "secret"))?;
//!     let (handle, task) = EngineBuilder::new(EngineConfig::default(), Arc::new(source)).spawn()?;
//!
//!     let mut alarms = handle.alarms();
//!     while let Ok(alarm) = alarms.recv().await {
//!         println!("{}", alarm.message);
//!     }
//!     task.await?;
//!     Ok(())
//! }
//! ```

pub mod engine;
pub mod error;
pub mod source;
pub mod web;

// Re-export public API
pub use engine::{
    AlarmEvent, AlarmKind, EngineBuilder, EngineConfig, EngineHandle, EngineSnapshot,
    JsonFileStore, LifecycleEvent, LogNotifier, MemoryStore, Notifier, PollMode, Severity,
    StateStore, ThresholdConfig, ZeroThresholdPolicy,
};
pub use error::{FetchError, MonitorError, Result};
pub use source::{DataSource, DataSourceClient, Reading, SourceConfig, TrendDirection};
pub use web::{start_web_server, WebConfig};

pub use engine::config::{
    DEFAULT_CRITICAL_INTERVAL_SECS, DEFAULT_NORMAL_INTERVAL_SECS, MIN_POLL_INTERVAL_SECS,
    WATCHDOG_INTERVAL_SECS,
};
pub use engine::thresholds::{
    DEFAULT_CRITICAL_HIGH, DEFAULT_CRITICAL_LOW, DEFAULT_HIGH, DEFAULT_LOW,
};

/// The default status API port
pub const DEFAULT_WEB_PORT: u16 = 8080;

/// The default state file name
pub const DEFAULT_STATE_FILE: &str = "glucowatch-state.json";
