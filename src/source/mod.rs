//! Upstream glucose data source.
//!
//! This module owns everything that crosses the network: the authenticated
//! client, the wire formats for entries, treatments, device status and
//! profiles, and the exactly-once timeout race the engine wraps fetches in.

pub mod client;
pub mod completion;
pub mod data;
pub mod device_status;
pub mod profile;

// Re-export commonly used items
pub use client::{hash_secret, DataSource, DataSourceClient, SourceConfig};
pub use completion::{race_with_timeout, CompletionGuard, FetchTicket, FETCH_TIMEOUT};
pub use data::{Reading, TreatmentEvent, TrendDirection};
pub use device_status::DeviceStatus;
pub use profile::{BasalSchedule, Profile};
