//! Authenticated HTTP client for the upstream glucose API.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, SecondsFormat, Utc};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::fmt;
use std::time::Duration;
use tracing::debug;

use crate::error::{FetchError, MonitorError, Result};
use crate::source::completion::FETCH_TIMEOUT;
use crate::source::data::{parse_entries, parse_treatments, Reading, TreatmentEvent};
use crate::source::device_status::DeviceStatus;
use crate::source::profile::Profile;

/// Header carrying the hashed secret.
pub const API_SECRET_HEADER: &str = "api-secret";

/// Readings per hour at the sensor's five-minute cadence.
const READINGS_PER_HOUR: u32 = 12;

/// Entries requested for the latest reading. The newest entry can be a
/// calibration or meter record without a glucose value.
const LATEST_LOOKBACK: u32 = 6;

/// Anything that can serve readings and telemetry to the engine.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Most recent reading.
    async fn fetch_latest(&self) -> std::result::Result<Reading, FetchError>;

    /// Readings from the last `hours`, oldest first.
    async fn fetch_history(&self, hours: u32) -> std::result::Result<Vec<Reading>, FetchError>;

    /// Treatments created in the last `hours`, oldest first.
    async fn fetch_events(&self, hours: u32)
        -> std::result::Result<Vec<TreatmentEvent>, FetchError>;

    /// Latest pump/loop telemetry document.
    async fn fetch_device_status(&self) -> std::result::Result<DeviceStatus, FetchError>;

    /// Active therapy profile.
    async fn fetch_profile(&self) -> std::result::Result<Profile, FetchError>;
}

/// Connection settings for the upstream API.
#[derive(Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Site root, e.g. `https://my-site.example.com`
    pub base_url: String,
    /// Operator secret; hashed before use and never sent raw
    #[serde(skip_serializing)]
    pub api_secret: String,
    /// Transport timeout in seconds
    pub timeout_secs: u64,
}

impl fmt::Debug for SourceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceConfig")
            .field("base_url", &self.base_url)
            .field("api_secret", &"<redacted>")
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl SourceConfig {
    pub fn new(base_url: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_secret: api_secret.into(),
            timeout_secs: FETCH_TIMEOUT.as_secs(),
        }
    }

    /// Set the transport timeout.
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Validate the settings once at startup.
    pub fn validate(&self) -> Result<()> {
        let url = self.base_url.trim();
        if !(url.starts_with("https://") || url.starts_with("http://")) {
            return Err(MonitorError::config_error(format!(
                "base URL must start with http:// or https://, got {:?}",
                self.base_url
            )));
        }
        if self.api_secret.is_empty() {
            return Err(MonitorError::config_error("API secret must not be empty"));
        }
        if self.timeout_secs == 0 {
            return Err(MonitorError::config_error("timeout must be at least one second"));
        }
        Ok(())
    }
}

/// Lowercase hex SHA-1 of the secret, as the upstream API expects.
pub fn hash_secret(secret: &str) -> String {
    hex::encode(Sha1::digest(secret.as_bytes()))
}

/// HTTP implementation of [`DataSource`].
#[derive(Debug, Clone)]
pub struct DataSourceClient {
    client: Client,
    base_url: String,
}

impl DataSourceClient {
    /// Build a client. The secret is hashed here and only the hash is kept,
    /// inside the client's default headers.
    pub fn new(config: &SourceConfig) -> Result<Self> {
        config.validate()?;

        let mut headers = HeaderMap::new();
        let mut secret = HeaderValue::from_str(&hash_secret(&config.api_secret))
            .map_err(|e| MonitorError::http_error(e.to_string()))?;
        secret.set_sensitive(true);
        headers.insert(API_SECRET_HEADER, secret);
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(config.timeout_secs.min(10)))
            .default_headers(headers)
            .build()
            .map_err(|e| MonitorError::http_error(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_body(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> std::result::Result<String, FetchError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("GET {}", url);

        let response = self.client.get(&url).query(query).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::from_status(status.as_u16()));
        }

        Ok(response.text().await?)
    }

    async fn entries(&self, count: u32) -> std::result::Result<Vec<Reading>, FetchError> {
        let body = self
            .get_body("/api/v1/entries.json", &[("count", count.to_string())])
            .await?;
        parse_entries(&body)
    }
}

#[async_trait]
impl DataSource for DataSourceClient {
    async fn fetch_latest(&self) -> std::result::Result<Reading, FetchError> {
        self.entries(LATEST_LOOKBACK)
            .await?
            .into_iter()
            .max_by_key(|reading| reading.timestamp)
            .ok_or(FetchError::EmptyResult)
    }

    async fn fetch_history(&self, hours: u32) -> std::result::Result<Vec<Reading>, FetchError> {
        let since = Utc::now() - ChronoDuration::hours(i64::from(hours));
        let mut readings: Vec<Reading> = self
            .entries(hours.max(1) * READINGS_PER_HOUR)
            .await?
            .into_iter()
            .filter(|reading| reading.timestamp >= since)
            .collect();

        if readings.is_empty() {
            return Err(FetchError::EmptyResult);
        }
        readings.sort_by_key(|reading| reading.timestamp);
        Ok(readings)
    }

    async fn fetch_events(
        &self,
        hours: u32,
    ) -> std::result::Result<Vec<TreatmentEvent>, FetchError> {
        let since = (Utc::now() - ChronoDuration::hours(i64::from(hours)))
            .to_rfc3339_opts(SecondsFormat::Millis, true);
        let body = self
            .get_body(
                "/api/v1/treatments.json",
                &[("find[created_at][$gte]", since)],
            )
            .await?;
        parse_treatments(&body)
    }

    async fn fetch_device_status(&self) -> std::result::Result<DeviceStatus, FetchError> {
        let body = self
            .get_body("/api/v1/devicestatus.json", &[("count", "1".to_string())])
            .await?;
        DeviceStatus::parse(&body)
    }

    async fn fetch_profile(&self) -> std::result::Result<Profile, FetchError> {
        let body = self.get_body("/api/v1/profile.json", &[]).await?;
        Profile::parse(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_secret_is_sha1_hex() {
        // sha1("abc") reference vector
        assert_eq!(hash_secret("abc"), "a9993e364706816aba3e25717850c26c9cd0d89d");
        assert_eq!(hash_secret("abc").len(), 40);
    }

    #[test]
    fn test_source_config_validation() {
        assert!(SourceConfig::new("https://cgm.example.com", "s3cret").validate().is_ok());
        assert!(SourceConfig::new("cgm.example.com", "s3cret").validate().is_err());
        assert!(SourceConfig::new("https://cgm.example.com", "").validate().is_err());
        assert!(SourceConfig::new("https://cgm.example.com", "s3cret")
            .with_timeout_secs(0)
            .validate()
            .is_err());
    }

    #[test]
    fn test_debug_redacts_secret() {
        let config = SourceConfig::new("https://cgm.example.com", "hunter22");
        let printed = format!("{:?}", config);
        assert!(!printed.contains("hunter22"));
        assert!(printed.contains("<redacted>"));
    }

    #[test]
    fn test_client_trims_base_url() {
        let client = DataSourceClient::new(&SourceConfig::new("https://cgm.example.com/", "x")).unwrap();
        assert_eq!(client.base_url(), "https://cgm.example.com");
    }
}
