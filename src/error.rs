//! Error handling for the glucowatch monitoring crate.

/// A specialized `Result` type for glucowatch operations.
pub type Result<T> = std::result::Result<T, MonitorError>;

/// Failure of a single request against the upstream data source.
///
/// Every variant is recoverable: the scheduler counts it and retries at the
/// next poll tick.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// The request never reached the server (DNS, connect, TLS, reset)
    #[error("network unavailable: {0}")]
    NetworkUnavailable(String),

    /// No response within the bounded wait
    #[error("request timed out")]
    Timeout,

    /// Server answered with a non-success status other than 401
    #[error("unexpected HTTP status {0}")]
    HttpStatus(u16),

    /// Response body could not be decoded
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// Response decoded but held no usable records
    #[error("empty result")]
    EmptyResult,

    /// Server rejected the api-secret (HTTP 401)
    #[error("authentication rejected")]
    AuthenticationRejected,
}

impl FetchError {
    /// Create a new malformed payload error
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedPayload(msg.into())
    }

    /// Map a non-success HTTP status into the taxonomy.
    pub fn from_status(code: u16) -> Self {
        match code {
            401 => Self::AuthenticationRejected,
            code => Self::HttpStatus(code),
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_decode() {
            Self::MalformedPayload(err.to_string())
        } else if let Some(status) = err.status() {
            Self::from_status(status.as_u16())
        } else {
            Self::NetworkUnavailable(err.to_string())
        }
    }
}

/// The main error type for glucowatch operations.
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Upstream fetch failed
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// HTTP client could not be constructed
    #[error("HTTP client error: {0}")]
    Http(String),

    /// Status API server error
    #[error("Web server error: {0}")]
    WebServer(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// The engine task is gone or refused a command
    #[error("Engine error: {0}")]
    Engine(String),
}

impl MonitorError {
    /// Create a new HTTP client error
    pub fn http_error(msg: impl Into<String>) -> Self {
        Self::Http(msg.into())
    }

    /// Create a new web server error
    pub fn web_server_error(msg: impl Into<String>) -> Self {
        Self::WebServer(msg.into())
    }

    /// Create a new configuration error
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new engine error
    pub fn engine_error(msg: impl Into<String>) -> Self {
        Self::Engine(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(FetchError::from_status(401), FetchError::AuthenticationRejected);
        assert_eq!(FetchError::from_status(503), FetchError::HttpStatus(503));
    }

    #[test]
    fn test_error_display() {
        let err = MonitorError::config_error("low must be below high");
        assert_eq!(err.to_string(), "Configuration error: low must be below high");

        let err: MonitorError = FetchError::Timeout.into();
        assert_eq!(err.to_string(), "Fetch error: request timed out");
    }
}
