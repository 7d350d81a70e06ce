//! JSON status API for a running engine.
//!
//! Exposes the current snapshot, snooze controls and a refresh trigger over
//! HTTP, plus a WebSocket stream of snapshots and alarms.

pub mod config;
pub mod handlers;
pub mod router;
pub mod websocket;

// Re-export commonly used items
pub use config::WebConfig;
pub use router::{create_app, AppState};
pub use websocket::StreamMessage;

use tracing::info;

use crate::engine::EngineHandle;
use crate::error::{MonitorError, Result};

/// Serve the status API until the listener fails.
pub async fn start_web_server(config: WebConfig, handle: EngineHandle) -> Result<()> {
    let addr = config.bind_address()?;
    let app = create_app(&config, handle);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| MonitorError::web_server_error(format!("Failed to bind to address: {}", e)))?;

    info!("Status API listening on http://{}", addr);
    info!("WebSocket endpoint: ws://{}/ws", addr);

    axum::serve(listener, app)
        .await
        .map_err(|e| MonitorError::web_server_error(format!("Server error: {}", e)))?;

    Ok(())
}
