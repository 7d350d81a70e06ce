//! HTTP handlers for the status API.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, info};

use crate::engine::{AlarmKind, EngineSnapshot, SnoozeEntry};
use crate::error::MonitorError;
use crate::web::router::AppState;

type ApiError = (StatusCode, Json<Value>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(json!({ "error": message.into() })))
}

fn engine_unavailable(e: MonitorError) -> ApiError {
    error!("Engine request failed: {}", e);
    api_error(StatusCode::SERVICE_UNAVAILABLE, e.to_string())
}

/// Requests the engine refused as invalid are the caller's fault.
fn engine_rejected(e: MonitorError) -> ApiError {
    match e {
        MonitorError::Config(message) => api_error(StatusCode::BAD_REQUEST, message),
        other => engine_unavailable(other),
    }
}

fn parse_kind(kind: &str) -> Result<AlarmKind, ApiError> {
    kind.parse::<AlarmKind>()
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))
}

/// Body of a snooze request.
#[derive(Debug, Deserialize)]
pub struct SnoozeRequest {
    pub minutes: i64,
}

/// Current engine snapshot.
pub async fn get_status(State(state): State<AppState>) -> Json<EngineSnapshot> {
    Json(state.handle.snapshot())
}

/// Health check endpoint. Answers 503 once the engine task has stopped.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let snapshot = state.handle.snapshot();
    let (status, label) = if state.handle.is_running() {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "stopped")
    };
    let body = json!({
        "status": label,
        "service": "glucowatch",
        "version": env!("CARGO_PKG_VERSION"),
        "mode": snapshot.mode,
        "consecutive_failures": snapshot.state.consecutive_failure_count,
        "timestamp": chrono::Utc::now().to_rfc3339()
    });
    (status, Json(body))
}

/// Mute one alarm kind for the requested number of minutes.
pub async fn snooze_alarm(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    Json(request): Json<SnoozeRequest>,
) -> Result<Json<SnoozeEntry>, ApiError> {
    let kind = parse_kind(&kind)?;
    if request.minutes <= 0 {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "minutes must be positive",
        ));
    }

    let entry = state
        .handle
        .snooze(kind, request.minutes)
        .await
        .map_err(engine_rejected)?;
    info!("Snoozed {} for {} minutes via API", kind, request.minutes);
    Ok(Json(entry))
}

/// Lift a snooze early.
pub async fn clear_snooze(
    State(state): State<AppState>,
    Path(kind): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let kind = parse_kind(&kind)?;
    let cleared = state
        .handle
        .clear_snooze(kind)
        .await
        .map_err(engine_unavailable)?;
    Ok(Json(json!({ "kind": kind, "cleared": cleared })))
}

/// Ask the engine to fetch immediately.
pub async fn refresh(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    state.handle.refresh().map_err(engine_unavailable)?;
    Ok(StatusCode::ACCEPTED)
}
