//! Status API router and middleware setup.

use axum::{
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::engine::EngineHandle;
use crate::web::config::WebConfig;
use crate::web::handlers;
use crate::web::websocket;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub handle: EngineHandle,
}

/// Create the axum application with all routes and middleware.
pub fn create_app(config: &WebConfig, handle: EngineHandle) -> Router {
    let mut app = Router::new()
        .route("/api/status", get(handlers::get_status))
        .route("/api/health", get(handlers::health_check))
        .route(
            "/api/snooze/:kind",
            post(handlers::snooze_alarm).delete(handlers::clear_snooze),
        )
        .route("/api/refresh", post(handlers::refresh))
        .route("/ws", get(websocket::websocket_handler))
        .with_state(AppState { handle });

    if config.enable_cors {
        app = app.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );
    }

    app.layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineBuilder, EngineConfig};
    use crate::error::FetchError;
    use crate::source::{DataSource, DeviceStatus, Profile, Reading, TreatmentEvent, TrendDirection};
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::Value;
    use std::sync::Arc;
    use tower::ServiceExt;

    struct SteadySource;

    #[async_trait]
    impl DataSource for SteadySource {
        async fn fetch_latest(&self) -> Result<Reading, FetchError> {
            Ok(Reading::new(120, TrendDirection::Flat, chrono::Utc::now()))
        }

        async fn fetch_history(&self, _hours: u32) -> Result<Vec<Reading>, FetchError> {
            Err(FetchError::EmptyResult)
        }

        async fn fetch_events(&self, _hours: u32) -> Result<Vec<TreatmentEvent>, FetchError> {
            Ok(Vec::new())
        }

        async fn fetch_device_status(&self) -> Result<DeviceStatus, FetchError> {
            Err(FetchError::EmptyResult)
        }

        async fn fetch_profile(&self) -> Result<Profile, FetchError> {
            Err(FetchError::EmptyResult)
        }
    }

    fn test_app() -> Router {
        let (handle, _task) = EngineBuilder::new(EngineConfig::default(), Arc::new(SteadySource))
            .spawn()
            .unwrap();
        create_app(&WebConfig::default(), handle)
    }

    fn snooze_request(kind: &str, body: &'static str) -> Request<Body> {
        Request::post(format!("/api/snooze/{}", kind))
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let response = test_app()
            .oneshot(Request::get("/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["service"], "glucowatch");
    }

    #[tokio::test]
    async fn test_health_reports_stopped_engine() {
        let (handle, task) = EngineBuilder::new(EngineConfig::default(), Arc::new(SteadySource))
            .spawn()
            .unwrap();
        let app = create_app(&WebConfig::default(), handle.clone());
        assert!(handle.is_running());

        handle.shutdown().unwrap();
        task.await.unwrap();
        assert!(!handle.is_running());

        let response = app
            .oneshot(Request::get("/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body_json(response).await["status"], "stopped");
    }

    #[tokio::test]
    async fn test_status_endpoint() {
        let response = test_app()
            .oneshot(Request::get("/api/status").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["mode"], "normal");
        assert!(body["state"].is_object());
    }

    #[tokio::test]
    async fn test_snooze_endpoint() {
        let request = Request::post("/api/snooze/high")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"minutes": 30}"#))
            .unwrap();
        let response = test_app().oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["alarm_kind"], "high");
        assert_eq!(body["times_snoozed"], 1);
    }

    #[tokio::test]
    async fn test_snooze_rejects_unknown_kind_and_bad_duration() {
        let app = test_app();

        let unknown = Request::post("/api/snooze/sideways")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"minutes": 30}"#))
            .unwrap();
        let response = app.clone().oneshot(unknown).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let negative = snooze_request("low", r#"{"minutes": -5}"#);
        let response = app.clone().oneshot(negative).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_oversized_snooze_is_rejected_and_engine_survives() {
        let app = test_app();

        let huge = snooze_request("high", r#"{"minutes": 1000000000000}"#);
        let response = app.clone().oneshot(huge).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_json(response).await["error"]
            .as_str()
            .unwrap()
            .contains("out of range"));

        let response = app
            .clone()
            .oneshot(snooze_request("high", r#"{"minutes": 30}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(Request::get("/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_clear_snooze_and_refresh() {
        let app = test_app();

        let response = app
            .clone()
            .oneshot(Request::delete("/api/snooze/low").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["cleared"], false);

        let response = app
            .oneshot(Request::post("/api/refresh").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }
}
