//! HTTP routes for the media node manager.
//!
//! Defines the Axum router and application state.

use crate::handlers;
use crate::manager::MediaNodeManager;
use crate::observability::{health_router, HealthState};
use axum::{
    routing::{delete, get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

/// Application state shared across the node handlers.
#[derive(Clone, Debug)]
pub struct AppState {
    pub manager: MediaNodeManager,
}

/// Build the application routes.
///
/// - `/health`, `/ready` - liveness and readiness
/// - `/metrics` - Prometheus scrape endpoint
/// - `/internal/v1/nodes/...` - infra callbacks, signaling events, operator drop
/// - TraceLayer for request logging
/// - 30 second request timeout
pub fn build_routes(
    state: Arc<AppState>,
    health: Arc<HealthState>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let node_routes = Router::new()
        .route("/internal/v1/nodes", post(handlers::launch_node))
        .route("/internal/v1/nodes/:id/ready", post(handlers::node_ready))
        .route("/internal/v1/nodes/:id/cancel", post(handlers::cancel_launch))
        .route(
            "/internal/v1/nodes/:id/confirmed",
            post(handlers::confirm_removal),
        )
        .route(
            "/internal/v1/nodes/:id/usages",
            post(handlers::register_usage),
        )
        .route(
            "/internal/v1/nodes/:id/usages/:connection_id",
            delete(handlers::deregister_usage),
        )
        .route("/internal/v1/nodes/:id/drop", post(handlers::drop_idle_node))
        .with_state(state);

    // Metrics route with its own state
    let metrics_routes = Router::new()
        .route("/metrics", get(handlers::metrics_handler))
        .with_state(metrics_handle);

    // Layer order (bottom-to-top execution):
    // 1. TimeoutLayer - Timeout the request (innermost)
    // 2. TraceLayer - Log request details
    node_routes
        .merge(metrics_routes)
        .merge(health_router(health))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::provisioner::mock::MockProvisioner;
    use crate::reaper::IdlePolicy;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use tower::util::ServiceExt;

    fn app() -> (Router, MediaNodeManager) {
        let manager = MediaNodeManager::new(
            Arc::new(MockProvisioner::accepting()),
            IdlePolicy::new(chrono::Duration::seconds(60), None),
        );
        let state = Arc::new(AppState {
            manager: manager.clone(),
        });
        let handle = PrometheusBuilder::new().build_recorder().handle();
        (
            build_routes(state, Arc::new(HealthState::new()), handle),
            manager,
        )
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<&str>) -> (StatusCode, serde_json::Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("Failed to build request");

        let response = app
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to execute request");
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    #[test]
    fn test_app_state_is_clone() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<AppState>();
    }

    #[tokio::test]
    async fn test_usage_registration_flow() {
        let (app, manager) = app();
        manager.request_node("kms-1", chrono::Utc::now()).await.unwrap();

        let (status, _) = send(&app, "POST", "/internal/v1/nodes/kms-1/ready", None).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(
            &app,
            "POST",
            "/internal/v1/nodes/kms-1/usages",
            Some(r#"{"connection_id":"conn-1"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["usage_count"], 1);

        let (status, body) = send(&app, "DELETE", "/internal/v1/nodes/kms-1/usages/conn-1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["usage_count"], 0);
    }

    #[tokio::test]
    async fn test_errors_map_to_status_codes() {
        let (app, manager) = app();

        let (status, body) = send(
            &app,
            "POST",
            "/internal/v1/nodes/ghost/usages",
            Some(r#"{"connection_id":"conn-1"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "UNKNOWN_NODE");

        manager.request_node("kms-1", chrono::Utc::now()).await.unwrap();
        let (status, body) = send(
            &app,
            "POST",
            "/internal/v1/nodes/kms-1/usages",
            Some(r#"{"connection_id":"conn-1"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["code"], "INVALID_STATE");

        manager.node_ready("kms-1", chrono::Utc::now()).await.unwrap();
        manager
            .media_node_usage_registration("kms-1", "conn-1", chrono::Utc::now())
            .await
            .unwrap();
        let (status, body) = send(&app, "POST", "/internal/v1/nodes/kms-1/drop", None).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"]["code"], "NOT_IDLE");
    }

    #[tokio::test]
    async fn test_health_routes_are_mounted() {
        let (app, _) = app();

        let (status, _) = send(&app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = send(&app, "GET", "/ready", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
