//! HTTP surface of the relay port.
//!
//! WebSocket sessions upgrade on `/`. Browsers also hit the port with
//! preflights and health checks; those are answered here behind the same
//! origin guard.

use std::net::SocketAddr;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, State};
use axum::http::header::ORIGIN;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{Json, Response};
use axum::routing::get;
use axum::{middleware, Router};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower_http::trace::TraceLayer;

use crate::cors;
use crate::hub::{HubHandle, HubStats};
use crate::listener;

/// Reported in the health body.
pub const SERVICE_NAME: &str = "app-bridge-relay";

/// Shared state accessible from the handlers.
#[derive(Clone)]
pub(crate) struct RelayState {
    pub hub: HubHandle,
    pub shutdown: CancellationToken,
    /// Live sessions; the server waits on it before handing back the registry.
    pub sessions: TaskTracker,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    #[serde(flatten)]
    stats: HubStats,
}

/// Build the router with all routes.
pub(crate) fn router(state: RelayState) -> Router {
    Router::new()
        .route("/", get(upgrade))
        .route("/health", get(health))
        .fallback(not_found)
        .layer(middleware::from_fn(cors::guard))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /health
async fn health(State(state): State<RelayState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: SERVICE_NAME,
        stats: state.hub.stats().await.unwrap_or_default(),
    })
}

async fn not_found() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({"error": "Endpoint not found"})),
    )
}

/// GET / with `Upgrade: websocket`. The origin has already passed
/// [`cors::guard`] by the time this runs.
async fn upgrade(
    State(state): State<RelayState>,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let origin = headers
        .get(ORIGIN)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    let session = state.sessions.token();

    ws.on_upgrade(move |socket| async move {
        listener::serve_session(socket, remote_addr, origin, state.hub, state.shutdown).await;
        drop(session);
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::header::{ACCESS_CONTROL_ALLOW_ORIGIN, VARY};
    use axum::http::{Method, Request};
    use tokio::sync::mpsc;
    use tower::ServiceExt;

    use crate::hub;
    use crate::protocol::{ClientEvent, ConnectionId};
    use crate::registry::ConnectionRegistry;

    fn make_state() -> RelayState {
        let (hub, _task) = hub::spawn(ConnectionRegistry::new());
        RelayState {
            hub,
            shutdown: CancellationToken::new(),
            sessions: TaskTracker::new(),
        }
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_reports_routing_table() {
        let state = make_state();
        let (tx, _rx) = mpsc::unbounded_channel();
        let id = ConnectionId::from("panel");
        state.hub.attach(id.clone(), tx).await;
        state
            .hub
            .inbound(
                id,
                ClientEvent::Register {
                    application: "photoshop".into(),
                },
            )
            .await;

        let response = router(state)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(ACCESS_CONTROL_ALLOW_ORIGIN).is_none());
        let body = body_json(response).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["service"], SERVICE_NAME);
        assert_eq!(body["connections"], 1);
        assert_eq!(body["channels"], 1);
    }

    #[tokio::test]
    async fn head_health_is_ok() {
        let response = router(make_state())
            .oneshot(
                Request::builder()
                    .method(Method::HEAD)
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_path_is_not_found() {
        let response = router(make_state())
            .oneshot(Request::builder().uri("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["error"], "Endpoint not found");
    }

    #[tokio::test]
    async fn preflight_from_loopback_is_empty_success() {
        let response = router(make_state())
            .oneshot(
                Request::builder()
                    .method(Method::OPTIONS)
                    .uri("/upload")
                    .header("Origin", "http://localhost:5173")
                    .header("Access-Control-Request-Method", "POST")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(
            response.headers()[ACCESS_CONTROL_ALLOW_ORIGIN],
            "http://localhost:5173"
        );
        assert_eq!(response.headers()[VARY], "Origin");
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert!(bytes.is_empty());
    }

    #[tokio::test]
    async fn loopback_origin_gets_reflected_headers_on_health() {
        let response = router(make_state())
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .header("Origin", "http://127.0.0.1:8080")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[ACCESS_CONTROL_ALLOW_ORIGIN],
            "http://127.0.0.1:8080"
        );
    }

    #[tokio::test]
    async fn remote_origin_gets_forbidden_without_cors_headers() {
        for origin in ["https://evil.example", "http://127.evil.com"] {
            let response = router(make_state())
                .oneshot(
                    Request::builder()
                        .method(Method::OPTIONS)
                        .uri("/")
                        .header("Origin", origin)
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::FORBIDDEN, "{origin}");
            assert!(response.headers().get(ACCESS_CONTROL_ALLOW_ORIGIN).is_none());
            assert!(response.headers().get(VARY).is_none());
        }
    }
}
