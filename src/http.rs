//! HTTP Server for Health and Metrics Endpoints
//!
//! Admin surface of the relay, separate from the chat port.

use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};

use crate::metrics::ChatMetrics;
use crate::registry::SessionRegistry;

/// Shared state for HTTP handlers.
#[derive(Clone)]
pub struct HttpState {
    pub metrics: ChatMetrics,
    pub metrics_token: Option<String>,
    pub registry: Arc<SessionRegistry>,
}

fn bearer_matches(request: &Request<axum::body::Body>, expected: &str) -> bool {
    request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .is_some_and(|token| token == expected)
}

/// Middleware to check bearer token for metrics endpoint.
async fn metrics_auth_middleware(
    State(state): State<HttpState>,
    request: Request<axum::body::Body>,
    next: Next,
) -> Response {
    if request.uri().path() == "/metrics" {
        if let Some(ref expected_token) = state.metrics_token {
            if !bearer_matches(&request, expected_token) {
                return (
                    StatusCode::UNAUTHORIZED,
                    [(header::WWW_AUTHENTICATE, "Bearer")],
                    "Unauthorized",
                )
                    .into_response();
            }
        }
    }

    next.run(request).await
}

/// Creates the HTTP router with health and metrics endpoints.
pub fn create_router(state: HttpState) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .route("/", get(root_handler))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            metrics_auth_middleware,
        ))
        .with_state(state)
}

/// Root handler - returns basic info.
async fn root_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "service": "chat-relay",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": ["/health", "/metrics"]
    }))
}

/// Health check - always 200 while the process is serving.
async fn health_handler(State(state): State<HttpState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "sessions": state.registry.len(),
        "connections": state.metrics.connections_active.get(),
    }))
}

async fn metrics_handler(State(state): State<HttpState>) -> impl IntoResponse {
    let metrics_text = state.metrics.encode();

    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        metrics_text,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SessionHandle;
    use axum::body::Body;
    use tower::ServiceExt;

    fn create_test_state(token: Option<&str>) -> HttpState {
        HttpState {
            metrics: ChatMetrics::new(),
            metrics_token: token.map(str::to_string),
            registry: Arc::new(SessionRegistry::new()),
        }
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let app = create_router(create_test_state(None));
        let response = app.oneshot(get_request("/metrics")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("chat_connections_total"));
    }

    #[tokio::test]
    async fn test_health_reports_sessions() {
        let state = create_test_state(None);
        let (handle, _rx) = SessionHandle::channel(1);
        state.registry.register("alice", handle).unwrap();

        let app = create_router(state);
        let response = app.oneshot(get_request("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["sessions"], 1);
    }

    #[tokio::test]
    async fn test_metrics_requires_token_when_configured() {
        let app = create_router(create_test_state(Some("s3cret")));

        let response = app.clone().oneshot(get_request("/metrics")).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let authorized = Request::builder()
            .uri("/metrics")
            .header(header::AUTHORIZATION, "Bearer s3cret")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(authorized).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // Health stays open
        let response = app.oneshot(get_request("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
