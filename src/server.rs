//! Axum router for the gateway's operational surface.
//!
//! The [`app`] function wires the liveness probe, the deep health check and
//! the Prometheus endpoint, and returns a ready-to-serve [`axum::Router`].
//! Object traffic does not go through HTTP here: the object handlers call
//! the gateway directly.

use axum::{
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::context::RequestContext;
use crate::metrics::{metrics_handler, metrics_middleware};
use crate::AppState;

/// Header carrying an upstream request-id chain (`a:b:c`).
pub const REQUEST_UIDS_HEADER: &str = "x-request-uids";

/// Header carrying this request's own id on responses.
pub const REQUEST_ID_HEADER: &str = "x-amz-request-id";

/// Build the axum [`Router`].
///
/// The returned router is ready to be passed to `axum::serve`.
pub fn app(state: Arc<AppState>) -> Router {
    let mut router = Router::new()
        // Liveness: the process is up.
        .route("/health", get(health_check))
        // Readiness: probe the configured locations.
        .route("/_/healthcheck/deep", get(deep_health_check));

    if state.config.observability.metrics {
        router = router.route("/metrics", get(metrics_handler));
    }

    router
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        // metrics_middleware is outermost (captures full request lifecycle).
        .layer(middleware::from_fn(metrics_middleware))
}

/// `GET /health` -- always `{"status":"ok"}`.
async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "application/json")],
        r#"{"status":"ok"}"#,
    )
}

/// `GET /_/healthcheck/deep` -- per-location health report.
///
/// Answers 503 when every reported location is in error, 200 otherwise.
async fn deep_health_check(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let ctx = headers
        .get(REQUEST_UIDS_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(RequestContext::from_serialized_uids)
        .unwrap_or_default();

    let report = state.gateway.healthcheck(&ctx).await;

    let all_failed = !report.is_empty() && report.values().all(|h| h.is_error());
    let status = if all_failed {
        warn!(locations = report.len(), "every location failed its health check");
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    let mut response = (status, Json(report)).into_response();
    if let Ok(value) = HeaderValue::from_str(ctx.request_id()) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}
