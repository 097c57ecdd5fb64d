//! Prometheus metrics for the gateway.
//!
//! Installs a global Prometheus recorder using `metrics-exporter-prometheus`,
//! defines metric name constants, records per-backend operation outcomes,
//! provides an axum middleware for HTTP RED metrics, and exposes the
//! `/metrics` endpoint handler.
//!
//! Recording without an installed recorder is a no-op, so library users and
//! tests never need to call [`init_metrics`].

use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Instant;

// -- Metric name constants ----------------------------------------------------

/// Total HTTP requests (counter). Labels: method, path, status.
pub const HTTP_REQUESTS_TOTAL: &str = "multistore_http_requests_total";

/// HTTP request duration in seconds (histogram). Labels: method, path.
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "multistore_http_request_duration_seconds";

/// Total backend operations (counter). Labels: location, operation, outcome.
pub const BACKEND_OPERATIONS_TOTAL: &str = "multistore_backend_operations_total";

/// Backend operation duration in seconds (histogram). Labels: operation.
pub const BACKEND_OPERATION_DURATION_SECONDS: &str =
    "multistore_backend_operation_duration_seconds";

// -- Global recorder installation ---------------------------------------------

/// Singleton handle to the Prometheus recorder.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the global Prometheus metrics recorder. Idempotent -- safe to call
/// multiple times. Returns a reference to the global handle.
pub fn init_metrics() -> anyhow::Result<&'static PrometheusHandle> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle);
    }
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("failed to install Prometheus recorder: {e}"))?;
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle))
}

/// Register metric descriptions with the global recorder. Call once after
/// `init_metrics()`.
pub fn describe_metrics() {
    describe_counter!(HTTP_REQUESTS_TOTAL, "Total HTTP requests");
    describe_histogram!(
        HTTP_REQUEST_DURATION_SECONDS,
        "HTTP request duration in seconds"
    );
    describe_counter!(
        BACKEND_OPERATIONS_TOTAL,
        "Total backend operations by location, operation and outcome"
    );
    describe_histogram!(
        BACKEND_OPERATION_DURATION_SECONDS,
        "Backend operation duration in seconds"
    );
}

/// Record one dispatched backend operation.
pub fn record_backend_op(location: &str, operation: &'static str, ok: bool, duration: f64) {
    let outcome = if ok { "ok" } else { "error" };
    counter!(
        BACKEND_OPERATIONS_TOTAL,
        "location" => location.to_string(),
        "operation" => operation,
        "outcome" => outcome
    )
    .increment(1);
    histogram!(BACKEND_OPERATION_DURATION_SECONDS, "operation" => operation).record(duration);
}

// -- Metrics middleware -------------------------------------------------------

/// Axum middleware that records HTTP RED metrics for every request.
///
/// Excludes `/metrics` from self-instrumentation.
/// Must be the outermost layer so it captures the full request lifecycle.
pub async fn metrics_middleware(
    req: Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Response {
    // Do not instrument the metrics endpoint itself.
    if req.uri().path() == "/metrics" {
        return next.run(req).await;
    }

    let method = req.method().to_string();
    let path = normalize_path(req.uri().path());

    let start = Instant::now();
    let response = next.run(req).await;
    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    counter!(HTTP_REQUESTS_TOTAL, "method" => method.clone(), "path" => path.clone(), "status" => status).increment(1);
    histogram!(HTTP_REQUEST_DURATION_SECONDS, "method" => method, "path" => path).record(duration);

    response
}

// -- Path normalization -------------------------------------------------------

/// Normalize a request path for metric labels.
///
/// Known routes keep their path; anything else collapses to `/{other}`
/// so scanners cannot inflate label cardinality.
fn normalize_path(path: &str) -> String {
    match path {
        "/health" | "/_/healthcheck/deep" | "/metrics" => path.to_string(),
        _ => "/{other}".to_string(),
    }
}

// -- Metrics endpoint handler -------------------------------------------------

/// `GET /metrics` -- Render Prometheus exposition format text.
pub async fn metrics_handler() -> impl IntoResponse {
    let body = PROMETHEUS_HANDLE
        .get()
        .map(PrometheusHandle::render)
        .unwrap_or_default();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        body,
    )
}

// -- Tests --------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path_known_routes() {
        assert_eq!(normalize_path("/health"), "/health");
        assert_eq!(normalize_path("/_/healthcheck/deep"), "/_/healthcheck/deep");
        assert_eq!(normalize_path("/metrics"), "/metrics");
    }

    #[test]
    fn test_normalize_path_unknown() {
        assert_eq!(normalize_path("/"), "/{other}");
        assert_eq!(normalize_path("/my-bucket/key"), "/{other}");
        assert_eq!(normalize_path("/wp-admin.php"), "/{other}");
    }

    #[test]
    fn test_record_without_recorder_is_noop() {
        record_backend_op("us-east-1", "put", true, 0.01);
        record_backend_op("us-east-1", "get", false, 0.02);
    }
}
