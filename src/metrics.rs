//! Prometheus metrics for ferrylog.
//!
//! Installs a global Prometheus recorder using `metrics-exporter-prometheus`,
//! defines metric name constants, provides a Tower-compatible middleware for
//! HTTP request durations, and exposes the `/metrics` endpoint handler.
//!
//! The `metrics` facade is a no-op until a recorder is installed, so
//! the coordinator and directory record transitions unconditionally
//! and stay testable without any observability wiring.

use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Instant;

// -- Metric name constants ----------------------------------------------------

/// HTTP request duration in seconds (histogram). Labels: method, path, status.
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "ferrylog_http_request_duration_seconds";

/// Lease state transitions (counter). Labels: state, cause.
pub const SEGMENT_STATE_TRANSITIONS_TOTAL: &str = "ferrylog_segment_state_transitions_total";

/// Gossip delegate callback invocations (counter). Labels: method.
pub const DELEGATE_INVOCATIONS_TOTAL: &str = "ferrylog_cluster_delegate_invocations_total";

// -- Global recorder installation ---------------------------------------------

/// Singleton handle to the Prometheus recorder.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the global Prometheus metrics recorder. Idempotent -- safe
/// to call multiple times. Returns a reference to the global handle.
pub fn init_metrics() -> &'static PrometheusHandle {
    PROMETHEUS_HANDLE.get_or_init(|| {
        PrometheusBuilder::new()
            .install_recorder()
            .expect("failed to install Prometheus recorder")
    })
}

/// Register metric descriptions with the global recorder. Call once
/// after [`init_metrics`].
pub fn describe_metrics() {
    describe_histogram!(
        HTTP_REQUEST_DURATION_SECONDS,
        "HTTP request duration in seconds"
    );
    describe_counter!(
        SEGMENT_STATE_TRANSITIONS_TOTAL,
        "Lease state transitions by new state and cause"
    );
    describe_counter!(
        DELEGATE_INVOCATIONS_TOTAL,
        "Gossip delegate callback invocations by method"
    );
}

// -- Recording helpers --------------------------------------------------------

/// Count one lease state transition into `state`, attributed to `cause`
/// (`"request"` or `"timeout"`).
pub fn record_segment_transition(state: &'static str, cause: &'static str) {
    counter!(SEGMENT_STATE_TRANSITIONS_TOTAL, "state" => state, "cause" => cause).increment(1);
}

/// Count one gossip delegate callback invocation.
pub fn record_delegate_invocation(method: &'static str) {
    counter!(DELEGATE_INVOCATIONS_TOTAL, "method" => method).increment(1);
}

// -- Metrics middleware -------------------------------------------------------

/// Axum middleware that observes the duration histogram for every
/// request, labeled by method, path, and numeric status code.
///
/// Excludes `/metrics` from self-instrumentation. Paths carry no
/// per-request components (lease ids travel in the query string), so
/// the label set stays bounded without normalization.
pub async fn metrics_middleware(
    req: Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Response {
    if req.uri().path() == "/metrics" {
        return next.run(req).await;
    }

    let method = req.method().to_string();
    let path = req.uri().path().to_string();
    let start = Instant::now();
    let response = next.run(req).await;
    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    histogram!(HTTP_REQUEST_DURATION_SECONDS, "method" => method, "path" => path, "status" => status)
        .record(duration);

    response
}

// -- Metrics endpoint handler -------------------------------------------------

/// `GET /metrics` -- Render Prometheus exposition format text.
pub async fn metrics_handler() -> impl IntoResponse {
    let body = match PROMETHEUS_HANDLE.get() {
        Some(handle) => handle.render(),
        None => String::new(),
    };
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        body,
    )
}
