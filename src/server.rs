//! Axum router construction and lease-protocol route mapping.
//!
//! The [`app`] function returns a ready-to-serve [`axum::Router`].
//!
//! The lease protocol distinguishes operations by exact (method, path)
//! pairs, and anything else -- including a wrong method on a known
//! path -- is a plain 404. A single fallback handler does that match;
//! axum routes exist only for the infrastructure endpoints that sit
//! outside the protocol.

use axum::{
    extract::State,
    http::{Request, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use std::collections::HashMap;
use std::sync::Arc;

use crate::handlers;
use crate::metrics::{metrics_handler, metrics_middleware};
use crate::AppState;

/// Build the axum [`Router`] with the lease protocol and
/// infrastructure routes.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        // Liveness probe (not part of the lease protocol).
        .route("/health", get(health_check))
        // Prometheus metrics endpoint.
        .route("/metrics", get(metrics_handler))
        // Everything else is matched exactly, or 404s.
        .fallback(dispatch)
        .with_state(state)
        // Outermost layer so it captures the full request lifecycle.
        .layer(middleware::from_fn(metrics_middleware))
}

/// `GET /health` -- Returns `{"status": "ok"}` with 200 OK.
async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "application/json")],
        r#"{"status":"ok"}"#,
    )
}

/// Dispatch on exact (method, path) pairs.
async fn dispatch(
    State(state): State<Arc<AppState>>,
    req: Request<axum::body::Body>,
) -> Response {
    let query = parse_query(req.uri().query());
    match (req.method().as_str(), req.uri().path()) {
        ("GET", "/next") => handlers::lease::next(state).await.into_response(),
        ("GET", "/read") => handlers::lease::read(state, &query).await.into_response(),
        ("POST", "/commit") => handlers::lease::commit(state, &query).await.into_response(),
        ("POST", "/failed") => handlers::lease::failed(state, &query).await.into_response(),
        ("GET", "/_segmentstatus") => handlers::debug::segment_status(state)
            .await
            .into_response(),
        ("GET", "/_clusterstate") => handlers::debug::cluster_state(state).await,
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Parse a raw query string into a map. Parameters without a value
/// (`?id`) map to the empty string.
fn parse_query(raw: Option<&str>) -> HashMap<String, String> {
    let mut map = HashMap::new();
    if let Some(qs) = raw {
        for part in qs.split('&') {
            if let Some((k, v)) = part.split_once('=') {
                map.insert(k.to_string(), v.to_string());
            } else if !part.is_empty() {
                map.insert(part.to_string(), String::new());
            }
        }
    }
    map
}
