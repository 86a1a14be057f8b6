//! Debug endpoints.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::sync::Arc;

use crate::errors::IngestError;
use crate::AppState;

/// `GET /_segmentstatus` -- plain-text dump of the pending-lease table.
pub async fn segment_status(state: Arc<AppState>) -> Result<Response, IngestError> {
    let status = state.coordinator.status().await?;
    Ok(status.into_response())
}

/// `GET /_clusterstate` -- JSON rendering of the peer directory state.
pub async fn cluster_state(state: Arc<AppState>) -> Response {
    (
        StatusCode::OK,
        [("content-type", "application/json; charset=utf-8")],
        state.peer.state().to_string(),
    )
        .into_response()
}
