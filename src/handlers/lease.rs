//! Lease-protocol handlers: the consumer-facing reserve / read /
//! acknowledge surface.
//!
//! Each handler hands its operation to the coordinator and blocks on
//! the reply, so every table transition runs on the dispatcher. The
//! one exception is the segment byte copy in [`read`], which runs
//! here after the dispatcher has marked the lease as reading.

use axum::body::Body;
use axum::response::{IntoResponse, Response};
use std::collections::HashMap;
use std::sync::Arc;

use crate::errors::IngestError;
use crate::AppState;

/// `GET /next` -- reserve the oldest available segment, answering
/// with a fresh lease id as the plain-text body.
pub async fn next(state: Arc<AppState>) -> Result<Response, IngestError> {
    let id = state.coordinator.next().await?;
    Ok(id.into_response())
}

/// `GET /read?id=` -- stream the reserved segment's bytes.
///
/// The lease deadline keeps ticking while the body is in flight; a
/// reader slower than the timeout loses its lease to the sweeper even
/// mid-copy.
pub async fn read(
    state: Arc<AppState>,
    query: &HashMap<String, String>,
) -> Result<Response, IngestError> {
    let id = query.get("id").map(String::as_str).unwrap_or_default();
    let segment = state.coordinator.read(id).await?;
    let data = segment.read().await.map_err(IngestError::Log)?;
    Ok(Body::from(data).into_response())
}

/// `POST /commit?id=` -- acknowledge a successful read.
pub async fn commit(
    state: Arc<AppState>,
    query: &HashMap<String, String>,
) -> Result<Response, IngestError> {
    let id = query.get("id").map(String::as_str).unwrap_or_default();
    state.coordinator.commit(id).await?;
    Ok("Commit OK".into_response())
}

/// `POST /failed?id=` -- abandon the lease, returning the segment for
/// reconsumption.
pub async fn failed(
    state: Arc<AppState>,
    query: &HashMap<String, String>,
) -> Result<Response, IngestError> {
    let id = query.get("id").map(String::as_str).unwrap_or_default();
    state.coordinator.failed(id).await?;
    Ok("Failed OK".into_response())
}
