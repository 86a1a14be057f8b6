//! Lease-protocol error types.
//!
//! Every variant maps to the protocol's HTTP status contract. The
//! enum implements [`axum::response::IntoResponse`] so handlers can
//! simply return `Err(IngestError::UnknownLease)`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Errors surfaced by the lease protocol.
#[derive(Debug, Error)]
pub enum IngestError {
    /// The segment log has nothing unclaimed (`/next`).
    #[error("no segments available")]
    NoSegmentsAvailable,

    /// No pending lease carries the requested id.
    #[error("unknown lease id")]
    UnknownLease,

    /// A `/read` raced one already in flight for the same lease.
    #[error("another client is already reading this segment")]
    AlreadyReading,

    /// `/commit` arrived before `/read`.
    #[error("segment hasn't been read yet; can't commit")]
    NotYetRead,

    /// The coordinator has been stopped.
    #[error("ingest coordinator is stopped")]
    Stopped,

    /// Segment log failure, surfaced verbatim.
    #[error("{0}")]
    Log(#[from] anyhow::Error),
}

impl IngestError {
    /// HTTP status for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            IngestError::NoSegmentsAvailable | IngestError::UnknownLease => StatusCode::NOT_FOUND,
            IngestError::NotYetRead => StatusCode::PRECONDITION_REQUIRED,
            IngestError::AlreadyReading | IngestError::Stopped | IngestError::Log(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for IngestError {
    fn into_response(self) -> Response {
        (self.status_code(), self.to_string()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_follows_the_protocol() {
        assert_eq!(
            IngestError::NoSegmentsAvailable.status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            IngestError::UnknownLease.status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            IngestError::NotYetRead.status_code(),
            StatusCode::PRECONDITION_REQUIRED
        );
        assert_eq!(
            IngestError::AlreadyReading.status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            IngestError::Log(anyhow::anyhow!("disk full")).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn log_errors_surface_their_text() {
        let err = IngestError::Log(anyhow::anyhow!("disk full"));
        assert_eq!(err.to_string(), "disk full");
    }
}
