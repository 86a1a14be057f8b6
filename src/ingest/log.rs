//! Abstract segment log contract.
//!
//! The durable log itself (segment files, rotation, compaction) is a
//! separate concern. The coordinator only needs the capability set
//! below: reserve the oldest unclaimed segment, then drive that
//! reservation to exactly one of committed or failed.

use bytes::Bytes;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Error returned by [`SegmentLog::oldest`].
#[derive(Debug, Error)]
pub enum LogError {
    /// The log has no unclaimed segments.
    #[error("no segments available")]
    NoSegmentsAvailable,

    /// Any other log failure.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// A segment reserved from the log.
///
/// The payload is readable once. `commit` and `failed` are terminal
/// and mutually exclusive; after `failed` the log may hand the same
/// segment out again through [`SegmentLog::oldest`].
pub trait ReadSegment: Send + Sync + 'static {
    /// Read the segment payload.
    fn read(&self) -> Pin<Box<dyn Future<Output = anyhow::Result<Bytes>> + Send + '_>>;

    /// Mark the segment durably consumed.
    fn commit(&self) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>>;

    /// Return the segment to the pool for reconsumption.
    fn failed(&self) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>>;
}

/// Async segment log contract.
///
/// `oldest` must never hand the same segment to two callers at once: a
/// reservation stays exclusive until `commit` or `failed` resolves it.
pub trait SegmentLog: Send + Sync + 'static {
    /// Reserve the oldest unclaimed segment.
    fn oldest(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn ReadSegment>, LogError>> + Send + '_>>;
}
