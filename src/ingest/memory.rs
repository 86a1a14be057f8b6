//! In-memory segment log.
//!
//! Segments are opaque byte blobs held in a FIFO pool behind an async
//! mutex. A failed segment goes back to the front of the pool, so the
//! next reservation sees it again before anything younger.

use bytes::Bytes;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::log::{LogError, ReadSegment, SegmentLog};

/// In-memory FIFO segment log.
#[derive(Clone, Default)]
pub struct MemorySegmentLog {
    pool: Arc<Mutex<VecDeque<Bytes>>>,
}

impl MemorySegmentLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a segment produced upstream.
    pub async fn push(&self, data: Bytes) {
        self.pool.lock().await.push_back(data);
    }

    /// Number of unclaimed segments.
    pub async fn len(&self) -> usize {
        self.pool.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.pool.lock().await.is_empty()
    }
}

impl SegmentLog for MemorySegmentLog {
    fn oldest(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn ReadSegment>, LogError>> + Send + '_>> {
        Box::pin(async move {
            let mut pool = self.pool.lock().await;
            let data = pool.pop_front().ok_or(LogError::NoSegmentsAvailable)?;
            Ok(Box::new(MemorySegment {
                data,
                pool: Arc::clone(&self.pool),
                state: Mutex::new(SegmentState::Reserved),
            }) as Box<dyn ReadSegment>)
        })
    }
}

/// Lifecycle of a reserved in-memory segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SegmentState {
    Reserved,
    Committed,
    Failed,
}

impl SegmentState {
    fn describe(self) -> &'static str {
        match self {
            SegmentState::Reserved => "reserved",
            SegmentState::Committed => "committed",
            SegmentState::Failed => "failed",
        }
    }
}

struct MemorySegment {
    data: Bytes,
    pool: Arc<Mutex<VecDeque<Bytes>>>,
    state: Mutex<SegmentState>,
}

impl ReadSegment for MemorySegment {
    fn read(&self) -> Pin<Box<dyn Future<Output = anyhow::Result<Bytes>> + Send + '_>> {
        Box::pin(async move { Ok(self.data.clone()) })
    }

    fn commit(&self) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            if *state != SegmentState::Reserved {
                anyhow::bail!("segment is already {}", state.describe());
            }
            *state = SegmentState::Committed;
            Ok(())
        })
    }

    fn failed(&self) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            if *state != SegmentState::Reserved {
                anyhow::bail!("segment is already {}", state.describe());
            }
            *state = SegmentState::Failed;
            // Oldest-first: a failed segment outranks everything younger.
            self.pool.lock().await.push_front(self.data.clone());
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seeded(segments: &[&str]) -> MemorySegmentLog {
        let log = MemorySegmentLog::new();
        for s in segments {
            log.push(Bytes::copy_from_slice(s.as_bytes())).await;
        }
        log
    }

    #[tokio::test]
    async fn oldest_reserves_in_fifo_order() {
        let log = seeded(&["a", "b"]).await;

        let first = log.oldest().await.unwrap();
        assert_eq!(first.read().await.unwrap(), Bytes::from("a"));
        let second = log.oldest().await.unwrap();
        assert_eq!(second.read().await.unwrap(), Bytes::from("b"));

        assert!(matches!(
            log.oldest().await,
            Err(LogError::NoSegmentsAvailable)
        ));
    }

    #[tokio::test]
    async fn failed_returns_segment_to_the_front() {
        let log = seeded(&["a", "b"]).await;

        let first = log.oldest().await.unwrap();
        first.failed().await.unwrap();

        let again = log.oldest().await.unwrap();
        assert_eq!(again.read().await.unwrap(), Bytes::from("a"));
    }

    #[tokio::test]
    async fn commit_removes_segment_permanently() {
        let log = seeded(&["a"]).await;

        let segment = log.oldest().await.unwrap();
        segment.commit().await.unwrap();

        assert!(log.is_empty().await);
    }

    #[tokio::test]
    async fn terminal_transitions_are_exclusive() {
        let log = seeded(&["a", "b"]).await;

        let committed = log.oldest().await.unwrap();
        committed.commit().await.unwrap();
        assert!(committed.failed().await.is_err());
        assert!(committed.commit().await.is_err());

        let failed = log.oldest().await.unwrap();
        failed.failed().await.unwrap();
        assert!(failed.commit().await.is_err());
        assert!(failed.failed().await.is_err());
    }
}
