//! The ingest coordinator: a single dispatcher task owning the
//! pending-lease table.
//!
//! Handlers never touch the table directly. Every protocol operation
//! goes down a capacity-1 channel and runs on the dispatcher in
//! arrival order, which makes lease transitions linearizable and keeps
//! the segment log single-caller. The dispatcher also owns the
//! once-per-second sweep that fails leases past their deadline, and
//! the shutdown path, so ticks interleave with requests instead of
//! racing them. The only lease work done outside the dispatcher is the
//! segment byte copy in `read`, after the lease has been marked as
//! reading.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::error;
use uuid::Uuid;

use crate::errors::IngestError;
use crate::ingest::log::{LogError, ReadSegment, SegmentLog};
use crate::metrics;

/// One outstanding segment reservation.
struct Lease {
    segment: Arc<dyn ReadSegment>,
    deadline: Instant,
    /// Wall-clock mirror of `deadline`, for the status dump.
    expires: SystemTime,
    reading: bool,
}

enum Command {
    Next {
        reply: oneshot::Sender<Result<String, IngestError>>,
    },
    Read {
        id: String,
        reply: oneshot::Sender<Result<Arc<dyn ReadSegment>, IngestError>>,
    },
    Commit {
        id: String,
        reply: oneshot::Sender<Result<(), IngestError>>,
    },
    Failed {
        id: String,
        reply: oneshot::Sender<Result<(), IngestError>>,
    },
    Status {
        reply: oneshot::Sender<String>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
}

/// Handle to the dispatcher task. Cheap to clone; all clones feed the
/// same serialization point.
#[derive(Clone)]
pub struct Coordinator {
    tx: mpsc::Sender<Command>,
}

impl Coordinator {
    /// Spawn the dispatcher. Leases expire `timeout` after `next`.
    pub fn start(log: Arc<dyn SegmentLog>, timeout: Duration) -> Self {
        let (tx, rx) = mpsc::channel(1);
        let dispatcher = Dispatcher {
            log,
            timeout,
            pending: HashMap::new(),
        };
        tokio::spawn(dispatcher.run(rx));
        Self { tx }
    }

    /// Reserve the oldest available segment under a fresh lease id.
    pub async fn next(&self) -> Result<String, IngestError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Next { reply })
            .await
            .map_err(|_| IngestError::Stopped)?;
        rx.await.map_err(|_| IngestError::Stopped)?
    }

    /// Mark the lease as reading and hand back its segment. The caller
    /// performs the byte copy itself, off the dispatcher.
    pub async fn read(&self, id: &str) -> Result<Arc<dyn ReadSegment>, IngestError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Read {
                id: id.to_string(),
                reply,
            })
            .await
            .map_err(|_| IngestError::Stopped)?;
        rx.await.map_err(|_| IngestError::Stopped)?
    }

    /// Acknowledge a successful read, committing the segment.
    pub async fn commit(&self, id: &str) -> Result<(), IngestError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Commit {
                id: id.to_string(),
                reply,
            })
            .await
            .map_err(|_| IngestError::Stopped)?;
        rx.await.map_err(|_| IngestError::Stopped)?
    }

    /// Abandon the lease, failing the segment back into the log.
    pub async fn failed(&self, id: &str) -> Result<(), IngestError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Failed {
                id: id.to_string(),
                reply,
            })
            .await
            .map_err(|_| IngestError::Stopped)?;
        rx.await.map_err(|_| IngestError::Stopped)?
    }

    /// Plain-text dump of the pending-lease table.
    pub async fn status(&self) -> Result<String, IngestError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Status { reply })
            .await
            .map_err(|_| IngestError::Stopped)?;
        rx.await.map_err(|_| IngestError::Stopped)
    }

    /// Stop the dispatcher, force-failing every pending lease. Returns
    /// once the table is empty and the task has exited; later calls on
    /// any handle observe [`IngestError::Stopped`].
    pub async fn stop(&self) {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Command::Stop { reply }).await.is_ok() {
            let _ = rx.await;
        }
    }
}

struct Dispatcher {
    log: Arc<dyn SegmentLog>,
    timeout: Duration,
    pending: HashMap<String, Lease>,
}

impl Dispatcher {
    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                cmd = rx.recv() => match cmd {
                    Some(Command::Stop { reply }) => {
                        self.shutdown_sweep().await;
                        let _ = reply.send(());
                        return;
                    }
                    Some(cmd) => self.handle(cmd).await,
                    // Every handle dropped: same terminal path as Stop.
                    None => {
                        self.shutdown_sweep().await;
                        return;
                    }
                },
                _ = ticker.tick() => self.sweep(Instant::now()).await,
            }
        }
    }

    /// Sweep with an artificially advanced clock so that every pending
    /// lease, however young, goes through the failed path.
    async fn shutdown_sweep(&mut self) {
        self.sweep(Instant::now() + self.timeout * 10).await;
    }

    async fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::Next { reply } => {
                let _ = reply.send(self.next().await);
            }
            Command::Read { id, reply } => {
                let _ = reply.send(self.read(&id));
            }
            Command::Commit { id, reply } => {
                let _ = reply.send(self.commit(&id).await);
            }
            Command::Failed { id, reply } => {
                let _ = reply.send(self.failed(&id).await);
            }
            Command::Status { reply } => {
                let _ = reply.send(self.status());
            }
            Command::Stop { .. } => unreachable!("Stop is handled by the run loop"),
        }
    }

    async fn next(&mut self) -> Result<String, IngestError> {
        let segment = match self.log.oldest().await {
            Ok(segment) => segment,
            Err(LogError::NoSegmentsAvailable) => return Err(IngestError::NoSegmentsAvailable),
            Err(LogError::Other(err)) => return Err(IngestError::Log(err)),
        };
        let id = Uuid::new_v4().to_string();
        metrics::record_segment_transition("Pending", "request");
        self.pending.insert(
            id.clone(),
            Lease {
                segment: Arc::from(segment),
                deadline: Instant::now() + self.timeout,
                expires: SystemTime::now() + self.timeout,
                reading: false,
            },
        );
        Ok(id)
    }

    fn read(&mut self, id: &str) -> Result<Arc<dyn ReadSegment>, IngestError> {
        let lease = self.pending.get_mut(id).ok_or(IngestError::UnknownLease)?;
        if lease.reading {
            return Err(IngestError::AlreadyReading);
        }
        metrics::record_segment_transition("Reading", "request");
        lease.reading = true;
        Ok(Arc::clone(&lease.segment))
    }

    async fn commit(&mut self, id: &str) -> Result<(), IngestError> {
        let lease = self.pending.get(id).ok_or(IngestError::UnknownLease)?;
        if !lease.reading {
            return Err(IngestError::NotYetRead);
        }
        metrics::record_segment_transition("Commit", "request");
        // On error the lease stays put; the sweeper fails it later.
        lease.segment.commit().await.map_err(IngestError::Log)?;
        self.pending.remove(id);
        Ok(())
    }

    async fn failed(&mut self, id: &str) -> Result<(), IngestError> {
        let lease = self.pending.get(id).ok_or(IngestError::UnknownLease)?;
        metrics::record_segment_transition("Failed", "request");
        lease.segment.failed().await.map_err(IngestError::Log)?;
        self.pending.remove(id);
        Ok(())
    }

    fn status(&self) -> String {
        let mut out = format!("{} pending\n", self.pending.len());
        for (id, lease) in &self.pending {
            let _ = writeln!(
                out,
                " {id}: reading={} deadline={}",
                lease.reading,
                httpdate::fmt_http_date(lease.expires)
            );
        }
        out
    }

    /// Fail every lease whose deadline is behind `cutoff`, making its
    /// segment available for consumption again.
    async fn sweep(&mut self, cutoff: Instant) {
        let expired: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, lease)| lease.deadline < cutoff)
            .map(|(id, _)| id.clone())
            .collect();
        for id in expired {
            if let Some(lease) = self.pending.remove(&id) {
                metrics::record_segment_transition("Failed", "timeout");
                if let Err(err) = lease.segment.failed().await {
                    // A reservation that cannot be failed is a leaked
                    // segment; there is no safe way to continue.
                    error!(%id, %err, "failed() errored during deadline sweep");
                    std::process::abort();
                }
            }
        }
    }
}
