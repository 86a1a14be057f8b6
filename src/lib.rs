//! ferrylog library — log-segment ingestion node.
//!
//! Producers hand opaque segments to an ingest node; store nodes drain
//! them through a reserve / read / acknowledge lease protocol; a
//! gossip-backed peer directory advertises every node's API so the two
//! sides can find each other. This crate provides the coordination
//! core: the pending-lease dispatcher, the HTTP protocol surface, and
//! the cluster directory.

pub mod cluster;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod ingest;
pub mod metrics;
pub mod server;

use crate::cluster::peer::Peer;
use crate::config::Config;
use crate::ingest::coordinator::Coordinator;

/// Shared application state passed to all handlers via `axum::extract::State`.
pub struct AppState {
    /// Server configuration.
    pub config: Config,
    /// Handle to the lease dispatcher.
    pub coordinator: Coordinator,
    /// This node's cluster membership and peer directory.
    pub peer: Peer,
}
