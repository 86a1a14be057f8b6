//! Cluster peer: this node's membership handle plus the directory of
//! advertised APIs.
//!
//! Ingest and store nodes join the same cluster and know about each
//! other. Store nodes consume segments from each ingest node; either
//! side discovers the other through role-filtered endpoint queries.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use crate::cluster::directory::{Directory, PeerInfo};
use crate::cluster::transport::{Gossip, GossipConfig};

/// The kind of API a peer serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerRole {
    /// Serves the ingest API.
    #[serde(rename = "ingest")]
    Ingest,
    /// Serves the store API.
    #[serde(rename = "store")]
    Store,
    /// Serves both APIs.
    #[serde(rename = "ingeststore")]
    IngestStore,
}

impl PeerRole {
    /// Whether a peer advertising `peer` satisfies a query for `self`.
    /// Dual-role peers satisfy both single-role queries; a dual-role
    /// query matches only dual-role peers.
    pub fn matches(self, peer: PeerRole) -> bool {
        match self {
            PeerRole::Ingest => matches!(peer, PeerRole::Ingest | PeerRole::IngestStore),
            PeerRole::Store => matches!(peer, PeerRole::Store | PeerRole::IngestStore),
            PeerRole::IngestStore => peer == PeerRole::IngestStore,
        }
    }
}

impl fmt::Display for PeerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PeerRole::Ingest => "ingest",
            PeerRole::Store => "store",
            PeerRole::IngestStore => "ingeststore",
        })
    }
}

impl FromStr for PeerRole {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ingest" => Ok(PeerRole::Ingest),
            "store" => Ok(PeerRole::Store),
            "ingeststore" => Ok(PeerRole::IngestStore),
            other => anyhow::bail!("unknown peer role {other:?}"),
        }
    }
}

/// Parameters for [`Peer::join`].
#[derive(Debug, Clone)]
pub struct JoinOptions {
    /// Gossip bind address.
    pub bind_addr: String,
    /// Gossip bind port.
    pub bind_port: u16,
    /// Seed endpoints (`host:port`) to contact on startup.
    pub seeds: Vec<String>,
    /// Role advertised to the cluster.
    pub role: PeerRole,
    /// Port of this node's HTTP API.
    pub api_port: u16,
}

/// This node in the cluster.
pub struct Peer {
    gossip: Arc<dyn Gossip>,
    directory: Arc<Directory>,
}

impl Peer {
    /// Create or join a cluster. A fresh node name is generated, this
    /// node's record is registered locally, then each seed is
    /// contacted. Reaching only some of the seeds is fine; reaching
    /// none of them is a creation error.
    ///
    /// `connect` builds the gossip transport around the directory; the
    /// directory (broadcast queue included) is fully constructed
    /// before `connect` runs, so the transport may call back
    /// immediately.
    pub async fn join<F>(opts: JoinOptions, connect: F) -> anyhow::Result<Self>
    where
        F: FnOnce(GossipConfig, Arc<Directory>) -> anyhow::Result<Box<dyn Gossip>>,
    {
        let directory = Arc::new(Directory::new());
        let config = GossipConfig {
            name: Uuid::new_v4().to_string(),
            bind_addr: opts.bind_addr.clone(),
            bind_port: opts.bind_port,
        };
        let gossip: Arc<dyn Gossip> = Arc::from(connect(config, Arc::clone(&directory))?);

        let local = gossip.local_node();
        directory.register_self(
            &local.name,
            PeerInfo {
                role: opts.role,
                api_addr: local.addr.clone(),
                api_port: opts.api_port,
            },
        );
        let size_source = Arc::clone(&gossip);
        directory.bind_cluster_size(Arc::new(move || size_source.num_members()));

        let contacted = gossip.join(&opts.seeds).await?;
        debug!(contacted, "joined cluster");

        Ok(Self { gossip, directory })
    }

    /// API `host:port`s of every peer matching `role`.
    pub fn endpoints(&self, role: PeerRole) -> Vec<String> {
        self.directory.endpoints(role)
    }

    /// This node's cluster-unique name.
    pub fn name(&self) -> String {
        self.gossip.local_node().name
    }

    /// Cluster size as observed from this node.
    pub fn size(&self) -> usize {
        self.gossip.num_members()
    }

    /// JSON-serializable dump of cluster state, for debug rendering.
    pub fn state(&self) -> serde_json::Value {
        serde_json::json!({
            "self": self.gossip.local_node(),
            "members": self.gossip.members(),
            "n": self.gossip.num_members(),
            "directory": self.directory.snapshot(),
        })
    }

    /// Leave the cluster gracefully, waiting up to `timeout`.
    pub async fn leave(&self, timeout: Duration) -> anyhow::Result<()> {
        self.gossip.leave(timeout).await
    }
}
