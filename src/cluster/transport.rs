//! Gossip transport seam.
//!
//! The peer directory does not speak a wire protocol itself: it
//! implements [`GossipDelegate`] and is driven by whatever transport
//! hosts it, through the callback set below. [`Hub`] plus
//! [`InProcessGossip`] is the in-tree transport, wiring nodes inside a
//! single process; a SWIM-style network transport implements the same
//! pair of traits and nothing above it changes.

use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// A member of the cluster as the transport sees it.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Node {
    /// Cluster-unique name.
    pub name: String,
    /// Gossip bind address.
    pub addr: String,
    /// Gossip bind port.
    pub port: u16,
}

/// Transport construction parameters.
#[derive(Debug, Clone)]
pub struct GossipConfig {
    /// Cluster-unique node name.
    pub name: String,
    pub bind_addr: String,
    pub bind_port: u16,
}

/// Callbacks a transport drives. None of these may block: they run on
/// the transport's receive path, and all the directory does under them
/// is bounded-size table work.
pub trait GossipDelegate: Send + Sync + 'static {
    /// Per-node metadata attached to alive messages, at most `limit` bytes.
    fn node_meta(&self, limit: usize) -> Vec<u8>;

    /// A user-data broadcast arrived.
    fn notify_msg(&self, msg: &[u8]);

    /// Outbound broadcast buffers. Each buffer plus `overhead` bytes
    /// counts against `limit` bytes total.
    fn get_broadcasts(&self, overhead: usize, limit: usize) -> Vec<Vec<u8>>;

    /// Full local state for a push/pull exchange.
    fn local_state(&self, join: bool) -> Vec<u8>;

    /// Merge a remote node's exported state.
    fn merge_remote_state(&self, buf: &[u8], join: bool);

    /// A node joined the cluster.
    fn notify_join(&self, node: &Node);

    /// A node's metadata changed.
    fn notify_update(&self, node: &Node);

    /// A node left or was declared dead.
    fn notify_leave(&self, node: &Node);
}

/// Handle on a running membership.
pub trait Gossip: Send + Sync + 'static {
    /// This node as the transport advertises it.
    fn local_node(&self) -> Node;

    /// Cluster size from this node's perspective.
    fn num_members(&self) -> usize;

    /// Every known member, this node included.
    fn members(&self) -> Vec<Node>;

    /// Contact the given seeds, returning how many were reached.
    /// Errors when seeds were given and none could be contacted;
    /// partial success is fine.
    fn join(
        &self,
        seeds: &[String],
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<usize>> + Send + '_>>;

    /// Gracefully leave, notifying peers, bounded by `timeout`.
    fn leave(
        &self,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>>;
}

// -- In-process transport -----------------------------------------------------

/// Per-broadcast-buffer framing overhead the hub charges, mirroring a
/// UDP transport's message header.
const BROADCAST_OVERHEAD: usize = 2;

/// Payload budget per gossip round, a UDP-sized packet.
const BROADCAST_LIMIT: usize = 1400;

struct Member {
    node: Node,
    delegate: Arc<dyn GossipDelegate>,
}

/// In-process gossip network. Every [`InProcessGossip`] registered
/// against the same hub is reachable by its `addr:port`, and the hub
/// pumps broadcast and anti-entropy rounds on demand rather than on a
/// timer, so propagation stays deterministic under test.
#[derive(Clone, Default)]
pub struct Hub {
    inner: Arc<Mutex<HashMap<String, Member>>>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node and hand back its membership handle. Existing
    /// members observe a join event for the newcomer, and the newcomer
    /// observes one for each existing member.
    pub fn register(
        &self,
        config: GossipConfig,
        delegate: Arc<dyn GossipDelegate>,
    ) -> anyhow::Result<InProcessGossip> {
        let node = Node {
            name: config.name,
            addr: config.bind_addr,
            port: config.bind_port,
        };
        let key = endpoint_key(&node.addr, node.port);
        let mut members = self.lock();
        if members.contains_key(&key) {
            anyhow::bail!("gossip endpoint {key} is already bound");
        }
        for existing in members.values() {
            existing.delegate.notify_join(&node);
            delegate.notify_join(&existing.node);
        }
        members.insert(
            key,
            Member {
                node: node.clone(),
                delegate: Arc::clone(&delegate),
            },
        );
        Ok(InProcessGossip {
            hub: self.clone(),
            node,
            delegate,
            left: AtomicBool::new(false),
        })
    }

    /// One broadcast round: drain every member's outbound buffers and
    /// deliver them to every other member.
    pub fn gossip_round(&self) {
        let members = self.snapshot();
        for sender in &members {
            let bufs = sender
                .delegate
                .get_broadcasts(BROADCAST_OVERHEAD, BROADCAST_LIMIT);
            for receiver in &members {
                if receiver.node == sender.node {
                    continue;
                }
                for buf in &bufs {
                    receiver.delegate.notify_msg(buf);
                }
            }
        }
    }

    /// One anti-entropy round: every member push/pulls with every
    /// other member.
    pub fn push_pull_round(&self) {
        let members = self.snapshot();
        for a in &members {
            for b in &members {
                if a.node == b.node {
                    continue;
                }
                b.delegate.merge_remote_state(&a.delegate.local_state(false), false);
            }
        }
    }

    fn snapshot(&self) -> Vec<Member> {
        self.lock()
            .values()
            .map(|m| Member {
                node: m.node.clone(),
                delegate: Arc::clone(&m.delegate),
            })
            .collect()
    }

    fn find(&self, endpoint: &str) -> Option<(Node, Arc<dyn GossipDelegate>)> {
        self.lock()
            .get(endpoint)
            .map(|m| (m.node.clone(), Arc::clone(&m.delegate)))
    }

    fn remove(&self, node: &Node) -> Vec<Member> {
        let mut members = self.lock();
        members.remove(&endpoint_key(&node.addr, node.port));
        members
            .values()
            .map(|m| Member {
                node: m.node.clone(),
                delegate: Arc::clone(&m.delegate),
            })
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Member>> {
        self.inner.lock().expect("hub lock poisoned")
    }
}

fn endpoint_key(addr: &str, port: u16) -> String {
    format!("{addr}:{port}")
}

/// Membership handle for a node registered on a [`Hub`].
pub struct InProcessGossip {
    hub: Hub,
    node: Node,
    delegate: Arc<dyn GossipDelegate>,
    left: AtomicBool,
}

impl Gossip for InProcessGossip {
    fn local_node(&self) -> Node {
        self.node.clone()
    }

    fn num_members(&self) -> usize {
        if self.left.load(Ordering::SeqCst) {
            1
        } else {
            self.hub.lock().len()
        }
    }

    fn members(&self) -> Vec<Node> {
        if self.left.load(Ordering::SeqCst) {
            return vec![self.node.clone()];
        }
        self.hub.lock().values().map(|m| m.node.clone()).collect()
    }

    fn join(
        &self,
        seeds: &[String],
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<usize>> + Send + '_>> {
        let seeds = seeds.to_vec();
        Box::pin(async move {
            if seeds.is_empty() {
                return Ok(0);
            }
            let mut contacted = 0;
            for seed in &seeds {
                let Some((remote, remote_delegate)) = self.hub.find(seed) else {
                    tracing::debug!(%seed, "seed not reachable");
                    continue;
                };
                if remote == self.node {
                    continue;
                }
                // TCP-style push/pull, both directions, join flavor.
                remote_delegate.merge_remote_state(&self.delegate.local_state(true), true);
                self.delegate
                    .merge_remote_state(&remote_delegate.local_state(true), true);
                contacted += 1;
            }
            if contacted == 0 {
                anyhow::bail!("failed to contact any of {} seeds", seeds.len());
            }
            Ok(contacted)
        })
    }

    fn leave(
        &self,
        _timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        Box::pin(async move {
            if self.left.swap(true, Ordering::SeqCst) {
                return Ok(());
            }
            for member in self.hub.remove(&self.node) {
                member.delegate.notify_leave(&self.node);
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Delegate that records every callback it sees.
    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }

        fn record(&self, event: String) {
            self.events.lock().unwrap().push(event);
        }
    }

    impl GossipDelegate for Recorder {
        fn node_meta(&self, _limit: usize) -> Vec<u8> {
            Vec::new()
        }

        fn notify_msg(&self, msg: &[u8]) {
            self.record(format!("msg:{}", String::from_utf8_lossy(msg)));
        }

        fn get_broadcasts(&self, _overhead: usize, _limit: usize) -> Vec<Vec<u8>> {
            vec![b"hello".to_vec()]
        }

        fn local_state(&self, _join: bool) -> Vec<u8> {
            b"state".to_vec()
        }

        fn merge_remote_state(&self, buf: &[u8], join: bool) {
            self.record(format!("merge:{}:{join}", String::from_utf8_lossy(buf)));
        }

        fn notify_join(&self, node: &Node) {
            self.record(format!("join:{}", node.name));
        }

        fn notify_update(&self, node: &Node) {
            self.record(format!("update:{}", node.name));
        }

        fn notify_leave(&self, node: &Node) {
            self.record(format!("leave:{}", node.name));
        }
    }

    fn config(name: &str, port: u16) -> GossipConfig {
        GossipConfig {
            name: name.to_string(),
            bind_addr: "127.0.0.1".to_string(),
            bind_port: port,
        }
    }

    #[tokio::test]
    async fn join_push_pulls_with_reachable_seeds() {
        let hub = Hub::new();
        let a = Arc::new(Recorder::default());
        let b = Arc::new(Recorder::default());

        let ga = hub.register(config("a", 1001), a.clone()).unwrap();
        let gb = hub.register(config("b", 1002), b.clone()).unwrap();

        let n = gb
            .join(&["127.0.0.1:1001".to_string(), "127.0.0.1:9999".to_string()])
            .await
            .unwrap();
        assert_eq!(n, 1);
        assert!(a.events().contains(&"merge:state:true".to_string()));
        assert!(b.events().contains(&"merge:state:true".to_string()));

        assert_eq!(ga.num_members(), 2);
        assert_eq!(gb.num_members(), 2);
    }

    #[tokio::test]
    async fn join_fails_when_no_seed_is_reachable() {
        let hub = Hub::new();
        let g = hub
            .register(config("a", 1001), Arc::new(Recorder::default()))
            .unwrap();
        assert!(g.join(&["127.0.0.1:9999".to_string()]).await.is_err());
        // No seeds at all is a one-node cluster, not an error.
        assert_eq!(g.join(&[]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn leave_notifies_remaining_members() {
        let hub = Hub::new();
        let a = Arc::new(Recorder::default());
        let ga = hub.register(config("a", 1001), a.clone()).unwrap();
        let gb = hub
            .register(config("b", 1002), Arc::new(Recorder::default()))
            .unwrap();

        gb.leave(Duration::from_secs(1)).await.unwrap();
        assert!(a.events().contains(&"leave:b".to_string()));
        assert_eq!(ga.num_members(), 1);
    }

    #[tokio::test]
    async fn gossip_round_delivers_broadcasts_to_everyone_else() {
        let hub = Hub::new();
        let a = Arc::new(Recorder::default());
        let b = Arc::new(Recorder::default());
        hub.register(config("a", 1001), a.clone()).unwrap();
        hub.register(config("b", 1002), b.clone()).unwrap();

        hub.gossip_round();
        assert!(a.events().contains(&"msg:hello".to_string()));
        assert!(b.events().contains(&"msg:hello".to_string()));
    }

    #[tokio::test]
    async fn duplicate_endpoint_is_rejected() {
        let hub = Hub::new();
        hub.register(config("a", 1001), Arc::new(Recorder::default()))
            .unwrap();
        assert!(hub
            .register(config("b", 1001), Arc::new(Recorder::default()))
            .is_err());
    }
}
