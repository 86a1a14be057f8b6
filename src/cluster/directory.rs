//! Gossip-state directory: the `name -> peer record` table every node
//! carries, maintained entirely from transport callbacks.
//!
//! The wire format is a JSON object `{ "<name>": { "type", "api_addr",
//! "api_port" } }`, the same shape for broadcasts and push/pull
//! exchanges. Merges only ever upsert; removal happens exclusively
//! through leave events. Unknown record fields are tolerated, a
//! malformed payload is logged and dropped, and an empty payload is
//! ignored, so one bad peer cannot stall the cluster.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, error};

use crate::cluster::peer::PeerRole;
use crate::cluster::transport::{GossipDelegate, Node};
use crate::metrics;

/// Retransmit multiplier for queued broadcasts, scaled by cluster size.
const RETRANSMIT_MULT: usize = 3;

/// One advertised peer record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PeerInfo {
    /// The kind of API this peer serves.
    #[serde(rename = "type")]
    pub role: PeerRole,
    /// Host of the peer's HTTP API.
    pub api_addr: String,
    /// Port of the peer's HTTP API.
    pub api_port: u16,
}

/// The peer table plus the outbound broadcast queue.
///
/// The queue exists from construction onward, before any transport
/// that could call [`GossipDelegate::get_broadcasts`] does, so there
/// is no initialization window in which a callback can misfire.
pub struct Directory {
    data: RwLock<HashMap<String, PeerInfo>>,
    queue: BroadcastQueue,
}

impl Directory {
    pub fn new() -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
            queue: BroadcastQueue::new(RETRANSMIT_MULT),
        }
    }

    /// Record this node's own entry and announce it on the broadcast
    /// queue.
    pub fn register_self(&self, name: &str, info: PeerInfo) {
        let mut announcement = HashMap::new();
        announcement.insert(name.to_string(), info.clone());
        let payload =
            serde_json::to_vec(&announcement).expect("peer record serializes to JSON");
        self.write().insert(name.to_string(), info);
        self.queue.queue(payload);
    }

    /// Bind the cluster-size input used to scale broadcast retransmit
    /// limits. Until bound, the queue assumes a single-node cluster.
    pub fn bind_cluster_size(&self, num_nodes: Arc<dyn Fn() -> usize + Send + Sync>) {
        self.queue.bind_num_nodes(num_nodes);
    }

    /// API `host:port`s of every peer matching `role`.
    pub fn endpoints(&self, role: PeerRole) -> Vec<String> {
        self.read()
            .values()
            .filter(|info| role.matches(info.role))
            .map(|info| join_host_port(&info.api_addr, info.api_port))
            .collect()
    }

    /// Current table contents.
    pub fn snapshot(&self) -> HashMap<String, PeerInfo> {
        self.read().clone()
    }

    fn upsert_all(&self, data: HashMap<String, PeerInfo>) {
        let mut table = self.write();
        for (name, info) in data {
            table.insert(name, info);
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, PeerInfo>> {
        self.data.read().expect("peer table lock poisoned")
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, PeerInfo>> {
        self.data.write().expect("peer table lock poisoned")
    }
}

impl Default for Directory {
    fn default() -> Self {
        Self::new()
    }
}

impl GossipDelegate for Directory {
    fn node_meta(&self, _limit: usize) -> Vec<u8> {
        metrics::record_delegate_invocation("NodeMeta");
        Vec::new()
    }

    fn notify_msg(&self, msg: &[u8]) {
        metrics::record_delegate_invocation("NotifyMsg");
        if msg.is_empty() {
            return;
        }
        let data: HashMap<String, PeerInfo> = match serde_json::from_slice(msg) {
            Ok(data) => data,
            Err(err) => {
                error!(%err, payload = %String::from_utf8_lossy(msg).trim(), "dropping malformed gossip message");
                return;
            }
        };
        // Removal is handled by notify_leave, never by merge.
        self.upsert_all(data);
    }

    fn get_broadcasts(&self, overhead: usize, limit: usize) -> Vec<Vec<u8>> {
        metrics::record_delegate_invocation("GetBroadcasts");
        self.queue.pop(overhead, limit)
    }

    fn local_state(&self, _join: bool) -> Vec<u8> {
        metrics::record_delegate_invocation("LocalState");
        let data = self.read();
        serde_json::to_vec(&*data).expect("peer table serializes to JSON")
    }

    fn merge_remote_state(&self, buf: &[u8], join: bool) {
        metrics::record_delegate_invocation("MergeRemoteState");
        if buf.is_empty() {
            debug!(join, "empty remote state");
            return;
        }
        let data: HashMap<String, PeerInfo> = match serde_json::from_slice(buf) {
            Ok(data) => data,
            Err(err) => {
                error!(%err, "dropping malformed remote state");
                return;
            }
        };
        self.upsert_all(data);
    }

    fn notify_join(&self, _node: &Node) {
        // Records arrive through state exchange, not join events.
        metrics::record_delegate_invocation("NotifyJoin");
    }

    fn notify_update(&self, _node: &Node) {
        metrics::record_delegate_invocation("NotifyUpdate");
    }

    fn notify_leave(&self, node: &Node) {
        metrics::record_delegate_invocation("NotifyLeave");
        self.write().remove(&node.name);
    }
}

/// Join a host and port, bracketing IPv6 literals.
fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

// -- Broadcast queue ----------------------------------------------------------

/// Outbound gossip buffers with memberlist-style retransmit limiting:
/// a queued payload is handed out on successive [`pop`] calls until
/// its budget of `mult x ceil(log10(n + 1))` transmissions is spent.
///
/// [`pop`]: BroadcastQueue::pop
struct BroadcastQueue {
    retransmit_mult: usize,
    num_nodes: RwLock<Option<Arc<dyn Fn() -> usize + Send + Sync>>>,
    pending: Mutex<Vec<PendingBroadcast>>,
}

struct PendingBroadcast {
    payload: Vec<u8>,
    transmits: usize,
}

impl BroadcastQueue {
    fn new(retransmit_mult: usize) -> Self {
        Self {
            retransmit_mult,
            num_nodes: RwLock::new(None),
            pending: Mutex::new(Vec::new()),
        }
    }

    fn bind_num_nodes(&self, num_nodes: Arc<dyn Fn() -> usize + Send + Sync>) {
        *self.num_nodes.write().expect("broadcast queue lock poisoned") = Some(num_nodes);
    }

    /// Queue a payload for broadcast.
    fn queue(&self, payload: Vec<u8>) {
        self.pending
            .lock()
            .expect("broadcast queue lock poisoned")
            .push(PendingBroadcast {
                payload,
                transmits: 0,
            });
    }

    /// Hand out queued payloads fitting within `limit`, charging
    /// `overhead` bytes per buffer. Least-transmitted payloads go
    /// first; exhausted payloads are dropped.
    fn pop(&self, overhead: usize, limit: usize) -> Vec<Vec<u8>> {
        let max_transmits = self.retransmit_limit();
        let mut pending = self.pending.lock().expect("broadcast queue lock poisoned");
        pending.sort_by_key(|broadcast| broadcast.transmits);
        let mut used = 0;
        let mut out = Vec::new();
        pending.retain_mut(|broadcast| {
            if broadcast.transmits >= max_transmits {
                return false;
            }
            if used + overhead + broadcast.payload.len() > limit {
                // Over budget this round; try again next time.
                return true;
            }
            used += overhead + broadcast.payload.len();
            broadcast.transmits += 1;
            out.push(broadcast.payload.clone());
            broadcast.transmits < max_transmits
        });
        out
    }

    fn retransmit_limit(&self) -> usize {
        let n = self
            .num_nodes
            .read()
            .expect("broadcast queue lock poisoned")
            .as_ref()
            .map(|f| f())
            .unwrap_or(1);
        self.retransmit_mult * (((n + 1) as f64).log10().ceil() as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(role: PeerRole, port: u16) -> PeerInfo {
        PeerInfo {
            role,
            api_addr: "10.0.0.1".to_string(),
            api_port: port,
        }
    }

    fn node(name: &str) -> Node {
        Node {
            name: name.to_string(),
            addr: "127.0.0.1".to_string(),
            port: 7659,
        }
    }

    #[test]
    fn merge_upserts_and_never_deletes() {
        let dir = Directory::new();
        dir.register_self("self", info(PeerRole::Ingest, 1));

        let mut remote = HashMap::new();
        remote.insert("other".to_string(), info(PeerRole::Store, 2));
        dir.merge_remote_state(&serde_json::to_vec(&remote).unwrap(), true);

        let snapshot = dir.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot["other"], info(PeerRole::Store, 2));

        // A second merge missing "other" must not remove it.
        let mut update = HashMap::new();
        update.insert("third".to_string(), info(PeerRole::Store, 3));
        dir.merge_remote_state(&serde_json::to_vec(&update).unwrap(), false);
        assert_eq!(dir.snapshot().len(), 3);
    }

    #[test]
    fn empty_and_malformed_payloads_are_dropped() {
        let dir = Directory::new();
        dir.register_self("self", info(PeerRole::Ingest, 1));

        dir.notify_msg(b"");
        dir.merge_remote_state(b"", false);
        dir.notify_msg(b"not json at all");
        dir.merge_remote_state(b"{\"broken\":", false);

        assert_eq!(dir.snapshot().len(), 1);
    }

    #[test]
    fn unknown_wire_fields_are_tolerated() {
        let dir = Directory::new();
        dir.notify_msg(
            br#"{"n1": {"type": "store", "api_addr": "10.0.0.2", "api_port": 80, "weight": 3}}"#,
        );
        assert_eq!(dir.snapshot()["n1"].role, PeerRole::Store);
    }

    #[test]
    fn leave_removes_the_departing_record() {
        let dir = Directory::new();
        dir.register_self("n1", info(PeerRole::Ingest, 1));
        dir.notify_msg(br#"{"n2": {"type": "store", "api_addr": "10.0.0.2", "api_port": 80}}"#);
        assert_eq!(dir.snapshot().len(), 2);

        dir.notify_leave(&node("n2"));
        assert!(!dir.snapshot().contains_key("n2"));

        // Join and update events leave the table alone.
        dir.notify_join(&node("n3"));
        dir.notify_update(&node("n1"));
        assert_eq!(dir.snapshot().len(), 1);
    }

    #[test]
    fn endpoints_filters_by_role() {
        let dir = Directory::new();
        dir.register_self("i", info(PeerRole::Ingest, 1));
        dir.upsert_all(HashMap::from([
            ("s".to_string(), info(PeerRole::Store, 2)),
            ("is".to_string(), info(PeerRole::IngestStore, 3)),
        ]));

        let mut ingest = dir.endpoints(PeerRole::Ingest);
        ingest.sort();
        assert_eq!(ingest, vec!["10.0.0.1:1", "10.0.0.1:3"]);

        let mut store = dir.endpoints(PeerRole::Store);
        store.sort();
        assert_eq!(store, vec!["10.0.0.1:2", "10.0.0.1:3"]);

        assert_eq!(dir.endpoints(PeerRole::IngestStore), vec!["10.0.0.1:3"]);
    }

    #[test]
    fn local_state_round_trips_through_merge() {
        let dir = Directory::new();
        dir.register_self("n1", info(PeerRole::IngestStore, 9));

        let other = Directory::new();
        other.merge_remote_state(&dir.local_state(true), true);
        assert_eq!(other.snapshot(), dir.snapshot());
    }

    #[test]
    fn registration_announces_on_the_broadcast_queue() {
        let dir = Directory::new();
        dir.register_self("n1", info(PeerRole::Ingest, 1));

        let bufs = dir.get_broadcasts(2, 1400);
        assert_eq!(bufs.len(), 1);
        let decoded: HashMap<String, PeerInfo> = serde_json::from_slice(&bufs[0]).unwrap();
        assert_eq!(decoded["n1"], info(PeerRole::Ingest, 1));
    }

    #[test]
    fn broadcast_queue_respects_the_size_budget() {
        let queue = BroadcastQueue::new(3);
        queue.queue(vec![0u8; 60]);
        queue.queue(vec![1u8; 60]);

        // Budget fits one 60-byte payload plus overhead, not two.
        let first = queue.pop(2, 100);
        assert_eq!(first.len(), 1);
        let second = queue.pop(2, 100);
        assert_eq!(second.len(), 1);
        assert_ne!(first[0], second[0]);
    }

    #[test]
    fn broadcast_queue_exhausts_retransmits() {
        let queue = BroadcastQueue::new(1);
        queue.queue(b"x".to_vec());

        // mult 1, one node: a single transmission.
        assert_eq!(queue.pop(0, 1400).len(), 1);
        assert!(queue.pop(0, 1400).is_empty());
    }

    #[test]
    fn join_host_port_brackets_ipv6() {
        assert_eq!(join_host_port("10.0.0.1", 80), "10.0.0.1:80");
        assert_eq!(join_host_port("::1", 80), "[::1]:80");
    }
}
