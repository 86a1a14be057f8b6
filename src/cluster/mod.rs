//! Elastic peer discovery over a gossip transport.
//!
//! Every node advertises a small record (role, API endpoint) keyed by
//! its cluster-unique name. The view is eventually consistent: stale
//! entries may linger briefly after a node departs, until the leave
//! event propagates.

pub mod directory;
pub mod peer;
pub mod transport;
