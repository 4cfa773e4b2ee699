//! The host-facing event stream: a tagged variant per notification instead
//! of the single `update(key, value)` callback, so a listener matches on
//! `Event` rather than string-sniffing a key.

use krpc_encoding::{Location, NodeId};
use std::net::SocketAddr;

#[derive(Debug, Clone)]
pub enum Event {
    /// Our own node id, emitted once after it's settled (config, random, or
    /// BEP42-derived).
    Id(NodeId),
    /// Our Ed25519 public key, emitted once at startup.
    PublicKey([u8; 32]),
    /// The UDP socket is bound and the receive loop is running.
    Listening,
    /// Bootstrap `populate` finished; `num_visited` is the traversal's
    /// visited-node count.
    Ready { num_visited: usize },
    /// An inbound query was accepted and dispatched to a verb handler.
    /// `bep42` reports whether the sender's id is a compliant BEP42
    /// derivation from its source address; non-compliant senders are
    /// flagged here, never rejected.
    Incoming { addr: SocketAddr, verb: String, bep42: bool },
    /// A query from `addr` was rejected with a KRPC error code.
    Error { addr: SocketAddr, code: i64, message: String },
    /// Freshly learned nodes from a `find_node`/`get_peers` response.
    Nodes(Vec<NodeId>),
    /// The current routing table's K closest contacts to our own id.
    Closest(Vec<NodeId>),
    /// Aggregate peer-store eviction report from a housekeeping sweep.
    Peers { evicted: usize, infohashes_tracked: usize },
    /// Aggregate data-store eviction report from a housekeeping sweep.
    Data { evicted: usize, items_tracked: usize },
    /// A source crossed the per-window spam threshold.
    Spam(SocketAddr),
    /// A routing table contact was dropped after an unanswered refresh ping.
    DropNode(NodeId),
    /// A peer entry expired out of the peer store.
    DropPeer { info_hash: NodeId, loc: Location },
    /// A stored item expired out of the data store.
    DropData { target: NodeId },
    /// The UDP socket failed to bind at startup.
    UdpFail { port: u16 },
}
