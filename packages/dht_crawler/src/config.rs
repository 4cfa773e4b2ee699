//! Construction-time knobs. Deliberately a plain struct with no file or env
//! parsing -- the host process owns its own config layer and hands us
//! already-resolved values (bootstrap addresses included: DNS resolution of
//! router hostnames is the host's job, not ours).

use krpc_encoding::{Location, NodeId};
use std::net::Ipv4Addr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct DhtConfig {
    /// UDP port to bind. `0` lets the OS pick an ephemeral one.
    pub port: u16,
    /// Fixed node id. Takes priority over BEP42 derivation and random
    /// generation.
    pub id: Option<NodeId>,
    /// Fixed Ed25519 signing seed (32 bytes), for a stable identity across
    /// restarts. `None` generates a fresh keypair every run.
    pub seed: Option<[u8; 32]>,
    /// Our externally-reachable IPv4 address, if known, used to derive a
    /// BEP42-compliant id when `id` is unset.
    pub external_ip: Option<Ipv4Addr>,
    /// Seed contacts for the bootstrap `populate` run.
    pub bootstrap: Vec<Location>,
    /// Per-query timeout before a pending transaction fires `Timeout`.
    pub query_timeout: Duration,
    /// Cadence of the outgoing-query tick driver.
    pub tick_interval: Duration,
    /// Cadence of the housekeeping sweep (spam reset, table refresh, token
    /// rotation, store eviction).
    pub housekeeping_interval: Duration,
    /// How long a peer announcement survives in the peer store.
    pub peer_ttl: Duration,
    /// How long a stored BEP44 item survives in the data store.
    pub data_ttl: Duration,
    /// Cap on peer locations returned from a single `get_peers` lookup.
    pub max_peers_per_lookup: usize,
}

impl Default for DhtConfig {
    fn default() -> DhtConfig {
        DhtConfig {
            port: 6881,
            id: None,
            seed: None,
            external_ip: None,
            bootstrap: Vec::new(),
            query_timeout: Duration::from_millis(500),
            tick_interval: Duration::from_millis(100),
            housekeeping_interval: Duration::from_secs(5 * 60),
            peer_ttl: Duration::from_secs(30 * 60),
            data_ttl: Duration::from_secs(120 * 60),
            max_peers_per_lookup: crate::peer_store::MAX_PEERS_PER_INFOHASH,
        }
    }
}
