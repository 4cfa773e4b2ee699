//! `infohash -> announced peer locations`, as populated by `announce_peer`
//! and read back by `get_peers`.

use krpc_encoding::{Location, NodeId};
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// How long an announcement survives without being refreshed.
pub const PEER_TTL_SECS: u64 = 30 * 60;
/// Cap on how many locations a single lookup hands back.
pub const MAX_PEERS_PER_INFOHASH: usize = 150;

fn now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

struct Entry {
    loc: Location,
    announced_at: u64,
}

pub struct PeerStore {
    by_info_hash: HashMap<NodeId, Vec<Entry>>,
    ttl_secs: u64,
    max_peers: usize,
}

impl Default for PeerStore {
    fn default() -> PeerStore {
        PeerStore::new()
    }
}

impl PeerStore {
    pub fn new() -> PeerStore {
        PeerStore::with_limits(PEER_TTL_SECS, MAX_PEERS_PER_INFOHASH)
    }

    /// Builds a store with caller-supplied eviction/cap limits, as wired
    /// from [`crate::config::DhtConfig`] rather than the spec's literal
    /// defaults.
    pub fn with_limits(ttl_secs: u64, max_peers: usize) -> PeerStore {
        PeerStore { by_info_hash: HashMap::new(), ttl_secs, max_peers }
    }

    /// Records (or refreshes) an announcement. Re-announcing an existing
    /// location just bumps its timestamp.
    pub fn announce(&mut self, info_hash: NodeId, loc: Location) {
        let entries = self.by_info_hash.entry(info_hash).or_default();
        match entries.iter_mut().find(|e| locs_eq(&e.loc, &loc)) {
            Some(e) => e.announced_at = now(),
            None => entries.push(Entry { loc, announced_at: now() }),
        }
    }

    /// Up to `MAX_PEERS_PER_INFOHASH` locations for `info_hash`, most
    /// recently announced first.
    pub fn get(&self, info_hash: &NodeId) -> Vec<Location> {
        let mut locs: Vec<Location> = match self.by_info_hash.get(info_hash) {
            Some(entries) => {
                let mut sorted: Vec<&Entry> = entries.iter().collect();
                sorted.sort_by(|a, b| b.announced_at.cmp(&a.announced_at));
                sorted.into_iter().map(|e| e.loc).collect()
            }
            None => return Vec::new(),
        };
        locs.truncate(self.max_peers);
        locs
    }

    pub fn is_empty_for(&self, info_hash: &NodeId) -> bool {
        self.by_info_hash.get(info_hash).map(|e| e.is_empty()).unwrap_or(true)
    }

    pub fn tracked_infohashes(&self) -> usize {
        self.by_info_hash.len()
    }

    /// Drops every entry older than `PEER_TTL_SECS`, returning `(info_hash,
    /// loc)` for each eviction so the caller can emit `dropPeer`.
    pub fn sweep(&mut self) -> Vec<(NodeId, Location)> {
        let cutoff = now().saturating_sub(self.ttl_secs);
        let mut dropped = Vec::new();
        self.by_info_hash.retain(|info_hash, entries| {
            entries.retain(|e| {
                if e.announced_at < cutoff {
                    dropped.push((*info_hash, e.loc));
                    false
                } else {
                    true
                }
            });
            !entries.is_empty()
        });
        dropped
    }
}

fn locs_eq(a: &Location, b: &Location) -> bool {
    a.as_bytes() == b.as_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, SocketAddrV4};

    fn loc(n: u8) -> Location {
        SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, n), 6881).into()
    }

    #[test]
    fn announce_then_get_round_trips() {
        let mut store = PeerStore::new();
        let ih = NodeId::random();
        store.announce(ih, loc(1));
        store.announce(ih, loc(2));
        let peers = store.get(&ih);
        assert_eq!(peers.len(), 2);
    }

    #[test]
    fn re_announcing_does_not_duplicate() {
        let mut store = PeerStore::new();
        let ih = NodeId::random();
        store.announce(ih, loc(1));
        store.announce(ih, loc(1));
        assert_eq!(store.get(&ih).len(), 1);
    }

    #[test]
    fn get_caps_at_max_peers() {
        let mut store = PeerStore::new();
        let ih = NodeId::random();
        for n in 0..200u16 {
            let loc: Location = SocketAddrV4::new(Ipv4Addr::new(10, 0, (n >> 8) as u8, n as u8), 6881).into();
            store.announce(ih, loc);
        }
        assert_eq!(store.get(&ih).len(), MAX_PEERS_PER_INFOHASH);
    }

    #[test]
    fn unknown_infohash_returns_empty() {
        let store = PeerStore::new();
        assert!(store.get(&NodeId::random()).is_empty());
    }
}
