//! `target -> stored BEP44 item`, as populated by `put` and read back by
//! `get`. Immutable items carry `k`/`seq`/`sig == None`.

use krpc_encoding::bencode::Value;
use krpc_encoding::NodeId;
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// How long a stored item survives without being refreshed by a new `put`.
pub const DATA_TTL_SECS: u64 = 120 * 60;

fn now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

#[derive(Clone)]
pub struct Datum {
    pub v: Value,
    pub k: Option<[u8; 32]>,
    pub seq: Option<i64>,
    pub sig: Option<[u8; 64]>,
    pub stored_at: u64,
}

impl Datum {
    pub fn immutable(v: Value) -> Datum {
        Datum { v, k: None, seq: None, sig: None, stored_at: now() }
    }

    pub fn mutable(v: Value, k: [u8; 32], seq: i64, sig: [u8; 64]) -> Datum {
        Datum { v, k: Some(k), seq: Some(seq), sig: Some(sig), stored_at: now() }
    }
}

pub struct DataStore {
    by_target: HashMap<NodeId, Datum>,
    ttl_secs: u64,
}

impl Default for DataStore {
    fn default() -> DataStore {
        DataStore::new()
    }
}

impl DataStore {
    pub fn new() -> DataStore {
        DataStore::with_ttl(DATA_TTL_SECS)
    }

    /// Builds a store with a caller-supplied eviction age, as wired from
    /// [`crate::config::DhtConfig`] rather than the spec's literal default.
    pub fn with_ttl(ttl_secs: u64) -> DataStore {
        DataStore { by_target: HashMap::new(), ttl_secs }
    }

    pub fn get(&self, target: &NodeId) -> Option<&Datum> {
        self.by_target.get(target)
    }

    pub fn put(&mut self, target: NodeId, datum: Datum) {
        self.by_target.insert(target, datum);
    }

    pub fn len(&self) -> usize {
        self.by_target.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_target.is_empty()
    }

    /// Drops every item older than `DATA_TTL_SECS`, returning the dropped
    /// targets so the caller can emit `dropData`.
    pub fn sweep(&mut self) -> Vec<NodeId> {
        let cutoff = now().saturating_sub(self.ttl_secs);
        let mut dropped = Vec::new();
        self.by_target.retain(|target, datum| {
            if datum.stored_at < cutoff {
                dropped.push(*target);
                false
            } else {
                true
            }
        });
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_round_trips_immutable() {
        let mut store = DataStore::new();
        let v = Value::bytes(b"hello".to_vec());
        let target = NodeId::random();
        store.put(target, Datum::immutable(v.clone()));
        let datum = store.get(&target).unwrap();
        assert_eq!(datum.v, v);
        assert!(datum.seq.is_none());
    }

    #[test]
    fn put_overwrites_existing_entry() {
        let mut store = DataStore::new();
        let target = NodeId::random();
        store.put(target, Datum::mutable(Value::Int(1), [1u8; 32], 1, [0u8; 64]));
        store.put(target, Datum::mutable(Value::Int(2), [1u8; 32], 2, [0u8; 64]));
        assert_eq!(store.get(&target).unwrap().seq, Some(2));
    }

    #[test]
    fn unknown_target_returns_none() {
        let store = DataStore::new();
        assert!(store.get(&NodeId::random()).is_none());
    }
}
