//! The host-facing surface (spec §6): announce/lookup peers, put/get BEP44
//! values, and the target-computation helpers a caller needs before
//! calling them.

use crate::errors::{ErrorKind, Result};
use crate::identity::NodeIdentity;
use crate::lookup::{self, ActOutcome, OnV, PostIntent, PreVerb};
use krpc_encoding::bencode::Value;
use krpc_encoding::bep44::{self, truncate_salt, MAX_VALUE_LEN};
use krpc_encoding::{Location, NodeId};
use routing_table::RoutingTable;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::UnboundedSender;
use tokio_krpc::OutgoingQueries;

pub struct PublicInterface {
    pub(crate) local_id: NodeId,
    pub(crate) identity: Arc<Mutex<NodeIdentity>>,
    pub(crate) routing_table: Arc<Mutex<RoutingTable>>,
    pub(crate) outgoing: OutgoingQueries,
    pub(crate) on_v: Option<UnboundedSender<OnV>>,
}

pub struct PeersResult {
    pub num_visited: usize,
    pub peers: Vec<Location>,
}

pub struct DataResult {
    pub num_visited: usize,
    pub v: Option<Value>,
    pub seq: Option<i64>,
}

impl PublicInterface {
    /// `SHA-1(encode(v))`, the address an immutable `put` of `v` would
    /// land at.
    pub fn make_immutable_target(&self, v: &Value) -> NodeId {
        bep44::immutable_target(v)
    }

    /// `SHA-1(k || salt)`, the address a mutable `put` under `k`/`salt`
    /// would land at.
    pub fn make_mutable_target(&self, k: &[u8; 32], salt: &[u8]) -> NodeId {
        bep44::mutable_target(k, truncate_salt(salt))
    }

    /// Finds peers announced for `info_hash`.
    pub async fn get_peers(&self, info_hash: NodeId) -> PeersResult {
        let outcome = self.act(info_hash, PreVerb::GetPeers, None).await;
        PeersResult { num_visited: outcome.num_visited, peers: outcome.peers }
    }

    /// Finds peers for `info_hash` and announces ourselves to every
    /// contact that handed back a token.
    pub async fn announce_peer(
        &self,
        info_hash: NodeId,
        implied_port: bool,
        port: Option<u16>,
    ) -> PeersResult {
        let post = PostIntent::AnnouncePeer { implied_port, port };
        let outcome = self.act(info_hash, PreVerb::GetPeers, Some(post)).await;
        PeersResult { num_visited: outcome.num_visited, peers: outcome.peers }
    }

    /// Fetches the current value stored at `target`, following up to
    /// `seq` if supplied (only return values strictly newer). `salt` is the
    /// mutable item's salt if `target` is `make_mutable_target(k, salt)`
    /// for some `k`; pass an empty slice for an immutable target or an
    /// unsalted mutable one. Needed locally (never sent on the wire) to
    /// re-derive the target and signed message when validating a
    /// responder's claimed value.
    pub async fn get_data(&self, target: NodeId, seq: Option<i64>, salt: &[u8]) -> DataResult {
        let salt = truncate_salt(salt).to_vec();
        let outcome = self.act(target, PreVerb::Get { seq, salt }, None).await;
        match outcome.best_value {
            Some(lookup::PreResponse::Value { v, seq, .. }) => {
                DataResult { num_visited: outcome.num_visited, v: Some(v), seq }
            }
            _ => DataResult { num_visited: outcome.num_visited, v: None, seq: None },
        }
    }

    /// Stores an immutable value. Returns the target it was stored at.
    pub async fn put_immutable(&self, v: Value) -> Result<(NodeId, ActOutcome)> {
        if v.encode().len() > MAX_VALUE_LEN {
            return Err(ErrorKind::ValueTooLarge { len: v.encode().len() }.into());
        }
        let target = bep44::immutable_target(&v);
        let post = PostIntent::PutFixed { v, k: None, seq: None, sig: None, salt: Vec::new() };
        let outcome = self.act(target, PreVerb::Get { seq: None, salt: Vec::new() }, Some(post)).await;
        Ok((target, outcome))
    }

    /// Stores a mutable value signed with our own keypair, bumping `seq`
    /// past whatever we can currently see stored at the target.
    pub async fn put_mutable(&self, v: Value, salt: &[u8], seq: i64) -> Result<(NodeId, ActOutcome)> {
        if v.encode().len() > MAX_VALUE_LEN {
            return Err(ErrorKind::ValueTooLarge { len: v.encode().len() }.into());
        }
        let salt = truncate_salt(salt);
        let k = { self.identity.lock().unwrap().public_key() };
        let target = bep44::mutable_target(&k, salt);
        let signed = bep44::pack_seq_salt(seq, &v, salt);
        let sig = { self.identity.lock().unwrap().sign(&signed) };
        let post = PostIntent::PutFixed {
            v,
            k: Some(k),
            seq: Some(seq),
            sig: Some(sig),
            salt: salt.to_vec(),
        };
        let outcome = self.act(target, PreVerb::Get { seq: None, salt: salt.to_vec() }, Some(post)).await;
        Ok((target, outcome))
    }

    /// Re-announces whatever mutable item each responding contact itself
    /// holds at `target`, without needing that item's secret key. Since a
    /// `get` response never echoes the salt an item was stored under, this
    /// can only validate (and therefore only relay) unsalted mutable items
    /// or immutable ones — a salted item's owner is the only one who can
    /// reset it via `put_mutable`.
    pub async fn put_reset(&self, target: NodeId) -> ActOutcome {
        let pre = PreVerb::Get { seq: None, salt: Vec::new() };
        self.act(target, pre, Some(PostIntent::PutReset)).await
    }

    async fn act(&self, target: NodeId, pre: PreVerb, post: Option<PostIntent>) -> ActOutcome {
        lookup::act(
            self.local_id,
            target,
            pre,
            post,
            self.routing_table.clone(),
            self.outgoing.clone(),
            self.on_v.clone(),
        )
        .await
    }
}
