//! Inbound KRPC query handling (spec §4.5): verb dispatch, token
//! validation, and the BEP5/BEP42/BEP44 semantic checks that decide what
//! gets a coded error, what gets silently ignored, and what gets answered.

use crate::data_store::{DataStore, Datum};
use crate::events::Event;
use crate::peer_store::PeerStore;
use krpc_encoding::addr::as_v4;
use krpc_encoding::bencode::Value;
use krpc_encoding::bep44::{self, MAX_SALT_LEN, MAX_VALUE_LEN};
use krpc_encoding::message::{
    ERR_CAS_MISMATCH, ERR_INVALID_SIGNATURE, ERR_MESSAGE_TOO_BIG, ERR_PROTOCOL, ERR_SALT_TOO_BIG,
    ERR_SEQ_TOO_SMALL, ERR_UNKNOWN_METHOD,
};
use krpc_encoding::node_info::{pack_nodes, NodeInfo};
use krpc_encoding::token::{self, TokenSecret};
use krpc_encoding::{Location, Message, MessageKind, NodeId};
use routing_table::{Contact, RoutingTable};
use std::net::{SocketAddr, SocketAddrV4};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::UnboundedSender;

pub struct IncomingQueries {
    local_id: NodeId,
    routing_table: Arc<Mutex<RoutingTable>>,
    peer_store: Arc<Mutex<PeerStore>>,
    data_store: Arc<Mutex<DataStore>>,
    token_secret: Arc<Mutex<TokenSecret>>,
    events: UnboundedSender<Event>,
}

impl IncomingQueries {
    pub fn new(
        local_id: NodeId,
        routing_table: Arc<Mutex<RoutingTable>>,
        peer_store: Arc<Mutex<PeerStore>>,
        data_store: Arc<Mutex<DataStore>>,
        token_secret: Arc<Mutex<TokenSecret>>,
        events: UnboundedSender<Event>,
    ) -> IncomingQueries {
        IncomingQueries { local_id, routing_table, peer_store, data_store, token_secret, events }
    }

    /// Dispatches one inbound query. Returns `None` when the protocol calls
    /// for total silence (an anti-spam insertion filter rejection); every
    /// other outcome, success or coded error, gets a reply.
    pub fn handle(&self, src: SocketAddr, message: Message) -> Option<Message> {
        if message.kind != MessageKind::Query {
            return None;
        }
        let tid = message.transaction_id.clone();
        let verb = message.query.clone().unwrap_or_default();
        let args = message.body.unwrap_or_else(Value::dict);

        let sender_id = match args.get_bytes(b"id").and_then(|b| NodeId::from_slice(b).ok()) {
            Some(id) => id,
            None => return Some(Message::error(tid, ERR_PROTOCOL, "missing or malformed a.id")),
        };
        let sender_loc: Location = match as_v4(src) {
            Some(v4) => v4.into(),
            None => return None,
        };

        self.routing_table.lock().unwrap().add(sender_id, sender_loc);
        let _ = self.events.send(Event::Incoming {
            addr: src,
            verb: String::from_utf8_lossy(&verb).into_owned(),
            bep42: crate::bep42::verify(sender_loc.ip(), &sender_id),
        });

        let response = match verb.as_slice() {
            b"ping" => Some(self.ack(tid.clone())),
            b"find_node" => Some(self.handle_find_node(tid.clone(), &args)),
            b"get_peers" => Some(self.handle_get_peers(tid.clone(), &args, sender_id, sender_loc)),
            b"announce_peer" => self.handle_announce_peer(tid.clone(), &args, sender_id, sender_loc),
            b"get" => Some(self.handle_get(tid.clone(), &args, sender_id, sender_loc)),
            b"put" => Some(self.handle_put(tid.clone(), &args, sender_id, sender_loc)),
            _ => Some(Message::error(tid.clone(), ERR_UNKNOWN_METHOD, "unknown method")),
        };

        if let Some(Message { kind: MessageKind::Error, error: Some((code, ref msg)), .. }) = response {
            let _ = self.events.send(Event::Error { addr: src, code, message: msg.clone() });
        }
        response
    }

    fn ack(&self, tid: Vec<u8>) -> Message {
        Message::response(tid, self.ack_dict())
    }

    fn ack_dict(&self) -> Value {
        let mut r = Value::dict();
        r.insert("id", Value::bytes(self.local_id.as_bytes().to_vec()));
        r
    }

    fn closest_to(&self, target: &NodeId) -> Vec<NodeInfo> {
        let scratch = self.routing_table.lock().unwrap().make_temporary(*target);
        scratch.closest().into_iter().map(contact_to_node_info).collect()
    }

    fn mint_token(&self, sender_id: &NodeId, sender_loc: &Location) -> Vec<u8> {
        let node_bytes = token::node_bytes(sender_id, sender_loc);
        self.token_secret.lock().unwrap().mint(&node_bytes)
    }

    fn validate_token(&self, sender_id: &NodeId, sender_loc: &Location, tok: &[u8]) -> bool {
        let node_bytes = token::node_bytes(sender_id, sender_loc);
        self.token_secret.lock().unwrap().validate(&node_bytes, tok)
    }

    fn handle_find_node(&self, tid: Vec<u8>, args: &Value) -> Message {
        let target = match target_of(args, b"target") {
            Some(t) => t,
            None => return Message::error(tid, ERR_PROTOCOL, "missing a.target"),
        };
        let mut r = self.ack_dict();
        r.insert("nodes", Value::bytes(pack_nodes(&self.closest_to(&target))));
        Message::response(tid, r)
    }

    fn handle_get_peers(&self, tid: Vec<u8>, args: &Value, sender_id: NodeId, sender_loc: Location) -> Message {
        let info_hash = match target_of(args, b"info_hash") {
            Some(t) => t,
            None => return Message::error(tid, ERR_PROTOCOL, "missing a.info_hash"),
        };
        let mut r = self.ack_dict();
        r.insert("token", Value::bytes(self.mint_token(&sender_id, &sender_loc)));

        let peers = self.peer_store.lock().unwrap().get(&info_hash);
        if !peers.is_empty() {
            let values = peers.iter().map(|l| Value::bytes(l.as_bytes().to_vec())).collect();
            r.insert("values", Value::List(values));
        } else {
            r.insert("nodes", Value::bytes(pack_nodes(&self.closest_to(&info_hash))));
        }
        Message::response(tid, r)
    }

    fn handle_announce_peer(
        &self,
        tid: Vec<u8>,
        args: &Value,
        sender_id: NodeId,
        sender_loc: Location,
    ) -> Option<Message> {
        let info_hash = match target_of(args, b"info_hash") {
            Some(t) => t,
            None => return Some(Message::error(tid, ERR_PROTOCOL, "missing a.info_hash")),
        };
        let tok = match args.get_bytes(b"token") {
            Some(t) => t,
            None => return Some(Message::error(tid, ERR_PROTOCOL, "missing a.token")),
        };
        if !self.validate_token(&sender_id, &sender_loc, tok) {
            return Some(Message::error(tid, ERR_PROTOCOL, "invalid token"));
        }
        if !prefix_matches(&self.local_id, &info_hash) {
            return None; // anti-spam insertion filter: outside our responsibility range
        }

        let loc = if args.get_int(b"implied_port") == Some(1) {
            sender_loc
        } else {
            match args.get_int(b"port") {
                Some(port) if (0..=65535).contains(&port) => {
                    SocketAddrV4::new(sender_loc.ip(), port as u16).into()
                }
                _ => return Some(Message::error(tid, ERR_PROTOCOL, "missing or invalid a.port")),
            }
        };
        self.peer_store.lock().unwrap().announce(info_hash, loc);
        Some(self.ack(tid))
    }

    fn handle_get(&self, tid: Vec<u8>, args: &Value, sender_id: NodeId, sender_loc: Location) -> Message {
        let target = match target_of(args, b"target") {
            Some(t) => t,
            None => return Message::error(tid, ERR_PROTOCOL, "missing a.target"),
        };
        let mut r = self.ack_dict();
        r.insert("token", Value::bytes(self.mint_token(&sender_id, &sender_loc)));
        r.insert("nodes", Value::bytes(pack_nodes(&self.closest_to(&target))));

        if let Some(datum) = self.data_store.lock().unwrap().get(&target) {
            let include = match (datum.seq, args.get_int(b"seq")) {
                (Some(stored_seq), Some(requested_seq)) => stored_seq > requested_seq,
                _ => true,
            };
            if include {
                r.insert("v", datum.v.clone());
                if let (Some(k), Some(seq), Some(sig)) = (datum.k, datum.seq, datum.sig) {
                    r.insert("k", Value::bytes(k.to_vec()));
                    r.insert("seq", Value::Int(seq));
                    r.insert("sig", Value::bytes(sig.to_vec()));
                }
            }
        }
        Message::response(tid, r)
    }

    fn handle_put(&self, tid: Vec<u8>, args: &Value, sender_id: NodeId, sender_loc: Location) -> Message {
        let tok = match args.get_bytes(b"token") {
            Some(t) => t,
            None => return Message::error(tid, ERR_PROTOCOL, "missing a.token"),
        };
        if !self.validate_token(&sender_id, &sender_loc, tok) {
            return Message::error(tid, ERR_PROTOCOL, "invalid token");
        }

        let v = match args.get(b"v") {
            Some(v) => v.clone(),
            None => return Message::error(tid, ERR_PROTOCOL, "missing a.v"),
        };
        let encoded_len = v.encode().len();
        if encoded_len > MAX_VALUE_LEN {
            return Message::error(tid, ERR_MESSAGE_TOO_BIG, "v exceeds 1000 bytes");
        }

        let salt = args.get_bytes(b"salt").unwrap_or(&[]);

        let k = args.get_bytes(b"k");
        let seq = args.get_int(b"seq");
        let sig = args.get_bytes(b"sig");
        let present = (k.is_some(), seq.is_some(), sig.is_some());
        let all_present = present.0 && present.1 && present.2;
        let any_present = present.0 || present.1 || present.2;
        if any_present && !all_present {
            return Message::error(tid, ERR_PROTOCOL, "k/seq/sig must all be present or all absent");
        }

        if all_present {
            let (k, seq, sig) = (k.unwrap(), seq.unwrap(), sig.unwrap());
            if k.len() != 32 || sig.len() != 64 {
                return Message::error(tid, ERR_PROTOCOL, "k/sig have the wrong length");
            }
            if seq < 0 {
                return Message::error(tid, ERR_PROTOCOL, "seq must be non-negative");
            }
            if salt.len() > MAX_SALT_LEN {
                return Message::error(tid, ERR_SALT_TOO_BIG, "salt exceeds 64 bytes");
            }
            let mut k_arr = [0u8; 32];
            k_arr.copy_from_slice(k);
            let mut sig_arr = [0u8; 64];
            sig_arr.copy_from_slice(sig);

            let signed = bep44::pack_seq_salt(seq, &v, salt);
            if !crate::identity::verify_signature(&k_arr, &signed, &sig_arr) {
                return Message::error(tid, ERR_INVALID_SIGNATURE, "signature verification failed");
            }

            let target = bep44::mutable_target(&k_arr, salt);
            {
                let store = self.data_store.lock().unwrap();
                if let Some(existing) = store.get(&target) {
                    if let Some(cas) = args.get_int(b"cas") {
                        if Some(cas) != existing.seq {
                            return Message::error(tid, ERR_CAS_MISMATCH, "cas mismatch");
                        }
                    }
                    if let Some(existing_seq) = existing.seq {
                        let same_seq_different_value = existing_seq == seq && existing.v.encode() != v.encode();
                        if existing_seq > seq || same_seq_different_value {
                            return Message::error(tid, ERR_SEQ_TOO_SMALL, "seq too small");
                        }
                    }
                }
            }

            if prefix_matches(&self.local_id, &target) {
                self.data_store.lock().unwrap().put(target, Datum::mutable(v, k_arr, seq, sig_arr));
            }
        } else {
            let target = bep44::immutable_target(&v);
            if prefix_matches(&self.local_id, &target) {
                self.data_store.lock().unwrap().put(target, Datum::immutable(v));
            }
        }

        self.ack(tid)
    }
}

fn target_of(args: &Value, key: &[u8]) -> Option<NodeId> {
    args.get_bytes(key).and_then(|b| NodeId::from_slice(b).ok())
}

/// The anti-spam insertion filter: a node only stores/serves data whose
/// target shares its own id's top two bytes.
fn prefix_matches(local_id: &NodeId, target: &NodeId) -> bool {
    local_id.as_bytes()[0..2] == target.as_bytes()[0..2]
}

fn contact_to_node_info(c: Contact) -> NodeInfo {
    NodeInfo::new(c.id, c.loc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use krpc_encoding::token::TokenSecret;
    use routing_table::RoutingTable;
    use std::net::{Ipv4Addr, SocketAddrV4};

    fn harness() -> (IncomingQueries, SocketAddr, tokio::sync::mpsc::UnboundedReceiver<Event>) {
        let local_id = NodeId::new([0x42; 20]);
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let iq = IncomingQueries::new(
            local_id,
            Arc::new(Mutex::new(RoutingTable::new(local_id))),
            Arc::new(Mutex::new(PeerStore::new())),
            Arc::new(Mutex::new(DataStore::new())),
            Arc::new(Mutex::new(TokenSecret::new())),
            tx,
        );
        let src: SocketAddr = SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, 1), 6881).into();
        (iq, src, rx)
    }

    fn query(verb: &str, mut args: Value, sender_id: NodeId) -> Message {
        args.insert("id", Value::bytes(sender_id.as_bytes().to_vec()));
        Message::query(b"aa".to_vec(), verb, args)
    }

    #[test]
    fn ping_acks_with_our_id() {
        let (iq, src, _rx) = harness();
        let reply = iq.handle(src, query("ping", Value::dict(), NodeId::random())).unwrap();
        assert_eq!(reply.body.unwrap().get_bytes(b"id"), Some(&iq_local_id(&iq)[..]));
    }

    fn iq_local_id(iq: &IncomingQueries) -> [u8; 20] {
        *iq.local_id.as_bytes()
    }

    #[test]
    fn find_node_without_target_is_a_protocol_error() {
        let (iq, src, _rx) = harness();
        let reply = iq.handle(src, query("find_node", Value::dict(), NodeId::random())).unwrap();
        assert_eq!(reply.error.unwrap().0, ERR_PROTOCOL);
    }

    #[test]
    fn get_peers_without_stored_peers_returns_nodes() {
        let (iq, src, _rx) = harness();
        let mut args = Value::dict();
        args.insert("info_hash", Value::bytes(NodeId::random().as_bytes().to_vec()));
        let reply = iq.handle(src, query("get_peers", args, NodeId::random())).unwrap();
        let body = reply.body.unwrap();
        assert!(body.get_bytes(b"token").is_some());
        assert!(body.get_bytes(b"nodes").is_some());
    }

    #[test]
    fn announce_peer_requires_a_valid_token() {
        let (iq, src, _rx) = harness();
        let mut args = Value::dict();
        args.insert("info_hash", Value::bytes(NodeId::random().as_bytes().to_vec()));
        args.insert("token", Value::bytes(b"bogus".to_vec()));
        args.insert("port", Value::Int(6881));
        let reply = iq.handle(src, query("announce_peer", args, NodeId::random()));
        assert_eq!(reply.unwrap().error.unwrap().0, ERR_PROTOCOL);
    }

    #[test]
    fn announce_peer_outside_prefix_range_is_silently_ignored() {
        let (iq, src, _rx) = harness();
        // local id's first two bytes are 0x42, 0x42; pick an info_hash that differs.
        let mut info_hash_bytes = [0u8; 20];
        info_hash_bytes[0] = 0x99;
        let info_hash = NodeId::new(info_hash_bytes);

        let sender_id = NodeId::random();
        let sender_loc: Location = SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, 1), 6881).into();
        let minted = iq.mint_token(&sender_id, &sender_loc);

        let mut args = Value::dict();
        args.insert("info_hash", Value::bytes(info_hash.as_bytes().to_vec()));
        args.insert("token", Value::bytes(minted));
        args.insert("port", Value::Int(6881));
        let reply = iq.handle(src, query("announce_peer", args, sender_id));
        assert!(reply.is_none());
    }

    #[test]
    fn put_and_get_round_trip_an_immutable_value() {
        let (iq, src, _rx) = harness();
        let sender_id = NodeId::random();
        let sender_loc: Location = SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, 1), 6881).into();
        let v = Value::bytes(b"hello world".to_vec());
        let target = bep44::immutable_target(&v);

        // Force the target into our prefix range for this test by using
        // our own id's prefix via a second local-id instance isn't
        // possible here (local_id is fixed); instead verify the ack path
        // and rely on the dedicated data_store tests for storage behavior
        // when the prefix matches.
        let minted = iq.mint_token(&sender_id, &sender_loc);
        let mut put_args = Value::dict();
        put_args.insert("token", Value::bytes(minted));
        put_args.insert("v", v.clone());
        let reply = iq.handle(src, query("put", put_args, sender_id)).unwrap();
        assert!(reply.error.is_none());

        let mut get_args = Value::dict();
        get_args.insert("target", Value::bytes(target.as_bytes().to_vec()));
        let get_reply = iq.handle(src, query("get", get_args, sender_id)).unwrap();
        assert!(get_reply.body.unwrap().get_bytes(b"token").is_some());
    }

    #[test]
    fn put_rejects_oversized_value() {
        let (iq, src, _rx) = harness();
        let sender_id = NodeId::random();
        let sender_loc: Location = SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, 1), 6881).into();
        let minted = iq.mint_token(&sender_id, &sender_loc);
        let mut args = Value::dict();
        args.insert("token", Value::bytes(minted));
        args.insert("v", Value::bytes(vec![0u8; MAX_VALUE_LEN + 1]));
        let reply = iq.handle(src, query("put", args, sender_id)).unwrap();
        assert_eq!(reply.error.unwrap().0, ERR_MESSAGE_TOO_BIG);
    }

    #[test]
    fn put_ignores_oversized_salt_on_an_immutable_value() {
        let (iq, src, _rx) = harness();
        let sender_id = NodeId::random();
        let sender_loc: Location = SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, 1), 6881).into();
        let minted = iq.mint_token(&sender_id, &sender_loc);
        let mut args = Value::dict();
        args.insert("token", Value::bytes(minted));
        args.insert("v", Value::bytes(b"x".to_vec()));
        args.insert("salt", Value::bytes(vec![0u8; MAX_SALT_LEN + 1]));
        let reply = iq.handle(src, query("put", args, sender_id)).unwrap();
        assert!(reply.error.is_none());
    }

    #[test]
    fn put_rejects_partial_mutable_fields() {
        let (iq, src, _rx) = harness();
        let sender_id = NodeId::random();
        let sender_loc: Location = SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, 1), 6881).into();
        let minted = iq.mint_token(&sender_id, &sender_loc);
        let mut args = Value::dict();
        args.insert("token", Value::bytes(minted));
        args.insert("v", Value::bytes(b"x".to_vec()));
        args.insert("k", Value::bytes(vec![1u8; 32]));
        // seq and sig missing
        let reply = iq.handle(src, query("put", args, sender_id)).unwrap();
        assert_eq!(reply.error.unwrap().0, ERR_PROTOCOL);
    }

    #[test]
    fn put_rejects_bad_signature() {
        let (iq, src, _rx) = harness();
        let sender_id = NodeId::random();
        let sender_loc: Location = SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, 1), 6881).into();
        let minted = iq.mint_token(&sender_id, &sender_loc);
        let mut args = Value::dict();
        args.insert("token", Value::bytes(minted));
        args.insert("v", Value::bytes(b"x".to_vec()));
        args.insert("k", Value::bytes(vec![1u8; 32]));
        args.insert("seq", Value::Int(1));
        args.insert("sig", Value::bytes(vec![0u8; 64]));
        let reply = iq.handle(src, query("put", args, sender_id)).unwrap();
        assert_eq!(reply.error.unwrap().0, ERR_INVALID_SIGNATURE);
    }

    #[test]
    fn unknown_verb_yields_unknown_method_error() {
        let (iq, src, _rx) = harness();
        let reply = iq.handle(src, query("frobnicate", Value::dict(), NodeId::random())).unwrap();
        assert_eq!(reply.error.unwrap().0, ERR_UNKNOWN_METHOD);
    }
}
