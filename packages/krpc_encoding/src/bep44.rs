//! BEP44 canonical byte helpers: the signed message format and target
//! derivation for both immutable and mutable items.

use crate::bencode::Value;
use crate::node_id::{NodeId, ID_LEN};
use sha1::{Digest, Sha1};

/// Maximum encoded length of a stored/stored-candidate `v`.
pub const MAX_VALUE_LEN: usize = 1000;
/// Maximum length of a mutable item's `salt`.
pub const MAX_SALT_LEN: usize = 64;

/// `SHA-1(encode(v))`: the address of an immutable item.
pub fn immutable_target(v: &Value) -> NodeId {
    sha1_id(&v.encode())
}

/// `SHA-1(k || salt)`, or `SHA-1(k)` when `salt` is empty: the address of a
/// mutable item.
pub fn mutable_target(k: &[u8; 32], salt: &[u8]) -> NodeId {
    let mut hasher = Sha1::new();
    hasher.update(k);
    if !salt.is_empty() {
        hasher.update(salt);
    }
    let digest = hasher.finalize();
    NodeId::from_slice(&digest).expect("sha1 digest is 20 bytes")
}

fn sha1_id(bytes: &[u8]) -> NodeId {
    let digest = Sha1::digest(bytes);
    NodeId::from_slice(&digest).expect("sha1 digest is 20 bytes")
}

/// The canonical message signed (and verified) for a mutable `put`:
/// the byte concatenation of the bencode fragments for `{salt}`, `{seq}`,
/// `{v}` in that order, each fragment being the bencode of a singleton
/// dict with the leading `d` and trailing `e` stripped, and the salt
/// fragment omitted entirely when salt is empty.
///
/// This must be bit-exact: it is independent of dict key ordering only
/// because there is exactly one key per fragment.
pub fn pack_seq_salt(seq: i64, v: &Value, salt: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    if !salt.is_empty() {
        out.extend_from_slice(&singleton_fragment(b"salt", &Value::bytes(salt.to_vec())));
    }
    out.extend_from_slice(&singleton_fragment(b"seq", &Value::Int(seq)));
    out.extend_from_slice(&singleton_fragment(b"v", v));
    out
}

fn singleton_fragment(key: &[u8], value: &Value) -> Vec<u8> {
    let mut dict = Value::dict();
    dict.insert(key, value.clone());
    let encoded = dict.encode();
    // encoded is `d<key-fragment><value-fragment>e`; strip the wrapper.
    encoded[1..encoded.len() - 1].to_vec()
}

/// Truncates an over-long mutable-item salt to the maximum accepted length,
/// as the public interface's `mutableSalt` parameter does for callers that
/// hand it a long byte string directly (spec §6).
pub fn truncate_salt(salt: &[u8]) -> &[u8] {
    if salt.len() > MAX_SALT_LEN {
        &salt[..MAX_SALT_LEN]
    } else {
        salt
    }
}
