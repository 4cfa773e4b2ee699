//! Write tokens: short-lived, unforgeable-enough proof that the sender
//! recently received a `get_peers`/`get` response from us, required before
//! we'll accept their `announce_peer`/`put`.

use crate::node_id::NodeId;
use rand::RngCore;
use sha1::{Digest, Sha1};

pub const SECRET_LEN: usize = 20;

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Secret([u8; SECRET_LEN]);

impl Secret {
    pub fn random() -> Secret {
        let mut bytes = [0u8; SECRET_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        Secret(bytes)
    }
}

/// Two nonces, current and previous, rotated on a timer by the owning
/// housekeeping loop. Both are accepted while within the overlap window;
/// this struct doesn't own the timer, just the rotation operation.
pub struct TokenSecret {
    current: Secret,
    previous: Secret,
}

impl TokenSecret {
    pub fn new() -> TokenSecret {
        TokenSecret {
            current: Secret::random(),
            previous: Secret::random(),
        }
    }

    pub fn rotate(&mut self) {
        self.previous = self.current;
        self.current = Secret::random();
    }

    /// `token = SHA-1(node_bytes || current_secret)` where `node_bytes` is
    /// the 26-byte sender `id || loc`.
    pub fn mint(&self, node_bytes: &[u8]) -> Vec<u8> {
        mint_with(node_bytes, &self.current)
    }

    /// Accepts a token minted with either the current or previous secret.
    pub fn validate(&self, node_bytes: &[u8], token: &[u8]) -> bool {
        mint_with(node_bytes, &self.current) == token
            || mint_with(node_bytes, &self.previous) == token
    }
}

impl Default for TokenSecret {
    fn default() -> TokenSecret {
        TokenSecret::new()
    }
}

fn mint_with(node_bytes: &[u8], secret: &Secret) -> Vec<u8> {
    let mut hasher = Sha1::new();
    hasher.update(node_bytes);
    hasher.update(secret.0);
    hasher.finalize().to_vec()
}

/// Builds the 26-byte `node_bytes` used for token minting from a sender's
/// id and location.
pub fn node_bytes(id: &NodeId, loc: &crate::addr::Location) -> Vec<u8> {
    let mut out = Vec::with_capacity(26);
    out.extend_from_slice(id.as_bytes());
    out.extend_from_slice(loc.as_bytes());
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, SocketAddrV4};

    fn sample_node_bytes() -> Vec<u8> {
        let id = NodeId::random();
        let loc = SocketAddrV4::new(Ipv4Addr::new(1, 2, 3, 4), 6881).into();
        node_bytes(&id, &loc)
    }

    #[test]
    fn accepts_tokens_minted_within_two_rotations() {
        let mut secret = TokenSecret::new();
        let node_bytes = sample_node_bytes();

        let token = secret.mint(&node_bytes);
        assert!(secret.validate(&node_bytes, &token));

        secret.rotate();
        assert!(secret.validate(&node_bytes, &token));

        secret.rotate();
        assert!(!secret.validate(&node_bytes, &token));
    }

    #[test]
    fn rejects_garbage_tokens() {
        let secret = TokenSecret::new();
        let node_bytes = sample_node_bytes();
        assert!(!secret.validate(&node_bytes, b"not a real token"));
    }
}
