//! This node's identity: node id (fixed, random, or BEP42-derived) plus the
//! Ed25519 keypair used to sign our own mutable `put`s.

use crate::config::DhtConfig;
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use krpc_encoding::NodeId;

pub struct NodeIdentity {
    pub id: NodeId,
    signing_key: SigningKey,
}

impl NodeIdentity {
    pub fn new(config: &DhtConfig) -> NodeIdentity {
        let signing_key = match config.seed {
            Some(seed) => SigningKey::from_bytes(&seed),
            None => SigningKey::generate(&mut rand::rngs::OsRng),
        };

        let id = match (config.id, config.external_ip) {
            (Some(id), _) => id,
            (None, Some(ip)) => crate::bep42::derive_id(ip, rand::random()),
            (None, None) => NodeId::random(),
        };

        NodeIdentity { id, signing_key }
    }

    pub fn public_key(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signing_key.sign(message).to_bytes()
    }
}

/// Verifies an arbitrary peer's Ed25519 signature over a BEP44 `put`
/// payload. Standalone rather than a `NodeIdentity` method: the key being
/// checked belongs to whoever sent the `put`, not to us.
pub fn verify_signature(public_key: &[u8; 32], message: &[u8], sig: &[u8; 64]) -> bool {
    let key = match VerifyingKey::from_bytes(public_key) {
        Ok(k) => k,
        Err(_) => return false,
    };
    key.verify_strict(message, &Signature::from_bytes(sig)).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signs_and_verifies_round_trip() {
        let identity = NodeIdentity::new(&DhtConfig::default());
        let message = b"a bep44 payload fragment";
        let sig = identity.sign(message);
        assert!(verify_signature(&identity.public_key(), message, &sig));
    }

    #[test]
    fn tampered_message_fails_verification() {
        let identity = NodeIdentity::new(&DhtConfig::default());
        let sig = identity.sign(b"original");
        assert!(!verify_signature(&identity.public_key(), b"tampered", &sig));
    }

    #[test]
    fn fixed_id_takes_priority_over_derivation() {
        let fixed = NodeId::random();
        let config = DhtConfig { id: Some(fixed), external_ip: Some("1.2.3.4".parse().unwrap()), ..DhtConfig::default() };
        let identity = NodeIdentity::new(&config);
        assert_eq!(identity.id, fixed);
    }

    #[test]
    fn external_ip_without_fixed_id_derives_bep42_id() {
        let ip = "203.0.113.4".parse().unwrap();
        let config = DhtConfig { external_ip: Some(ip), ..DhtConfig::default() };
        let identity = NodeIdentity::new(&config);
        assert!(crate::bep42::verify(ip, &identity.id));
    }
}
