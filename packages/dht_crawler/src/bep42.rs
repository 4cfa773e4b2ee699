//! BEP42 node id security extension: ties the first three bytes of a node
//! id to a CRC32C of the node's externally-visible IPv4 address, so an
//! attacker can't cheaply mint ids clustered around a target without also
//! controlling the matching address space.

use krpc_encoding::NodeId;
use rand::RngCore;
use std::net::Ipv4Addr;

const MASK: [u8; 4] = [0x03, 0x0f, 0x3f, 0xff];

/// CRC32C (Castagnoli), bit-serial. Small enough that a lookup table buys
/// nothing at the call volumes here (once per id derivation/verification).
fn crc32c(bytes: &[u8]) -> u32 {
    let mut crc: u32 = 0xffff_ffff;
    for &byte in bytes {
        crc ^= byte as u32;
        for _ in 0..8 {
            crc = if crc & 1 != 0 { (crc >> 1) ^ 0x82f6_3b78 } else { crc >> 1 };
        }
    }
    !crc
}

fn masked_address(addr: Ipv4Addr, rand8: u8) -> [u8; 4] {
    let mut octets = addr.octets();
    for i in 0..4 {
        octets[i] &= MASK[i];
    }
    octets[0] |= (rand8 & 0x7) << 5;
    octets
}

/// Derives a fresh BEP42-compliant id for `addr`. `rand8` seeds both the
/// low 3 bits of the masked address and the id's last byte; callers pass a
/// fresh random byte per derivation.
pub fn derive_id(addr: Ipv4Addr, rand8: u8) -> NodeId {
    let crc = crc32c(&masked_address(addr, rand8));
    let mut bytes = [0u8; 20];
    bytes[0] = (crc >> 24) as u8;
    bytes[1] = (crc >> 16) as u8;
    bytes[2] = (((crc >> 8) & 0xf8) as u8) | (rand8 & 0x7);
    rand::thread_rng().fill_bytes(&mut bytes[3..19]);
    bytes[19] = rand8;
    NodeId::new(bytes)
}

/// Checks whether `id` is a BEP42-compliant derivation for `addr`. Per spec
/// this never gates query handling by itself -- non-compliant senders are
/// flagged (see `events::Event`), not rejected.
pub fn verify(addr: Ipv4Addr, id: &NodeId) -> bool {
    let bytes = id.as_bytes();
    let rand8 = bytes[19];
    let crc = crc32c(&masked_address(addr, rand8));
    bytes[0] == (crc >> 24) as u8
        && bytes[1] == (crc >> 16) as u8
        && (bytes[2] & 0xf8) == ((crc >> 8) & 0xf8) as u8
        && (bytes[2] & 0x7) == (rand8 & 0x7)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_id_passes_its_own_check() {
        let addr = Ipv4Addr::new(192, 168, 1, 1);
        let id = derive_id(addr, 0x17);
        assert!(verify(addr, &id));
    }

    #[test]
    fn tampered_prefix_fails_check() {
        let addr = Ipv4Addr::new(192, 168, 1, 1);
        let id = derive_id(addr, 0x17);
        let mut bytes = *id.as_bytes();
        bytes[0] ^= 0xff;
        assert!(!verify(addr, &NodeId::new(bytes)));
    }

    #[test]
    fn check_fails_against_a_different_address() {
        let id = derive_id(Ipv4Addr::new(192, 168, 1, 1), 0x17);
        assert!(!verify(Ipv4Addr::new(10, 0, 0, 1), &id));
    }

    #[test]
    fn random_id_almost_never_passes_check() {
        let addr = Ipv4Addr::new(203, 0, 113, 4);
        assert!(!verify(addr, &NodeId::new([0u8; 20])));
    }
}
