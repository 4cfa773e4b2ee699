use crate::errors::{ErrorKind, Result};
use rand::RngCore;
use std::fmt;

/// A 20-byte identifier: a node id, an infohash, or a BEP44 target. Distance
/// between two ids is bytewise XOR read as a big-endian 160-bit integer, so
/// lexicographic byte comparison of two `NodeId`s is already distance-ordered
/// comparison around the same reference point -- no bigint type needed.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId([u8; 20]);

pub const ID_LEN: usize = 20;

impl NodeId {
    pub fn new(bytes: [u8; ID_LEN]) -> NodeId {
        NodeId(bytes)
    }

    pub fn random() -> NodeId {
        let mut bytes = [0u8; ID_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        NodeId(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<NodeId> {
        if bytes.len() != ID_LEN {
            return Err(ErrorKind::WrongLength {
                what: "node id",
                expected: ID_LEN,
                got: bytes.len(),
            }
            .into());
        }
        let mut buf = [0u8; ID_LEN];
        buf.copy_from_slice(bytes);
        Ok(NodeId(buf))
    }

    pub fn as_bytes(&self) -> &[u8; ID_LEN] {
        &self.0
    }

    /// XOR distance to `other`, as a 20-byte big-endian value. Bit 0 (the
    /// most significant bit of byte 0) is the most significant bit of the
    /// distance.
    pub fn distance(&self, other: &NodeId) -> [u8; ID_LEN] {
        let mut out = [0u8; ID_LEN];
        for i in 0..ID_LEN {
            out[i] = self.0[i] ^ other.0[i];
        }
        out
    }

    /// Index of the first bit (0 = most significant bit of byte 0) at which
    /// `self` and `other` differ, or `None` if the ids are identical.
    pub fn first_differing_bit(&self, other: &NodeId) -> Option<usize> {
        for byte_idx in 0..ID_LEN {
            let diff = self.0[byte_idx] ^ other.0[byte_idx];
            if diff != 0 {
                let bit_in_byte = diff.leading_zeros() as usize;
                return Some(byte_idx * 8 + bit_in_byte);
            }
        }
        None
    }

    /// Value of bit `y` (0 = most significant bit of byte 0).
    pub fn bit(&self, y: usize) -> u8 {
        let byte = self.0[y / 8];
        (byte >> (7 - (y % 8))) & 1
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId(")?;
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        write!(f, ")")
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

/// Compares XOR distance from `reference` ascending: `a` before `b` if `a`
/// is closer to `reference`.
pub fn closer(reference: &NodeId, a: &NodeId, b: &NodeId) -> std::cmp::Ordering {
    a.distance(reference).cmp(&b.distance(reference))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_is_zero_for_identical_ids() {
        let id = NodeId::random();
        assert_eq!(id.distance(&id), [0u8; ID_LEN]);
    }

    #[test]
    fn first_differing_bit_matches_manual_xor() {
        let a = NodeId::new([0u8; ID_LEN]);
        let mut b_bytes = [0u8; ID_LEN];
        b_bytes[2] = 0b0000_0001; // bit 23 (0-indexed from MSB of byte 0)
        let b = NodeId::new(b_bytes);
        assert_eq!(a.first_differing_bit(&b), Some(2 * 8 + 7));
    }

    #[test]
    fn bit_extraction_matches_expectation() {
        let id = NodeId::new({
            let mut bytes = [0u8; ID_LEN];
            bytes[0] = 0b1000_0000;
            bytes
        });
        assert_eq!(id.bit(0), 1);
        assert_eq!(id.bit(1), 0);
    }

    #[test]
    fn ordering_is_lexicographic_big_endian() {
        let a = NodeId::new([0u8; ID_LEN]);
        let mut b_bytes = [0u8; ID_LEN];
        b_bytes[19] = 1;
        let b = NodeId::new(b_bytes);
        assert!(a < b);
    }
}
