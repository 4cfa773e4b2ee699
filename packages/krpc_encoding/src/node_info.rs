use crate::addr::{Location, LOC_LEN};
use crate::errors::{ErrorKind, Result};
use crate::node_id::{NodeId, ID_LEN};

pub const NODE_INFO_LEN: usize = ID_LEN + LOC_LEN;

/// A `node` on the wire: the 26-byte concatenation `id || loc`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NodeInfo {
    pub id: NodeId,
    pub loc: Location,
}

impl NodeInfo {
    pub fn new(id: NodeId, loc: Location) -> NodeInfo {
        NodeInfo { id, loc }
    }

    pub fn pack(&self) -> [u8; NODE_INFO_LEN] {
        let mut out = [0u8; NODE_INFO_LEN];
        out[0..ID_LEN].copy_from_slice(self.id.as_bytes());
        out[ID_LEN..].copy_from_slice(self.loc.as_bytes());
        out
    }

    pub fn unpack(bytes: &[u8]) -> Result<NodeInfo> {
        if bytes.len() != NODE_INFO_LEN {
            return Err(ErrorKind::WrongLength {
                what: "node info",
                expected: NODE_INFO_LEN,
                got: bytes.len(),
            }
            .into());
        }
        Ok(NodeInfo {
            id: NodeId::from_slice(&bytes[0..ID_LEN])?,
            loc: Location::from_slice(&bytes[ID_LEN..])?,
        })
    }
}

/// Packs a sequence of nodes as the concatenation of their 26-byte forms,
/// as used in `find_node`/`get_peers` responses and bootstrap lists.
pub fn pack_nodes(nodes: &[NodeInfo]) -> Vec<u8> {
    let mut out = Vec::with_capacity(nodes.len() * NODE_INFO_LEN);
    for n in nodes {
        out.extend_from_slice(&n.pack());
    }
    out
}

/// Unpacks a concatenated nodes buffer, rejecting a length that isn't a
/// multiple of 26 bytes.
pub fn unpack_nodes(bytes: &[u8]) -> Result<Vec<NodeInfo>> {
    if bytes.len() % NODE_INFO_LEN != 0 {
        return Err(ErrorKind::InvalidBencode { offset: bytes.len() }.into());
    }
    bytes
        .chunks_exact(NODE_INFO_LEN)
        .map(NodeInfo::unpack)
        .collect()
}

/// Unpacks a concatenated 6-byte locations buffer (BEP5 `values`/bootstrap
/// list), rejecting a length that isn't a multiple of 6 bytes.
pub fn unpack_locations(bytes: &[u8]) -> Result<Vec<Location>> {
    if bytes.len() % LOC_LEN != 0 {
        return Err(ErrorKind::InvalidBencode { offset: bytes.len() }.into());
    }
    bytes.chunks_exact(LOC_LEN).map(Location::from_slice).collect()
}

pub fn pack_locations(locs: &[Location]) -> Vec<u8> {
    let mut out = Vec::with_capacity(locs.len() * LOC_LEN);
    for l in locs {
        out.extend_from_slice(l.as_bytes());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, SocketAddrV4};

    #[test]
    fn round_trips_a_node_list() {
        let nodes = vec![
            NodeInfo::new(
                NodeId::random(),
                SocketAddrV4::new(Ipv4Addr::new(1, 2, 3, 4), 6881).into(),
            ),
            NodeInfo::new(
                NodeId::random(),
                SocketAddrV4::new(Ipv4Addr::new(5, 6, 7, 8), 6882).into(),
            ),
        ];
        let packed = pack_nodes(&nodes);
        assert_eq!(packed.len(), 2 * NODE_INFO_LEN);
        let unpacked = unpack_nodes(&packed).unwrap();
        assert_eq!(unpacked, nodes);
    }

    #[test]
    fn rejects_misaligned_node_buffers() {
        assert!(unpack_nodes(&[0u8; 25]).is_err());
    }
}
