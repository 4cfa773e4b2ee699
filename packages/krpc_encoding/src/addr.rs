use crate::errors::{ErrorKind, Result};
use byteorder::{BigEndian, ByteOrder};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

pub const LOC_LEN: usize = 6;

/// A packed IPv4 + port tuple: 4 bytes of address, 2 bytes of big-endian
/// port. This is what the wire protocol calls a "compact peer info" or
/// "compact node info" trailer.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Location([u8; LOC_LEN]);

impl Location {
    pub fn from_slice(bytes: &[u8]) -> Result<Location> {
        if bytes.len() != LOC_LEN {
            return Err(ErrorKind::WrongLength {
                what: "location",
                expected: LOC_LEN,
                got: bytes.len(),
            }
            .into());
        }
        let mut buf = [0u8; LOC_LEN];
        buf.copy_from_slice(bytes);
        Ok(Location(buf))
    }

    pub fn as_bytes(&self) -> &[u8; LOC_LEN] {
        &self.0
    }

    pub fn ip(&self) -> Ipv4Addr {
        Ipv4Addr::new(self.0[0], self.0[1], self.0[2], self.0[3])
    }

    pub fn port(&self) -> u16 {
        BigEndian::read_u16(&self.0[4..6])
    }
}

impl From<SocketAddrV4> for Location {
    fn from(addr: SocketAddrV4) -> Location {
        let mut buf = [0u8; LOC_LEN];
        buf[0..4].copy_from_slice(&addr.ip().octets());
        BigEndian::write_u16(&mut buf[4..6], addr.port());
        Location(buf)
    }
}

impl From<Location> for SocketAddrV4 {
    fn from(loc: Location) -> SocketAddrV4 {
        SocketAddrV4::new(loc.ip(), loc.port())
    }
}

impl From<Location> for SocketAddr {
    fn from(loc: Location) -> SocketAddr {
        SocketAddr::V4(loc.into())
    }
}

impl std::fmt::Debug for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.ip(), self.port())
    }
}

/// An IPv4 socket address we've accepted from somewhere untrusted
/// (`a.port`, `a.id` never arrive typed). Drop non-IPv4 senders at the
/// boundary per UDPTransport's contract.
pub fn as_v4(addr: SocketAddr) -> Option<SocketAddrV4> {
    match addr {
        SocketAddr::V4(v4) => Some(v4),
        SocketAddr::V6(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_socket_addr() {
        let addr = SocketAddrV4::new(Ipv4Addr::new(192, 168, 1, 1), 6881);
        let loc: Location = addr.into();
        let back: SocketAddrV4 = loc.into();
        assert_eq!(addr, back);
    }

    #[test]
    fn packs_port_big_endian() {
        let addr = SocketAddrV4::new(Ipv4Addr::new(0, 0, 0, 0), 0x0102);
        let loc: Location = addr.into();
        assert_eq!(loc.as_bytes()[4], 0x01);
        assert_eq!(loc.as_bytes()[5], 0x02);
    }
}
