use crate::errors::{ErrorKind, Result};
use krpc_encoding::addr::as_v4;
use krpc_encoding::Message;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Mutex;
use tokio::net::UdpSocket;

/// Datagrams from a single source crossing this count within the current
/// housekeeping window get flagged as spam; further datagrams from that
/// source are dropped until the window resets.
pub const SPAM_THRESHOLD: u32 = 10;

const MAX_DATAGRAM: usize = 4096;

#[derive(Debug)]
pub enum RecvOutcome {
    Message(SocketAddr, Message),
    /// Emitted exactly once per source per window, the instant it crosses
    /// `SPAM_THRESHOLD`. The triggering datagram itself is discarded.
    Spam(SocketAddr),
}

/// The UDP socket plus per-source spam accounting. Binds IPv4 only.
pub struct UdpTransport {
    socket: UdpSocket,
    spam_counts: Mutex<HashMap<SocketAddr, u32>>,
}

impl UdpTransport {
    pub async fn bind(port: u16) -> Result<UdpTransport> {
        let addr: SocketAddr = ([0, 0, 0, 0], port).into();
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|cause| ErrorKind::BindFailed { port, cause })?;
        Ok(UdpTransport {
            socket,
            spam_counts: Mutex::new(HashMap::new()),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub async fn send(&self, dest: SocketAddr, message: &Message) -> Result<()> {
        let bytes = message.encode();
        self.socket
            .send_to(&bytes, dest)
            .await
            .map_err(|cause| ErrorKind::SendFailed { dest, cause })?;
        Ok(())
    }

    /// Waits for the next datagram worth surfacing: a well-formed message
    /// from an IPv4 source under the spam threshold, or a one-shot spam
    /// notification for a source that just crossed it. Non-IPv4 senders,
    /// malformed bencode, and already-flagged spam sources are consumed
    /// silently and this keeps looping past them.
    pub async fn recv(&self) -> Result<RecvOutcome> {
        let mut buf = [0u8; MAX_DATAGRAM];
        loop {
            let (n, src) = self
                .socket
                .recv_from(&mut buf)
                .await
                .map_err(|cause| ErrorKind::RecvFailed { cause })?;

            if as_v4(src).is_none() {
                continue;
            }

            let count = {
                let mut counts = self.spam_counts.lock().unwrap();
                let c = counts.entry(src).or_insert(0);
                *c += 1;
                *c
            };

            if count > SPAM_THRESHOLD + 1 {
                continue;
            }
            if count == SPAM_THRESHOLD + 1 {
                return Ok(RecvOutcome::Spam(src));
            }

            match Message::decode(&buf[..n]) {
                Ok(message) => return Ok(RecvOutcome::Message(src, message)),
                Err(e) => {
                    log::trace!("dropping malformed datagram from {}: {}", src, e);
                    continue;
                }
            }
        }
    }

    /// Wipes the spam counter map, as the 5-minute housekeeping tick does.
    pub fn reset_spam_counters(&self) {
        self.spam_counts.lock().unwrap().clear();
    }
}
