//! Transaction-id allocation, the pending/waiting tables, and the 100ms
//! timeout sweep (spec §4.4).

use crate::transport::UdpTransport;
use krpc_encoding::bencode::Value;
use krpc_encoding::addr::as_v4;
use krpc_encoding::message::MessageKind;
use krpc_encoding::{Message, NodeId};
use routing_table::RoutingTable;
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

/// 5 ticks * 100ms = 500ms per-query timeout.
pub const DEFAULT_TICKS: u8 = 5;
/// Hard cap on the pending table; overflow parks in the waiting FIFO.
pub const PENDING_CAP: usize = 20;

#[derive(Debug, Clone)]
pub enum QueryOutcome {
    Success(Value),
    Error { code: i64, message: String },
    Timeout,
}

struct PendingEntry {
    ticks: u8,
    tx: oneshot::Sender<QueryOutcome>,
}

struct WaitingEntry {
    tid: u16,
    verb: String,
    args: Value,
    dest: SocketAddr,
    tx: oneshot::Sender<QueryOutcome>,
}

#[derive(Default)]
struct State {
    next_tid: u16,
    pending: HashMap<u16, PendingEntry>,
    waiting: VecDeque<WaitingEntry>,
}

/// Owns outgoing transaction bookkeeping for one node. Cheap to clone
/// (everything interior is `Arc`-backed) so concurrent `populate`/`act`
/// sub-tasks can each hold a handle.
#[derive(Clone)]
pub struct OutgoingQueries {
    transport: Arc<UdpTransport>,
    routing_table: Arc<Mutex<RoutingTable>>,
    state: Arc<Mutex<State>>,
    timeout_ticks: u8,
}

impl OutgoingQueries {
    pub fn new(transport: Arc<UdpTransport>, routing_table: Arc<Mutex<RoutingTable>>) -> OutgoingQueries {
        OutgoingQueries {
            transport,
            routing_table,
            state: Arc::new(Mutex::new(State::default())),
            timeout_ticks: DEFAULT_TICKS,
        }
    }

    /// Builds with a caller-supplied timeout budget expressed in tick
    /// counts, as wired from `DhtConfig::query_timeout` / `tick_interval`
    /// rather than the spec's literal 5-tick default.
    pub fn with_timeout_ticks(
        transport: Arc<UdpTransport>,
        routing_table: Arc<Mutex<RoutingTable>>,
        timeout_ticks: u8,
    ) -> OutgoingQueries {
        OutgoingQueries {
            transport,
            routing_table,
            state: Arc::new(Mutex::new(State::default())),
            timeout_ticks: timeout_ticks.max(1),
        }
    }

    /// Sends `verb(args)` to `dest` and suspends until either a matching
    /// response/error arrives (via `complete`) or the query times out.
    pub async fn query(&self, dest: SocketAddr, verb: &str, args: Value) -> QueryOutcome {
        let (tx, rx) = oneshot::channel();
        let send_now = {
            let mut state = self.state.lock().unwrap();
            let tid = state.next_tid;
            state.next_tid = state.next_tid.wrapping_add(1);
            if state.pending.len() < PENDING_CAP {
                state.pending.insert(tid, PendingEntry { ticks: self.timeout_ticks, tx });
                Some((tid, args.clone()))
            } else {
                state.waiting.push_back(WaitingEntry {
                    tid,
                    verb: verb.to_string(),
                    args,
                    dest,
                    tx,
                });
                None
            }
        };

        if let Some((tid, args)) = send_now {
            let msg = Message::query(tid.to_be_bytes().to_vec(), verb, args);
            let _ = self.transport.send(dest, &msg).await;
        }

        rx.await.unwrap_or(QueryOutcome::Timeout)
    }

    /// Drives one 100ms step: ages pending entries out (firing their
    /// continuation with `Timeout`), then promotes as many waiting entries
    /// into the now-freed pending slots as fit, sending their first
    /// datagram.
    pub async fn tick(&self) {
        let (expired, promoted) = {
            let mut state = self.state.lock().unwrap();

            let expired_tids: Vec<u16> = state
                .pending
                .iter_mut()
                .filter_map(|(&tid, entry)| {
                    entry.ticks = entry.ticks.saturating_sub(1);
                    if entry.ticks == 0 { Some(tid) } else { None }
                })
                .collect();
            let mut expired = Vec::new();
            for tid in expired_tids {
                if let Some(entry) = state.pending.remove(&tid) {
                    expired.push(entry);
                }
            }

            let mut promoted = Vec::new();
            while state.pending.len() < PENDING_CAP {
                match state.waiting.pop_front() {
                    Some(w) => promoted.push(w),
                    None => break,
                }
            }

            (expired, promoted)
        };

        for entry in expired {
            let _ = entry.tx.send(QueryOutcome::Timeout);
        }

        for w in promoted {
            let msg = Message::query(w.tid.to_be_bytes().to_vec(), &w.verb, w.args);
            let _ = self.transport.send(w.dest, &msg).await;
            self.state.lock().unwrap().pending.insert(
                w.tid,
                PendingEntry { ticks: self.timeout_ticks, tx: w.tx },
            );
        }
    }

    /// Matches an inbound response/error against the pending table by
    /// transaction id. Unknown/expired ids (already timed out, or a
    /// duplicate/delayed reply past the window) are ignored. On a
    /// successful response, inserts the responder into the routing table.
    pub fn complete(&self, src: SocketAddr, message: Message) {
        let tid = match tid_of(&message.transaction_id) {
            Some(tid) => tid,
            None => return,
        };
        let entry = { self.state.lock().unwrap().pending.remove(&tid) };
        let entry = match entry {
            Some(e) => e,
            None => return,
        };

        let outcome = match message.kind {
            MessageKind::Response => {
                let body = message.body.expect("response validated to carry r.id");
                if let (Some(id_bytes), Some(v4)) = (body.get_bytes(b"id"), as_v4(src)) {
                    if let Ok(id) = NodeId::from_slice(id_bytes) {
                        self.routing_table.lock().unwrap().add(id, v4.into());
                    }
                }
                QueryOutcome::Success(body)
            }
            MessageKind::Error => {
                let (code, msg) = message.error.expect("error validated to carry [code, msg]");
                QueryOutcome::Error { code, message: msg }
            }
            MessageKind::Query => return, // not a response we're waiting on
        };

        let _ = entry.tx.send(outcome);
    }

    pub fn pending_len(&self) -> usize {
        self.state.lock().unwrap().pending.len()
    }

    pub fn waiting_len(&self) -> usize {
        self.state.lock().unwrap().waiting.len()
    }
}

fn tid_of(bytes: &[u8]) -> Option<u16> {
    if bytes.len() != 2 {
        return None;
    }
    Some(u16::from_be_bytes([bytes[0], bytes[1]]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use krpc_encoding::NodeId;
    use std::time::Duration;

    fn table() -> Arc<Mutex<RoutingTable>> {
        Arc::new(Mutex::new(RoutingTable::new(NodeId::random())))
    }

    #[tokio::test]
    async fn times_out_after_five_ticks_with_no_response() {
        let transport = Arc::new(UdpTransport::bind(0).await.unwrap());
        let dest: SocketAddr = "127.0.0.1:1".parse().unwrap(); // nothing listening
        let oq = OutgoingQueries::new(transport, table());

        let oq2 = oq.clone();
        let query = tokio::spawn(async move {
            oq2.query(dest, "ping", Value::dict()).await
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        for _ in 0..DEFAULT_TICKS {
            oq.tick().await;
        }

        let outcome = query.await.unwrap();
        assert!(matches!(outcome, QueryOutcome::Timeout));
    }

    #[tokio::test]
    async fn overflow_queries_wait_then_promote() {
        let transport = Arc::new(UdpTransport::bind(0).await.unwrap());
        let dest: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let oq = OutgoingQueries::new(transport, table());

        for _ in 0..PENDING_CAP {
            let oq2 = oq.clone();
            tokio::spawn(async move { oq2.query(dest, "ping", Value::dict()).await });
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(oq.pending_len(), PENDING_CAP);

        let oq2 = oq.clone();
        let extra = tokio::spawn(async move { oq2.query(dest, "ping", Value::dict()).await });
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(oq.waiting_len(), 1);

        for _ in 0..DEFAULT_TICKS {
            oq.tick().await;
        }
        assert_eq!(oq.waiting_len(), 0);
        // The promoted query now has a fresh tick budget of its own.
        for _ in 0..DEFAULT_TICKS {
            oq.tick().await;
        }
        let outcome = extra.await.unwrap();
        assert!(matches!(outcome, QueryOutcome::Timeout));
    }
}
