//! A Mainline DHT node (BEP5/BEP42/BEP44): routing table maintenance,
//! iterative lookup, and peer/value storage, assembled from
//! `krpc_encoding`, `routing_table`, and `tokio_krpc`.
//!
//! `Dht` is the single owning struct the rest of this crate's modules hang
//! off of, replacing what the underlying protocol description frames as a
//! set of cooperating module-level singletons.

pub mod bep42;
pub mod config;
pub mod data_store;
pub mod errors;
pub mod events;
pub mod housekeeping;
pub mod identity;
pub mod incoming;
pub mod lookup;
pub mod peer_store;
pub mod public;

pub use config::DhtConfig;
pub use errors::{Error, ErrorKind, Result};
pub use events::Event;
pub use public::{DataResult, PeersResult, PublicInterface};

use data_store::DataStore;
use housekeeping::Housekeeping;
use identity::NodeIdentity;
use incoming::IncomingQueries;
use krpc_encoding::token::TokenSecret;
use krpc_encoding::{MessageKind, NodeId};
use lookup::{populate, OnV};
use peer_store::PeerStore;
use routing_table::RoutingTable;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio_krpc::{OutgoingQueries, RecvOutcome, UdpTransport};

/// A running DHT node: owns the UDP socket, routing table, and the
/// background tasks that drive query ticking, inbound dispatch, and
/// periodic housekeeping. Dropping it does not stop those tasks; call
/// [`Dht::stop`] first.
pub struct Dht {
    local_id: NodeId,
    routing_table: Arc<Mutex<RoutingTable>>,
    identity: Arc<Mutex<NodeIdentity>>,
    outgoing: OutgoingQueries,
    tasks: Vec<JoinHandle<()>>,
}

impl Dht {
    /// Binds the socket, derives/loads the node identity, starts the
    /// background tick/recv/housekeeping loops, and runs the bootstrap
    /// `populate` against `config.bootstrap`. Returns once bootstrap
    /// settles (or immediately, with zero visited nodes, if no bootstrap
    /// contacts were configured) alongside an event stream.
    pub async fn start(config: DhtConfig) -> Result<(Dht, UnboundedReceiver<Event>)> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let identity = NodeIdentity::new(&config);
        let local_id = identity.id;
        let _ = events_tx.send(Event::Id(local_id));
        let _ = events_tx.send(Event::PublicKey(identity.public_key()));
        let identity = Arc::new(Mutex::new(identity));

        let transport = match UdpTransport::bind(config.port).await {
            Ok(t) => Arc::new(t),
            Err(cause) => {
                log::error!("failed to bind UDP socket on port {}: {}", config.port, cause);
                let _ = events_tx.send(Event::UdpFail { port: config.port });
                return Err(ErrorKind::TransportSetup { cause }.into());
            }
        };
        log::info!("listening on port {} as {}", config.port, local_id);
        let _ = events_tx.send(Event::Listening);

        let routing_table = Arc::new(Mutex::new(RoutingTable::new(local_id)));
        let timeout_ticks = timeout_ticks_for(config.query_timeout, config.tick_interval);
        let outgoing =
            OutgoingQueries::with_timeout_ticks(transport.clone(), routing_table.clone(), timeout_ticks);
        let peer_store = Arc::new(Mutex::new(PeerStore::with_limits(
            config.peer_ttl.as_secs(),
            config.max_peers_per_lookup,
        )));
        let data_store = Arc::new(Mutex::new(DataStore::with_ttl(config.data_ttl.as_secs())));
        let token_secret = Arc::new(Mutex::new(TokenSecret::new()));

        let incoming = Arc::new(IncomingQueries::new(
            local_id,
            routing_table.clone(),
            peer_store.clone(),
            data_store.clone(),
            token_secret.clone(),
            events_tx.clone(),
        ));

        let mut tasks = Vec::new();
        tasks.push(spawn_recv_loop(transport.clone(), outgoing.clone(), incoming, events_tx.clone()));
        tasks.push(spawn_tick_loop(outgoing.clone(), config.tick_interval));
        tasks.push(spawn_housekeeping_loop(
            local_id,
            transport,
            routing_table.clone(),
            outgoing.clone(),
            peer_store,
            data_store,
            token_secret,
            events_tx.clone(),
            config.housekeeping_interval,
        ));

        let seed_table = RoutingTable::new(local_id);
        let populated = populate(
            local_id,
            local_id,
            &seed_table,
            config.bootstrap.clone(),
            outgoing.clone(),
            Some(events_tx.clone()),
        )
        .await;
        {
            let mut table = routing_table.lock().unwrap();
            for contact in populated.table.all() {
                table.add(contact.id, contact.loc);
            }
        }
        log::info!("bootstrap populate settled: {} nodes visited", populated.num_visited);
        let _ = events_tx.send(Event::Ready { num_visited: populated.num_visited });
        let nodes: Vec<NodeId> = routing_table.lock().unwrap().all().iter().map(|c| c.id).collect();
        let _ = events_tx.send(Event::Nodes(nodes));
        let closest: Vec<NodeId> = routing_table.lock().unwrap().closest().iter().map(|c| c.id).collect();
        let _ = events_tx.send(Event::Closest(closest));

        let dht = Dht { local_id, routing_table, identity, outgoing, tasks };
        Ok((dht, events_rx))
    }

    pub fn id(&self) -> NodeId {
        self.local_id
    }

    /// The public read/write surface (spec §6), with no per-response value
    /// callback wired up.
    pub fn public(&self) -> PublicInterface {
        PublicInterface {
            local_id: self.local_id,
            identity: self.identity.clone(),
            routing_table: self.routing_table.clone(),
            outgoing: self.outgoing.clone(),
            on_v: None,
        }
    }

    /// The public read/write surface plus a receiver that gets one [`OnV`]
    /// per contact response as a `get`/`get_peers` lookup progresses,
    /// in arrival order, rather than only the final aggregate.
    pub fn public_with_value_events(&self) -> (PublicInterface, UnboundedReceiver<OnV>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let public = PublicInterface {
            local_id: self.local_id,
            identity: self.identity.clone(),
            routing_table: self.routing_table.clone(),
            outgoing: self.outgoing.clone(),
            on_v: Some(tx),
        };
        (public, rx)
    }

    /// Stops every background task. Further use of a cloned
    /// [`PublicInterface`] after this will just time out, since nothing is
    /// left reading the socket.
    pub fn stop(self) {
        for task in self.tasks {
            task.abort();
        }
    }
}

fn spawn_recv_loop(
    transport: Arc<UdpTransport>,
    outgoing: OutgoingQueries,
    incoming: Arc<IncomingQueries>,
    events: UnboundedSender<Event>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match transport.recv().await {
                Ok(RecvOutcome::Message(src, message)) => {
                    if message.kind == MessageKind::Query {
                        if let Some(reply) = incoming.handle(src, message) {
                            let _ = transport.send(src, &reply).await;
                        }
                    } else {
                        if let (MessageKind::Error, Some((code, ref msg))) = (message.kind, &message.error) {
                            let _ = events.send(Event::Error { addr: src, code: *code, message: msg.clone() });
                        }
                        outgoing.complete(src, message);
                    }
                }
                Ok(RecvOutcome::Spam(addr)) => {
                    let _ = events.send(Event::Spam(addr));
                }
                Err(_) => break,
            }
        }
    })
}

/// Converts a wall-clock query timeout into the tick-count budget
/// `OutgoingQueries` actually counts down, rounding up so a timeout that
/// isn't an exact multiple of the tick interval never expires early.
fn timeout_ticks_for(query_timeout: std::time::Duration, tick_interval: std::time::Duration) -> u8 {
    let tick_nanos = tick_interval.as_nanos().max(1);
    let ticks = (query_timeout.as_nanos() + tick_nanos - 1) / tick_nanos;
    ticks.clamp(1, u8::MAX as u128) as u8
}

#[cfg(test)]
mod timeout_ticks_tests {
    use super::timeout_ticks_for;
    use std::time::Duration;

    #[test]
    fn rounds_up_to_a_whole_number_of_ticks() {
        assert_eq!(timeout_ticks_for(Duration::from_millis(500), Duration::from_millis(100)), 5);
        assert_eq!(timeout_ticks_for(Duration::from_millis(450), Duration::from_millis(100)), 5);
        assert_eq!(timeout_ticks_for(Duration::from_millis(100), Duration::from_millis(100)), 1);
    }
}

fn spawn_tick_loop(outgoing: OutgoingQueries, interval: std::time::Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            outgoing.tick().await;
        }
    })
}

#[allow(clippy::too_many_arguments)]
fn spawn_housekeeping_loop(
    local_id: NodeId,
    transport: Arc<UdpTransport>,
    routing_table: Arc<Mutex<RoutingTable>>,
    outgoing: OutgoingQueries,
    peer_store: Arc<Mutex<PeerStore>>,
    data_store: Arc<Mutex<DataStore>>,
    token_secret: Arc<Mutex<TokenSecret>>,
    events: UnboundedSender<Event>,
    interval: std::time::Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let housekeeping = Housekeeping::new(
            local_id,
            transport,
            routing_table,
            outgoing,
            peer_store,
            data_store,
            token_secret,
            events,
        );
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            housekeeping.sweep().await;
        }
    })
}
