//! The periodic maintenance sweep (spec §4.7): spam counter reset, routing
//! table refresh (ping stalest 10%, drop unanswered), token secret
//! rotation, and peer/data store eviction.

use crate::data_store::DataStore;
use crate::events::Event;
use crate::peer_store::PeerStore;
use krpc_encoding::bencode::Value;
use krpc_encoding::token::TokenSecret;
use krpc_encoding::NodeId;
use routing_table::RoutingTable;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::UnboundedSender;
use tokio_krpc::{OutgoingQueries, UdpTransport};

pub struct Housekeeping {
    local_id: NodeId,
    transport: Arc<UdpTransport>,
    routing_table: Arc<Mutex<RoutingTable>>,
    outgoing: OutgoingQueries,
    peer_store: Arc<Mutex<PeerStore>>,
    data_store: Arc<Mutex<DataStore>>,
    token_secret: Arc<Mutex<TokenSecret>>,
    events: UnboundedSender<Event>,
}

impl Housekeeping {
    pub fn new(
        local_id: NodeId,
        transport: Arc<UdpTransport>,
        routing_table: Arc<Mutex<RoutingTable>>,
        outgoing: OutgoingQueries,
        peer_store: Arc<Mutex<PeerStore>>,
        data_store: Arc<Mutex<DataStore>>,
        token_secret: Arc<Mutex<TokenSecret>>,
        events: UnboundedSender<Event>,
    ) -> Housekeeping {
        Housekeeping {
            local_id,
            transport,
            routing_table,
            outgoing,
            peer_store,
            data_store,
            token_secret,
            events,
        }
    }

    /// Runs one full sweep. Pings dispatched to the stalest 10% are fired
    /// and forgotten here; a responder re-enters the routing table through
    /// `OutgoingQueries::complete`'s normal success path when its reply
    /// arrives, independent of this sweep's own lifetime.
    pub async fn sweep(&self) {
        log::debug!("housekeeping sweep starting");
        self.transport.reset_spam_counters();
        self.token_secret.lock().unwrap().rotate();

        let report = self.routing_table.lock().unwrap().refresh();
        log::debug!(
            "routing table refresh: {} dropped, {} pinged",
            report.dropped.len(),
            report.to_ping.len()
        );
        for contact in &report.dropped {
            let _ = self.events.send(Event::DropNode(contact.id));
        }
        for contact in report.to_ping {
            let outgoing = self.outgoing.clone();
            let local_id = self.local_id;
            let dest = contact.loc.into();
            tokio::spawn(async move {
                let mut args = Value::dict();
                args.insert("id", Value::bytes(local_id.as_bytes().to_vec()));
                let _ = outgoing.query(dest, "ping", args).await;
            });
        }

        let evicted_peers = self.peer_store.lock().unwrap().sweep();
        for (info_hash, loc) in &evicted_peers {
            let _ = self.events.send(Event::DropPeer { info_hash: *info_hash, loc: *loc });
        }
        let infohashes_tracked = self.peer_store.lock().unwrap().tracked_infohashes();
        let _ = self.events.send(Event::Peers { evicted: evicted_peers.len(), infohashes_tracked });

        let evicted_data = self.data_store.lock().unwrap().sweep();
        for target in &evicted_data {
            let _ = self.events.send(Event::DropData { target: *target });
        }
        let items_tracked = self.data_store.lock().unwrap().len();
        let _ = self.events.send(Event::Data { evicted: evicted_data.len(), items_tracked });

        log::debug!(
            "housekeeping sweep done: {} peers evicted, {} data items evicted",
            evicted_peers.len(),
            evicted_data.len()
        );
    }
}
