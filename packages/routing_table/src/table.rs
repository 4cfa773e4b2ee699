use crate::bucket::{Bucket, K};
use crate::contact::{Contact, PENDING_PING};
use krpc_encoding::NodeId;
use std::time::{SystemTime, UNIX_EPOCH};

fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// `(E0, E1)` at tree position `y`: `E1` holds contacts matching the local
/// id's bit `y`; `E0` holds contacts that differ. Every `E1` except the
/// last ("tip") pair's is empty.
type BucketPair = (Bucket, Bucket);

pub struct RoutingTable {
    local_id: NodeId,
    buckets: Vec<BucketPair>,
}

/// What a housekeeping sweep needs to act on: contacts whose last ping went
/// unanswered (drop them, emit `dropNode`) and contacts freshly marked
/// stale (ping them; responders re-enter via the normal `add` path).
pub struct RefreshReport {
    pub dropped: Vec<Contact>,
    pub to_ping: Vec<Contact>,
}

impl RoutingTable {
    pub fn new(local_id: NodeId) -> RoutingTable {
        RoutingTable {
            local_id,
            buckets: vec![(Bucket::new(), Bucket::new())],
        }
    }

    pub fn local_id(&self) -> NodeId {
        self.local_id
    }

    /// Index of the tip bucket pair -- the only one eligible to split.
    pub fn tip_index(&self) -> usize {
        self.buckets.len() - 1
    }

    /// Locates where `id` would live: `(y, z, i)` where `y` is the tree
    /// index, `z` is 1 if `id`'s bit `y` matches the local id's (meaning the
    /// near bucket `E1`), else 0 (the far bucket `E0`); `i` is the contact's
    /// index within that bucket, or its length if absent.
    pub fn find(&self, id: &NodeId) -> (usize, u8, usize) {
        let tip = self.tip_index();
        let y = match self.local_id.first_differing_bit(id) {
            Some(b) if b < tip => b,
            _ => tip,
        };
        let z = if id.bit(y) == self.local_id.bit(y) { 1 } else { 0 };
        let bucket = if z == 1 { &self.buckets[y].1 } else { &self.buckets[y].0 };
        let i = bucket.position(id).unwrap_or(bucket.contacts.len());
        (y, z, i)
    }

    /// Adds (or refreshes) a contact. Ignored if its id is the local id.
    pub fn add(&mut self, id: NodeId, loc: krpc_encoding::Location) {
        if id == self.local_id {
            return;
        }
        self.add_contact(Contact::new(id, loc, now()), false);
    }

    pub fn add_contact(&mut self, contact: Contact, allow_self: bool) {
        if !allow_self && contact.id == self.local_id {
            return;
        }
        let (y, z, i) = self.find(&contact.id);
        let bucket = if z == 1 { &mut self.buckets[y].1 } else { &mut self.buckets[y].0 };

        if i < bucket.contacts.len() {
            bucket.contacts[i] = contact; // already present: refresh timestamp
            return;
        }
        if !bucket.is_full() {
            bucket.push(contact);
            return;
        }
        if z == 0 {
            return; // far bucket full: bias toward near contacts, discard
        }
        // z == 1: the tip's near bucket is full. Append past capacity, then
        // split the tip to make room.
        self.buckets[y].1.push(contact);
        self.split_tip_until_balanced();
    }

    fn split_tip_until_balanced(&mut self) {
        loop {
            let tip = self.tip_index();
            if self.buckets[tip].1.contacts.len() <= K {
                break;
            }
            let overflow = std::mem::take(&mut self.buckets[tip].1.contacts);
            self.buckets.push((Bucket::new(), Bucket::new()));
            let new_tip = tip + 1;
            for c in overflow {
                let z = if c.id.bit(new_tip) == self.local_id.bit(new_tip) { 1 } else { 0 };
                if z == 1 {
                    self.buckets[new_tip].1.push(c);
                } else {
                    self.buckets[new_tip].0.push(c);
                }
            }
        }
    }

    /// Up to `K` contacts of the tip bucket, nearest first.
    pub fn closest(&self) -> Vec<Contact> {
        let tip = self.tip_index();
        let mut contacts = self.buckets[tip].1.contacts.clone();
        contacts.sort_by(|a, b| a.id.distance(&self.local_id).cmp(&b.id.distance(&self.local_id)));
        contacts.truncate(K);
        contacts
    }

    /// Every contact in the table.
    pub fn all(&self) -> Vec<Contact> {
        let mut out = Vec::new();
        for (e0, e1) in &self.buckets {
            out.extend_from_slice(&e0.contacts);
            out.extend_from_slice(&e1.contacts);
        }
        out
    }

    pub fn len(&self) -> usize {
        self.buckets.iter().map(|(e0, e1)| e0.contacts.len() + e1.contacts.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A fresh table keyed by `new_id`, seeded with every contact from this
    /// one. Seeded contacts may legitimately carry an id equal to `new_id`
    /// (these are query-planning scratchpads, not routing state), and
    /// source timestamps are untouched since contacts are copied, not
    /// referenced.
    pub fn make_temporary(&self, new_id: NodeId) -> RoutingTable {
        let mut temp = RoutingTable::new(new_id);
        for contact in self.all() {
            temp.add_contact(contact, true);
        }
        temp
    }

    /// Drops contacts that failed last round's ping, pings the stalest 10%
    /// of survivors, and recompacts the tree if it's grown lopsided.
    /// Responders to the ping re-enter the table through the normal `add`
    /// path, restoring their timestamp.
    pub fn refresh(&mut self) -> RefreshReport {
        let mut dropped = Vec::new();
        for (e0, e1) in self.buckets.iter_mut() {
            for bucket in [e0, e1] {
                let mut i = 0;
                while i < bucket.contacts.len() {
                    if bucket.contacts[i].is_pending_ping() {
                        dropped.push(bucket.contacts.remove(i));
                    } else {
                        i += 1;
                    }
                }
            }
        }

        let mut positions: Vec<(usize, u8, usize, u64)> = Vec::new();
        for (y, (e0, e1)) in self.buckets.iter().enumerate() {
            for (i, c) in e0.contacts.iter().enumerate() {
                positions.push((y, 0, i, c.last_seen));
            }
            for (i, c) in e1.contacts.iter().enumerate() {
                positions.push((y, 1, i, c.last_seen));
            }
        }
        positions.sort_by_key(|&(_, _, _, last_seen)| last_seen);
        let stale_count = (positions.len() + 9) / 10; // ceil(10%)

        let mut to_ping = Vec::new();
        for &(y, z, i, _) in positions.iter().take(stale_count) {
            let bucket = if z == 1 { &mut self.buckets[y].1 } else { &mut self.buckets[y].0 };
            to_ping.push(bucket.contacts[i]);
            bucket.contacts[i].last_seen = PENDING_PING;
        }

        if self.all().len() > K && self.closest().len() < K {
            let rebuilt = self.make_temporary(self.local_id);
            self.buckets = rebuilt.buckets;
        }

        RefreshReport { dropped, to_ping }
    }
}
