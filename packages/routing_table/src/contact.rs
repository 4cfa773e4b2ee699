use krpc_encoding::{Location, NodeId};

/// Sentinel `last_seen` meaning "a ping is outstanding, and the previous
/// round's ping to this contact went unanswered". Contacts in this state
/// are dropped at the next `refresh` if they're still unanswered.
pub const PENDING_PING: u64 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Contact {
    pub id: NodeId,
    pub loc: Location,
    pub last_seen: u64,
}

impl Contact {
    pub fn new(id: NodeId, loc: Location, last_seen: u64) -> Contact {
        Contact { id, loc, last_seen }
    }

    pub fn is_pending_ping(&self) -> bool {
        self.last_seen == PENDING_PING
    }
}
