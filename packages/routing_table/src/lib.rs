//! The XOR-bucketed routing table (spec §4.2): a binary split-tree of
//! `(E0, E1)` bucket pairs, splittable only at the tip (the branch
//! containing the local id).

pub mod bucket;
pub mod contact;
pub mod table;

pub use bucket::K;
pub use contact::{Contact, PENDING_PING};
pub use table::{RefreshReport, RoutingTable};
