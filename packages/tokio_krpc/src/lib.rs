//! UDP transport and outgoing-query transaction multiplexing (spec §4.3,
//! §4.4), sitting on top of `krpc_encoding` and `routing_table`.

pub mod errors;
pub mod outgoing;
pub mod transport;

pub use errors::{Error, ErrorKind, Result};
pub use outgoing::{OutgoingQueries, QueryOutcome, DEFAULT_TICKS, PENDING_CAP};
pub use transport::{RecvOutcome, UdpTransport, SPAM_THRESHOLD};
