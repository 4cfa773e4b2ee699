//! Bencode codec, wire message envelope, and the identifier/location
//! primitives shared by the rest of the DHT workspace.

pub mod addr;
pub mod bencode;
pub mod bep44;
pub mod errors;
pub mod message;
pub mod node_id;
pub mod node_info;
pub mod token;

pub use addr::Location;
pub use bencode::Value;
pub use errors::{Error, ErrorKind, Result};
pub use message::{Message, MessageKind};
pub use node_id::NodeId;
pub use node_info::NodeInfo;
