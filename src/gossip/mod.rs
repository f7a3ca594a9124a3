//! Gossip: piggybacking clock state on outbound messages and extracting it
//! from inbound ones.
//!
//! The message envelope itself (transport framing, command dispatch) is the
//! host's concern; gossip operates on the envelope's field map.
pub mod format;

pub use format::{component_name, GossipFormat, CLUSTER_TIME_FIELD, CONFIG_TIME_FIELD};

/// The field map of a message envelope. Gossip writes its fields into, and
/// reads them out of, this document.
pub type Document = serde_json::Map<String, serde_json::Value>;
