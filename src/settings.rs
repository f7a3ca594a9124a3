//! Clepsydra application settings
use std::hash::{DefaultHasher, Hash, Hasher};

pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const STANDARD_PORT_HTTP: u16 = 8430;
pub const DEFAULT_PORT_HTTP: &str = "8430";

/// Default drift budget: one year of positive skew. Generous on purpose so
/// that only a truly corrupt peer clock trips the gate.
pub const DEFAULT_MAX_DRIFT_SECS: u32 = 365 * 24 * 60 * 60;

/// Stable numeric identity for this node, derived from its name and port.
pub fn generate_node_id(node_name: &str, port: u16) -> u32 {
    let mut hasher = DefaultHasher::new();
    node_name.hash(&mut hasher);
    port.hash(&mut hasher);
    hasher.finish() as u32
}

#[derive(Clone, Debug)]
pub struct Settings {
    // Server listen address
    pub listen_address: String,

    // HTTP API listen port
    pub listen_port: u16,

    // Human-readable node name, used in logs and /about
    pub node_name: String,

    // Allowed positive drift of an incoming time beyond local wall clock
    pub max_acceptable_drift_secs: u32,

    // Whether the host authenticates clients
    pub auth_enabled: bool,

    // Whether outbound gossip may block on a signing-key refresh
    pub permit_refresh_during_gossip_out: bool,
}

impl Settings {
    pub fn node_id(&self) -> u32 {
        generate_node_id(&self.node_name, self.listen_port)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            listen_address: "0.0.0.0".to_string(),
            listen_port: STANDARD_PORT_HTTP,
            node_name: "clepsydra-node".to_string(),
            max_acceptable_drift_secs: DEFAULT_MAX_DRIFT_SECS,
            auth_enabled: false,
            permit_refresh_during_gossip_out: false,
        }
    }
}
