//! CLI for this application
//!
use crate::settings;

#[derive(Clone, Debug, clap::Parser)]
pub struct Cli {
    // Server listen address
    #[clap(
        long,
        default_value = "0.0.0.0",
        env("CLEPSYDRA_LISTEN_ADDRESS"),
        help = "IP Address to listen on"
    )]
    pub listen_address: String,

    // HTTP API listen port
    #[clap(
        long,
        default_value = settings::DEFAULT_PORT_HTTP,
        env("CLEPSYDRA_HTTP_LISTEN_PORT"),
        help = "Port to bind Clepsydra HTTP API server to"
    )]
    pub listen_port: u16,

    // Human-readable node name
    #[clap(
        long,
        default_value = "clepsydra-node",
        env("CLEPSYDRA_NODE_NAME"),
        help = "Node name used in logs and /about"
    )]
    pub node_name: String,

    // Drift budget for incoming cluster times
    #[clap(
        long,
        default_value_t = settings::DEFAULT_MAX_DRIFT_SECS,
        env("CLEPSYDRA_MAX_ACCEPTABLE_DRIFT_SECS"),
        help = "Max seconds an incoming time may sit ahead of this node's wall clock"
    )]
    pub max_acceptable_drift_secs: u32,

    // Whether the host authenticates clients
    #[clap(
        long,
        action = clap::ArgAction::Set,
        default_value = "false",
        env("CLEPSYDRA_AUTH_ENABLED"),
        help = "Require authentication before accepting unsigned times"
    )]
    pub auth_enabled: bool,

    // Whether outbound gossip may block on key refresh
    #[clap(
        long,
        action = clap::ArgAction::Set,
        default_value = "false",
        env("CLEPSYDRA_PERMIT_REFRESH_DURING_GOSSIP_OUT"),
        help = "Allow outbound gossip to refresh signing keys (may block on I/O)"
    )]
    pub permit_refresh_during_gossip_out: bool,
}

impl Cli {
    pub fn into_settings(self) -> settings::Settings {
        settings::Settings {
            listen_address: self.listen_address,
            listen_port: self.listen_port,
            node_name: self.node_name,
            max_acceptable_drift_secs: self.max_acceptable_drift_secs,
            auth_enabled: self.auth_enabled,
            permit_refresh_during_gossip_out: self.permit_refresh_during_gossip_out,
        }
    }
}
