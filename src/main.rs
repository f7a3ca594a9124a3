use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use clepsydra::api;
use clepsydra::cli;
use clepsydra::clock::VectorClock;
use clepsydra::service::{FeatureVersion, ServiceContext};
use clepsydra::validator::KeySetValidator;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,clepsydra=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Parse args and env vars
    let args = cli::Cli::parse();
    let settings = args.into_settings();

    // Socket server listen address setup
    let listen_address: IpAddr = settings
        .listen_address
        .parse::<IpAddr>()
        .expect("Invalid ip address");
    let socket_address = SocketAddr::from((listen_address, settings.listen_port));
    let listener = tokio::net::TcpListener::bind(socket_address).await?;

    // Host context: register the clock and give it a validator so it can
    // sign times for external clients.
    let service = ServiceContext::new(settings);
    VectorClock::register(&service, VectorClock::new());
    service.set_time_validator(Arc::new(KeySetValidator::new()));

    // A standalone node has no cluster-wide upgrade to coordinate, so newer
    // gossip fields are live from the start.
    service
        .feature_compatibility()
        .set_version(FeatureVersion::FullyUpgraded);

    let api = api::api(service).await?;

    // Start server
    info!("Starting Clepsydra on {}", socket_address);
    axum::serve(listener, api).await?;

    Ok(())
}
