use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use wherez::{Discoverer, DiscoveryConfig, MainlineClient, DEFAULT_BOOTSTRAP_NODE};

#[derive(Parser, Debug)]
#[command(name = "wherez")]
#[command(author, version, about = "Find sibling nodes that share a passphrase", long_about = None)]
struct Args {
    /// Port of the local application to advertise. Zero or negative
    /// runs passively: discover siblings without announcing.
    app_port: i32,

    /// Shared passphrase scoping the discovery group.
    passphrase: String,

    /// Port used for discovery (DHT and responder). Must be reachable
    /// from the public Internet for siblings to find this node.
    #[arg(short, long, default_value_t = 40000)]
    port: u16,

    /// How many peers the DHT should try to find before relaxing.
    #[arg(short, long, default_value_t = 1)]
    min_peers: usize,

    /// Bootstrap DHT node, host:port.
    #[arg(short, long, default_value = DEFAULT_BOOTSTRAP_NODE)]
    bootstrap: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let app_port = match args.app_port {
        p if p <= 0 => {
            info!("no application port, running passively (not announcing)");
            None
        }
        p => Some(u16::try_from(p).context("application port out of range")?),
    };

    let mut config = DiscoveryConfig::new(args.port, args.passphrase.into_bytes())
        .with_min_peers(args.min_peers)
        .with_bootstrap(args.bootstrap);
    if let Some(app_port) = app_port {
        config = config.with_app_port(app_port);
    }

    let dht = MainlineClient::new(args.port, args.min_peers, app_port.is_some());
    let discoverer = Discoverer::start(config, dht)
        .await
        .context("could not start discovery")?;
    let mut peers = discoverer
        .peers()
        .await
        .context("peer stream unavailable")?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("received shutdown signal, exiting");
                break;
            }
            peer = peers.recv() => match peer {
                Some(peer) => println!("peer found: {}", peer),
                None => {
                    warn!("discovery stream closed");
                    break;
                }
            }
        }
    }

    discoverer.shutdown();
    Ok(())
}
