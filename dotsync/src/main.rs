//! dotsync relay server
//!
//! Accepts patches over HTTP, keeps the authoritative document and streams
//! every transaction to websocket subscribers and peer relays.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use dotsync::network::{load_peers, RelayServer, ServerConfig};
use dotsync::VERSION;

#[derive(Parser, Debug)]
#[command(name = "dotsync-server", version, about = "dotsync relay server")]
struct Cli {
    /// The server port to listen on.
    #[arg(long, default_value_t = 8080)]
    port: u16,

    /// The name identifier for the server.
    #[arg(long, default_value = "default")]
    name: String,

    /// File listing peer relays, one per line.
    #[arg(long, default_value = "peers.txt")]
    peers: PathBuf,

    /// Port assumed for peers listed without one.
    #[arg(long, default_value_t = 8080)]
    peer_port: u16,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    info!("dotsync relay v{}", VERSION);
    info!("Starting server on port {} with name {}", cli.port, cli.name);

    let peers = load_peers(&cli.peers)?;
    for peer in &peers {
        info!("Replicating from peer {}", peer);
    }

    let config = ServerConfig {
        bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, cli.port)),
        name: cli.name,
        peers,
        default_peer_port: cli.peer_port,
        ..Default::default()
    };
    let server = Arc::new(RelayServer::new(config));

    let running = server.clone();
    let mut handle = tokio::spawn(async move { running.run().await });

    tokio::select! {
        result = &mut handle => result??,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, shutting down");
            server.shutdown();
            handle.await??;
        }
    }

    Ok(())
}
