//! dotsync terminal client
//!
//! Follows one relay and lets the local user join the board and move a dot
//! with line commands. Local moves are only submitted; the board changes when
//! the relay echoes them back.

mod game;
mod ui;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use dotsync::{SnapshotStore, TransportAdapter, TransportConfig};

use game::{move_patch, spawn_patch};
use ui::{render, Command, HELP};

#[derive(Parser, Debug)]
#[command(name = "dotsync-client", version, about = "dotsync terminal client")]
struct Cli {
    /// Relay to follow, as `host:port`.
    #[arg(long, default_value = "127.0.0.1:8080")]
    server: String,

    /// Local player id; can also be set later with `name <id>`.
    #[arg(long)]
    player: Option<String>,

    /// Seconds between reconnect attempts.
    #[arg(long, default_value_t = 10, value_parser = clap::value_parser!(u64).range(1..))]
    reconnect_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = TransportConfig {
        reconnect_interval: Duration::from_secs(cli.reconnect_secs),
        ..TransportConfig::for_host(&cli.server)
    };
    info!("Following relay at {}", config.ws_url);

    let store = Arc::new(SnapshotStore::new());
    let adapter = Arc::new(TransportAdapter::new(config, store.clone()));

    let running = adapter.clone();
    let transport = tokio::spawn(async move { running.run().await });

    let mut snapshots = store.subscribe();
    let observer = tokio::spawn(async move {
        while snapshots.changed().await.is_ok() {
            let players = snapshots.borrow_and_update().len();
            info!(players, "board updated");
        }
    });

    println!("{}", HELP);
    let mut player = cli.player;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else { break };

        let command = match Command::parse(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(e) => {
                println!("{}", e);
                continue;
            }
        };

        match command {
            Command::Name(id) => {
                info!("Playing as {}", id);
                player = Some(id);
            }
            Command::Join => match &player {
                Some(id) => adapter.submit(spawn_patch(id)),
                None => println!("set a name first: name <id>"),
            },
            Command::Move(direction) => match &player {
                Some(id) => match move_patch(&store.current(), id, direction) {
                    Some(patch) => adapter.submit(patch),
                    None => warn!("{} is not on the board yet, try join", id),
                },
                None => println!("set a name first: name <id>"),
            },
            Command::Show => {
                print!("{}", render(&store.current(), player.as_deref(), adapter.connection_state()));
            }
            Command::Quit => break,
        }
    }

    adapter.shutdown();
    if let Err(e) = transport.await {
        warn!("Transport task failed: {}", e);
    }
    observer.abort();
    Ok(())
}
