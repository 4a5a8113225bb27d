//! Peer Replication
//!
//! A relay follows each of its peers by subscribing to the peer's `/ws`
//! stream and committing every transaction it receives into the local
//! ledger. The version clock makes this idempotent, so relays can follow
//! each other in any topology (including both directions at once) without
//! looping.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use futures_util::StreamExt;
use thiserror::Error;
use tokio::sync::watch;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, instrument, trace, warn};

use crate::network::ledger::{CommitOutcome, Ledger};
use crate::network::protocol::Transaction;
use crate::network::wait_for_shutdown;

/// Replication errors.
#[derive(Debug, Error)]
pub enum ReplicationError {
    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Read a peers file: one peer per line, blank lines and `#` comments
/// skipped. A missing file means no peers.
pub fn load_peers(path: &Path) -> std::io::Result<Vec<String>> {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!("No peers file at {}, running standalone", path.display());
            return Ok(Vec::new());
        }
        Err(e) => return Err(e),
    };

    Ok(contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

/// Websocket URL for a peers-file entry.
pub fn peer_ws_url(peer: &str, default_port: u16) -> String {
    if peer.contains("://") {
        return peer.to_string();
    }
    if peer.contains(':') {
        format!("ws://{}/ws", peer)
    } else {
        format!("ws://{}:{}/ws", peer, default_port)
    }
}

/// Follow one peer until shutdown, redialling after `interval` whenever the
/// connection fails or closes.
#[instrument(skip(ledger, interval, shutdown_rx))]
pub async fn run_peer_link(
    url: String,
    ledger: Arc<Ledger>,
    interval: Duration,
    shutdown_rx: watch::Receiver<bool>,
) {
    let shutdown = wait_for_shutdown(shutdown_rx);
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = follow_peer(&url, &ledger) => {
                match result {
                    Ok(applied) => info!(applied, "Peer stream ended"),
                    Err(e) => warn!("Peer link failed: {}", e),
                }
            }
            _ = &mut shutdown => return,
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = &mut shutdown => return,
        }
    }
}

/// One connection to a peer. Returns the number of transactions applied.
async fn follow_peer(url: &str, ledger: &Ledger) -> Result<usize, ReplicationError> {
    let (mut ws_stream, _) = connect_async(url).await?;
    info!("Following peer");

    let mut applied = 0;
    while let Some(msg) = ws_stream.next().await {
        let text = match msg? {
            Message::Text(text) => text,
            Message::Binary(data) => match String::from_utf8(data) {
                Ok(text) => text,
                Err(_) => {
                    warn!("Dropping non-UTF-8 frame from peer");
                    continue;
                }
            },
            Message::Close(_) => break,
            _ => continue,
        };

        let transaction = match Transaction::from_json(&text) {
            Ok(t) => t,
            Err(e) => {
                warn!("Dropping malformed envelope from peer: {}", e);
                continue;
            }
        };

        match ledger.commit(transaction).await {
            Ok(CommitOutcome::Applied) => applied += 1,
            Ok(CommitOutcome::Duplicate) => trace!("duplicate from peer"),
            Err(e) => warn!("{}", e),
        }
    }

    debug!(applied, "peer connection closed");
    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_peer_ws_url() {
        assert_eq!(peer_ws_url("relay-b", 8080), "ws://relay-b:8080/ws");
        assert_eq!(peer_ws_url("10.0.0.2:9000", 8080), "ws://10.0.0.2:9000/ws");
        assert_eq!(peer_ws_url("ws://relay-c/ws", 8080), "ws://relay-c/ws");
    }

    #[test]
    fn test_load_peers() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "relay-b\n\n  relay-c:9000  \n# relay-d\n").unwrap();

        let peers = load_peers(file.path()).unwrap();
        assert_eq!(peers, vec!["relay-b".to_string(), "relay-c:9000".to_string()]);
    }

    #[test]
    fn test_load_peers_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let peers = load_peers(&dir.path().join("peers.txt")).unwrap();
        assert!(peers.is_empty());
    }

    #[tokio::test]
    async fn test_peer_link_stops_on_shutdown() {
        let ledger = Arc::new(Ledger::default());
        let (tx, rx) = watch::channel(false);
        // Nothing listens on port 9 locally; the link keeps redialling.
        let handle = tokio::spawn(run_peer_link(
            "ws://127.0.0.1:9/ws".to_string(),
            ledger,
            Duration::from_millis(10),
            rx,
        ));

        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send_replace(true);

        assert!(tokio::time::timeout(Duration::from_secs(5), handle).await.is_ok());
    }
}
