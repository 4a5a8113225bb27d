//! Relay Server
//!
//! HTTP + WebSocket endpoint on one listener:
//!
//! - `POST /replace` accepts a patch document, commits it under this relay's
//!   name and answers `200` (applied or duplicate) or `400`.
//! - `GET /get` returns the current document.
//! - `GET /vclock` returns the version clock.
//! - `GET /ws` streams the full transaction log, then every new commit.
//!
//! Each configured peer is followed by a replication task (see
//! [`crate::network::replication`]).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::Response,
    routing::{get, post},
    Json, Router,
};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, instrument, warn};

use crate::network::ledger::{Ledger, VersionClock};
use crate::network::protocol::Transaction;
use crate::network::replication::{peer_ws_url, run_peer_link};
use crate::network::wait_for_shutdown;

/// Default relay port.
pub const DEFAULT_PORT: u16 = 8080;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Name stamped on locally accepted transactions.
    pub name: String,
    /// Peers to replicate from (`host`, `host:port` or a full `ws://` URL).
    pub peers: Vec<String>,
    /// Port assumed for peers listed without one.
    pub default_peer_port: u16,
    /// Delay between peer redials.
    pub replication_interval: Duration,
    /// How many transactions a subscriber may lag before it is dropped.
    pub subscriber_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            name: "default".to_string(),
            peers: Vec::new(),
            default_peer_port: DEFAULT_PORT,
            replication_interval: Duration::from_secs(5),
            subscriber_capacity: 1024,
        }
    }
}

/// Relay server errors.
#[derive(Debug, thiserror::Error)]
pub enum RelayServerError {
    /// Failed to bind or serve.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// State shared with request handlers.
struct RelayState {
    name: String,
    ledger: Arc<Ledger>,
    shutdown_rx: watch::Receiver<bool>,
}

/// The relay server.
pub struct RelayServer {
    /// Server configuration.
    config: ServerConfig,
    /// Handler state.
    state: Arc<RelayState>,
    /// Shutdown signal.
    shutdown_tx: watch::Sender<bool>,
}

impl RelayServer {
    /// Create a new relay server.
    pub fn new(config: ServerConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let ledger = Arc::new(Ledger::new(config.subscriber_capacity));

        let state = Arc::new(RelayState {
            name: config.name.clone(),
            ledger,
            shutdown_rx,
        });

        Self {
            config,
            state,
            shutdown_tx,
        }
    }

    /// The ledger backing this relay.
    pub fn ledger(&self) -> Arc<Ledger> {
        self.state.ledger.clone()
    }

    /// Build the HTTP router.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/replace", post(replace))
            .route("/get", get(document))
            .route("/vclock", get(vclock))
            .route("/ws", get(ws_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Bind the configured address and run until shutdown.
    pub async fn run(&self) -> Result<(), RelayServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Run on an already bound listener until shutdown.
    #[instrument(skip_all, fields(name = %self.config.name))]
    pub async fn serve(&self, listener: TcpListener) -> Result<(), RelayServerError> {
        info!("Relay listening on {}", listener.local_addr()?);

        let peer_handles: Vec<_> = self
            .config
            .peers
            .iter()
            .map(|peer| {
                let url = peer_ws_url(peer, self.config.default_peer_port);
                let ledger = self.state.ledger.clone();
                let interval = self.config.replication_interval;
                let shutdown_rx = self.shutdown_tx.subscribe();
                tokio::spawn(run_peer_link(url, ledger, interval, shutdown_rx))
            })
            .collect();

        let shutdown_rx = self.shutdown_tx.subscribe();
        let result = axum::serve(listener, self.router())
            .with_graceful_shutdown(async move {
                wait_for_shutdown(shutdown_rx).await;
                info!("Shutdown signal received");
            })
            .await;

        for handle in peer_handles {
            handle.abort();
        }

        if let Err(e) = &result {
            error!("Relay server failed: {}", e);
        }
        result.map_err(RelayServerError::from)
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    /// Get active websocket subscriber count.
    pub fn subscriber_count(&self) -> usize {
        self.state.ledger.subscriber_count()
    }
}

/// `POST /replace`
async fn replace(State(relay): State<Arc<RelayState>>, body: String) -> StatusCode {
    match relay.ledger.submit(&relay.name, body).await {
        Ok(transaction) => {
            debug!(id = transaction.id, "accepted local patch");
            StatusCode::OK
        }
        Err(e) => {
            debug!("rejected local patch: {}", e);
            StatusCode::BAD_REQUEST
        }
    }
}

/// `GET /get`
async fn document(State(relay): State<Arc<RelayState>>) -> Json<Value> {
    Json(relay.ledger.document().await)
}

/// `GET /vclock`
async fn vclock(State(relay): State<Arc<RelayState>>) -> Json<VersionClock> {
    Json(relay.ledger.clock().await)
}

/// `GET /ws`
async fn ws_handler(ws: WebSocketUpgrade, State(relay): State<Arc<RelayState>>) -> Response {
    ws.on_upgrade(move |socket| handle_subscriber(socket, relay))
}

/// Stream the log to one websocket subscriber.
async fn handle_subscriber(socket: WebSocket, relay: Arc<RelayState>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let shutdown = wait_for_shutdown(relay.shutdown_rx.clone());
    tokio::pin!(shutdown);
    let (backlog, mut updates) = relay.ledger.subscribe().await;

    debug!(backlog = backlog.len(), "subscriber connected");

    for transaction in &backlog {
        if !send_transaction(&mut ws_sender, transaction).await {
            return;
        }
    }

    loop {
        tokio::select! {
            update = updates.recv() => {
                match update {
                    Ok(transaction) => {
                        if !send_transaction(&mut ws_sender, &transaction).await {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "subscriber lagged, closing");
                        break;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            msg = ws_receiver.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        debug!("subscriber socket error: {}", e);
                        break;
                    }
                    // Subscribers have nothing to say.
                    Some(Ok(_)) => {}
                }
            }
            _ = &mut shutdown => break,
        }
    }

    let _ = ws_sender.send(Message::Close(None)).await;
    debug!("subscriber disconnected");
}

/// Returns false once the socket is gone.
async fn send_transaction(
    sink: &mut SplitSink<WebSocket, Message>,
    transaction: &Transaction,
) -> bool {
    let text = match transaction.to_json() {
        Ok(t) => t,
        Err(e) => {
            warn!("Failed to serialize transaction: {}", e);
            return true;
        }
    };
    sink.send(Message::Text(text.into())).await.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr.port(), 8080);
        assert_eq!(config.name, "default");
        assert_eq!(config.replication_interval, Duration::from_secs(5));
        assert!(config.peers.is_empty());
    }

    #[tokio::test]
    async fn test_server_creation() {
        let server = RelayServer::new(ServerConfig::default());
        assert_eq!(server.subscriber_count(), 0);
        assert_eq!(server.ledger().log_len().await, 0);
    }

    #[tokio::test]
    async fn test_server_shutdown() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let server = Arc::new(RelayServer::new(ServerConfig::default()));

        let running = server.clone();
        let handle = tokio::spawn(async move { running.serve(listener).await });
        server.shutdown();

        let result = tokio::time::timeout(Duration::from_secs(5), handle).await;
        assert!(result.unwrap().unwrap().is_ok());
    }
}
