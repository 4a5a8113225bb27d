//! Transport Adapter
//!
//! Client side of the relay protocol. Owns one websocket connection to the
//! relay's `/ws` stream, feeding every decoded patch into a
//! [`SnapshotStore`], and submits local changes as one-off `POST /replace`
//! requests.
//!
//! Inbound and outbound are separate paths: a submitted patch
//! only shows up in the store once the relay echoes it back over the
//! websocket.

use std::sync::Arc;
use std::time::Duration;
use futures_util::StreamExt;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use thiserror::Error;
use tokio::sync::watch;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::core::patch::Patch;
use crate::core::snapshot::{Snapshot, SnapshotError};
use crate::network::protocol::{decode_frame, decode_frame_bytes, DecodeResult, FrameError};
use crate::network::wait_for_shutdown;
use crate::store::SnapshotStore;

/// Delay between reconnect attempts.
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(10);

/// Transport configuration.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Inbound stream, e.g. `ws://127.0.0.1:8080/ws`.
    pub ws_url: String,
    /// Outbound submissions, e.g. `http://127.0.0.1:8080/replace`.
    pub replace_url: String,
    /// Constant delay before each reconnect.
    pub reconnect_interval: Duration,
}

impl TransportConfig {
    /// Endpoints of the relay at `host` (`host:port`).
    pub fn for_host(host: &str) -> Self {
        Self {
            ws_url: format!("ws://{}/ws", host),
            replace_url: format!("http://{}/replace", host),
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::for_host("127.0.0.1:8080")
    }
}

/// Connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Dialling the relay.
    Connecting,
    /// Receiving transactions.
    Connected,
    /// Not connected; a redial is pending unless shut down.
    Disconnected,
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Patch could not be encoded.
    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),

    /// Relay answered with a non-success status.
    #[error("relay rejected patch: {0}")]
    Status(StatusCode),
}

/// Why an inbound frame was discarded.
#[derive(Debug, Error)]
pub enum InboundError {
    /// Frame did not decode.
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// Patch did not apply to the current snapshot.
    #[error("patch did not apply: {0}")]
    Apply(#[from] SnapshotError),
}

/// Connection owner and outbound submitter for one relay.
pub struct TransportAdapter {
    config: TransportConfig,
    store: Arc<SnapshotStore>,
    http: reqwest::Client,
    state_tx: watch::Sender<ConnectionState>,
    shutdown_tx: watch::Sender<bool>,
}

impl TransportAdapter {
    /// Create an adapter feeding `store`. Nothing connects until [`run`](Self::run).
    pub fn new(config: TransportConfig, store: Arc<SnapshotStore>) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            config,
            store,
            http: reqwest::Client::new(),
            state_tx,
            shutdown_tx,
        }
    }

    /// The store this adapter feeds.
    pub fn store(&self) -> &Arc<SnapshotStore> {
        &self.store
    }

    /// Configuration in use.
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Current connection state.
    pub fn connection_state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Watch connection state changes.
    pub fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!(?previous, ?state, "connection state changed");
        }
    }

    /// Keep a connection open until [`shutdown`](Self::shutdown), redialling
    /// at a constant interval forever.
    pub async fn run(&self) {
        let shutdown = wait_for_shutdown(self.shutdown_tx.subscribe());
        tokio::pin!(shutdown);

        loop {
            self.set_state(ConnectionState::Connecting);
            tokio::select! {
                result = self.connect_and_listen() => {
                    match result {
                        Ok(()) => info!("Relay closed connection"),
                        Err(e) => warn!("Connection to {} lost: {}", self.config.ws_url, e),
                    }
                }
                _ = &mut shutdown => {
                    self.set_state(ConnectionState::Disconnected);
                    return;
                }
            }
            self.set_state(ConnectionState::Disconnected);

            tokio::select! {
                _ = tokio::time::sleep(self.config.reconnect_interval) => {}
                _ = &mut shutdown => return,
            }
        }
    }

    async fn connect_and_listen(&self) -> Result<(), TransportError> {
        let (mut ws_stream, _) = connect_async(self.config.ws_url.as_str()).await?;
        info!("Connected to {}", self.config.ws_url);
        // The relay replays its whole log on every subscription.
        self.store.reset();
        self.set_state(ConnectionState::Connected);

        while let Some(msg) = ws_stream.next().await {
            match msg? {
                Message::Text(text) => {
                    let _ = self.on_message(&text);
                }
                Message::Binary(data) => {
                    let _ = self.deliver(decode_frame_bytes(&data));
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
        Ok(())
    }

    /// Handle one inbound text frame.
    ///
    /// A frame that does not decode, or whose patch does not apply, is
    /// logged and dropped; the store keeps its last good snapshot.
    pub fn on_message(&self, frame: &str) -> Result<Arc<Snapshot>, InboundError> {
        self.deliver(decode_frame(frame))
    }

    fn deliver(&self, decoded: DecodeResult) -> Result<Arc<Snapshot>, InboundError> {
        let result = decoded
            .map_err(InboundError::from)
            .and_then(|patch| self.store.apply(&patch).map_err(InboundError::from));
        if let Err(e) = &result {
            warn!("Discarding inbound message: {}", e);
        }
        result
    }

    /// Fire-and-forget submission of `patch` to the relay.
    ///
    /// Must be called from within a Tokio runtime. Failures are logged and
    /// never reach the caller.
    pub fn submit(&self, patch: Patch) {
        let http = self.http.clone();
        let url = self.config.replace_url.clone();
        tokio::spawn(async move {
            if let Err(e) = post_patch(&http, &url, &patch).await {
                warn!("Patch submission failed: {}", e);
            }
        });
    }

    /// Submit `patch` and wait for the relay's answer.
    pub async fn post_patch(&self, patch: &Patch) -> Result<(), TransportError> {
        post_patch(&self.http, &self.config.replace_url, patch).await
    }

    /// Stop the connection loop.
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }
}

async fn post_patch(http: &reqwest::Client, url: &str, patch: &Patch) -> Result<(), TransportError> {
    let body = patch.to_json()?;
    let response = http
        .post(url)
        .header(CONTENT_TYPE, "application/json")
        .body(body)
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        return Err(TransportError::Status(status));
    }
    debug!(%status, ops = patch.len(), "patch submitted");
    Ok(())
}
