//! Network Layer
//!
//! Everything that touches a socket: the wire envelope, the relay server
//! with its ledger and peer replication, and the client transport adapter.

pub mod protocol;
pub mod ledger;
pub mod replication;
pub mod server;
pub mod transport;

pub use protocol::{decode_frame, DecodeResult, FrameError, Transaction};
pub use ledger::{CommitOutcome, Ledger, LedgerError, VersionClock};
pub use replication::{load_peers, peer_ws_url, ReplicationError};
pub use server::{RelayServer, RelayServerError, ServerConfig};
pub use transport::{
    ConnectionState, InboundError, TransportAdapter, TransportConfig, TransportError,
};

use tokio::sync::watch;

/// Resolve once `rx` reads `true` or its sender is gone.
pub(crate) async fn wait_for_shutdown(mut rx: watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}
