//! # dotsync
//!
//! Shared-snapshot synchronisation for a multiplayer "dot mover".
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          DOTSYNC                             │
//! ├──────────────────────────────────────────────────────────────┤
//! │  core/              - Pure document primitives               │
//! │  ├── patch.rs       - RFC 6902 JSON Patch (json-patch)       │
//! │  └── snapshot.rs    - Player -> position snapshot            │
//! │                                                              │
//! │  store.rs           - Client replica + subscriptions         │
//! │                                                              │
//! │  network/           - Everything that touches a socket       │
//! │  ├── protocol.rs    - Transaction envelope (double-encoded)  │
//! │  ├── transport.rs   - Client websocket + POST /replace       │
//! │  ├── ledger.rs      - Relay document, log, version clock     │
//! │  ├── server.rs      - Relay HTTP/WebSocket endpoints         │
//! │  └── replication.rs - Relay-to-relay log following           │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Data flow
//!
//! A client submits a patch with `POST /replace`. The relay commits it to
//! its ledger and streams the resulting transaction to every `/ws`
//! subscriber, the submitting client included. Each client's transport
//! adapter decodes the envelope and applies the patch to its
//! [`SnapshotStore`]; observers of the store see the new snapshot.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod network;
pub mod store;

// Re-export commonly used types
pub use core::patch::{member_path, Patch, PatchOperation, PatchError, PointerBuf};
pub use core::snapshot::{apply_patch, PlayerId, Position, Snapshot, SnapshotError};
pub use network::protocol::Transaction;
pub use network::transport::{ConnectionState, TransportAdapter, TransportConfig};
pub use store::{SnapshotReceiver, SnapshotStore};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
