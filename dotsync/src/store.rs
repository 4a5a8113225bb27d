//! Snapshot Store
//!
//! Client-side replica of the shared snapshot. The store has exactly one
//! mutation entry point, [`SnapshotStore::apply`]; everything else gets a
//! read handle through [`SnapshotStore::subscribe`].

use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, trace};

use crate::core::patch::Patch;
use crate::core::snapshot::{apply_patch, Snapshot, SnapshotError};

/// Read handle that observes every published snapshot.
pub type SnapshotReceiver = watch::Receiver<Arc<Snapshot>>;

/// Holds the current snapshot and publishes replacements.
#[derive(Debug)]
pub struct SnapshotStore {
    tx: watch::Sender<Arc<Snapshot>>,
}

impl SnapshotStore {
    /// Create a store holding an empty snapshot.
    pub fn new() -> Self {
        Self::with_snapshot(Snapshot::new())
    }

    /// Create a store seeded with `snapshot`.
    pub fn with_snapshot(snapshot: Snapshot) -> Self {
        let (tx, _) = watch::channel(Arc::new(snapshot));
        Self { tx }
    }

    /// Current snapshot.
    pub fn current(&self) -> Arc<Snapshot> {
        self.tx.borrow().clone()
    }

    /// Subscribe to snapshot replacements.
    ///
    /// The receiver starts out holding the current snapshot, marked as seen.
    /// Slow receivers skip straight to the latest snapshot.
    pub fn subscribe(&self) -> SnapshotReceiver {
        self.tx.subscribe()
    }

    /// Apply `patch` and publish the result.
    ///
    /// The patched snapshot replaces the current one and observers are
    /// notified before this returns. On error nothing changes and nobody is
    /// notified.
    pub fn apply(&self, patch: &Patch) -> Result<Arc<Snapshot>, SnapshotError> {
        let mut outcome = Ok(self.current());
        self.tx.send_if_modified(|current| match apply_patch(current, patch) {
            Ok(next) => {
                let next = Arc::new(next);
                *current = next.clone();
                outcome = Ok(next);
                true
            }
            Err(e) => {
                outcome = Err(e);
                false
            }
        });

        match &outcome {
            Ok(next) => debug!(ops = patch.len(), players = next.len(), "snapshot replaced"),
            Err(e) => trace!("patch rejected: {}", e),
        }
        outcome
    }

    /// Drop everything and publish an empty snapshot.
    ///
    /// Used before a relay replays its log from the start.
    pub fn reset(&self) {
        self.tx.send_replace(Arc::new(Snapshot::new()));
        debug!("snapshot reset");
    }
}

impl Default for SnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}
