//! Transaction Ledger
//!
//! The relay server's authoritative state: the current document, the log of
//! every transaction that applied, and a version clock recording the highest
//! id accepted from each source. Commits are serialised behind one lock, and
//! each applied transaction is fanned out to subscribers while that lock is
//! still held, so a subscriber's backlog and live stream never overlap or
//! leave a gap.

use std::collections::BTreeMap;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

use crate::core::patch::PatchError;
use crate::network::protocol::Transaction;

/// Per-source high-water marks.
pub type VersionClock = BTreeMap<String, u64>;

/// Ledger errors.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Payload did not decode or did not apply. The id stays consumed.
    #[error("transaction {origin}#{id} rejected: {reason}")]
    Rejected {
        /// Transaction source.
        origin: String,
        /// Transaction id.
        id: u64,
        /// Underlying patch failure.
        #[source]
        reason: PatchError,
    },
}

/// Result of a successful commit call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// Applied, logged and broadcast.
    Applied,
    /// Already seen (id not above the source's clock); ignored.
    Duplicate,
}

struct LedgerState {
    document: Value,
    clock: VersionClock,
    log: Vec<Transaction>,
}

/// Document, transaction log and version clock behind one lock.
pub struct Ledger {
    state: RwLock<LedgerState>,
    events: broadcast::Sender<Transaction>,
}

impl Ledger {
    /// Create an empty ledger (`{}` document).
    ///
    /// `capacity` bounds how far a subscriber may fall behind before it is
    /// considered lagged.
    pub fn new(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        Self {
            state: RwLock::new(LedgerState {
                document: Value::Object(Default::default()),
                clock: VersionClock::new(),
                log: Vec::new(),
            }),
            events,
        }
    }

    /// Commit a transaction received from anywhere (local or peer).
    pub async fn commit(&self, transaction: Transaction) -> Result<CommitOutcome, LedgerError> {
        let mut state = self.state.write().await;
        self.commit_locked(&mut state, transaction)
    }

    /// Commit a locally submitted payload under `source`, allocating the
    /// next id for that source.
    pub async fn submit(&self, source: &str, payload: String) -> Result<Transaction, LedgerError> {
        let mut state = self.state.write().await;
        let id = state.clock.get(source).copied().unwrap_or(0) + 1;
        let transaction = Transaction::new(source, id, payload);
        self.commit_locked(&mut state, transaction.clone())?;
        Ok(transaction)
    }

    fn commit_locked(
        &self,
        state: &mut LedgerState,
        transaction: Transaction,
    ) -> Result<CommitOutcome, LedgerError> {
        let seen = state.clock.get(&transaction.source).copied().unwrap_or(0);
        if seen >= transaction.id {
            debug!(source = %transaction.source, id = transaction.id, seen, "duplicate transaction");
            return Ok(CommitOutcome::Duplicate);
        }
        state.clock.insert(transaction.source.clone(), transaction.id);

        let rejected = |reason| LedgerError::Rejected {
            origin: transaction.source.clone(),
            id: transaction.id,
            reason,
        };
        let patch = transaction.decode_patch().map_err(rejected)?;
        let document = patch.apply(&state.document).map_err(rejected)?;

        state.document = document;
        state.log.push(transaction.clone());
        debug!(
            source = %transaction.source,
            id = transaction.id,
            ops = patch.len(),
            log_len = state.log.len(),
            "transaction applied"
        );

        // No receivers is fine; late subscribers replay the log.
        let _ = self.events.send(transaction);
        Ok(CommitOutcome::Applied)
    }

    /// Replay the log and subscribe to everything committed afterwards.
    pub async fn subscribe(&self) -> (Vec<Transaction>, broadcast::Receiver<Transaction>) {
        let state = self.state.read().await;
        let rx = self.events.subscribe();
        (state.log.clone(), rx)
    }

    /// Current document.
    pub async fn document(&self) -> Value {
        self.state.read().await.document.clone()
    }

    /// Current version clock.
    pub async fn clock(&self) -> VersionClock {
        self.state.read().await.clock.clone()
    }

    /// Number of applied transactions.
    pub async fn log_len(&self) -> usize {
        self.state.read().await.log.len()
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.events.receiver_count()
    }
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger")
            .field("subscribers", &self.subscriber_count())
            .finish_non_exhaustive()
    }
}
