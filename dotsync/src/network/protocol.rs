//! Protocol Messages
//!
//! Wire format shared by the relay server, its peers and clients.
//!
//! Every websocket frame carries one [`Transaction`] as JSON. The patch
//! inside is itself a JSON string (`Payload`), so a frame is decoded twice:
//! once for the envelope and once for the patch document. Field names are
//! PascalCase on the wire.

use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::core::patch::{Patch, PatchError};

/// A committed (or to-be-committed) patch, tagged with its origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Transaction {
    /// Name of the relay that accepted the patch first.
    #[serde(default)]
    pub source: String,
    /// Per-source sequence number, starting at 1.
    #[serde(default)]
    pub id: u64,
    /// JSON-encoded patch document.
    pub payload: String,
}

impl Transaction {
    /// Create a transaction carrying an already encoded patch document.
    pub fn new(source: impl Into<String>, id: u64, payload: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            id,
            payload: payload.into(),
        }
    }

    /// Create a transaction by encoding `patch`.
    pub fn from_patch(source: impl Into<String>, id: u64, patch: &Patch) -> Result<Self, serde_json::Error> {
        Ok(Self::new(source, id, patch.to_json()?))
    }

    /// Decode the inner patch document.
    pub fn decode_patch(&self) -> Result<Patch, PatchError> {
        Patch::from_json(&self.payload)
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

/// Why an inbound frame was discarded.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Binary frame that is not UTF-8.
    #[error("frame is not valid UTF-8")]
    Encoding(#[from] std::str::Utf8Error),

    /// The outer envelope did not parse.
    #[error("malformed envelope: {0}")]
    Envelope(#[source] serde_json::Error),

    /// The envelope parsed but its payload is not a patch document.
    #[error("malformed payload: {0}")]
    Payload(#[source] PatchError),
}

/// Outcome of decoding one inbound frame.
pub type DecodeResult = Result<Patch, FrameError>;

/// Decode a text frame down to its patch document.
pub fn decode_frame(frame: &str) -> DecodeResult {
    let transaction = Transaction::from_json(frame).map_err(FrameError::Envelope)?;
    transaction.decode_patch().map_err(FrameError::Payload)
}

/// Decode a binary frame holding UTF-8 JSON.
pub fn decode_frame_bytes(frame: &[u8]) -> DecodeResult {
    decode_frame(std::str::from_utf8(frame)?)
}
