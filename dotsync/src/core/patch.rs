//! JSON Patch
//!
//! RFC 6902 patch documents, applied with the `json-patch` crate. [`Patch`]
//! wraps [`json_patch::Patch`] with the constructors and codec helpers the
//! rest of the crate uses; the wire format is the crate's own.
//!
//! Application never touches the input: [`Patch::apply`] patches a copy
//! and only returns it once every operation succeeded.

use serde::{Serialize, Deserialize};
use serde_json::Value;
use thiserror::Error;

pub use json_patch::PatchOperation;
pub use jsonptr::PointerBuf;

use json_patch::{AddOperation, RemoveOperation};

/// Patch errors.
#[derive(Debug, Error)]
pub enum PatchError {
    /// The patch document is not valid JSON or not a valid operation list.
    #[error("malformed patch document: {0}")]
    Malformed(#[from] serde_json::Error),

    /// An operation failed against the document.
    #[error("patch did not apply: {0}")]
    Rejected(#[from] json_patch::PatchError),
}

/// Pointer to the top-level member `key`, escaped as needed.
pub fn member_path(key: &str) -> PointerBuf {
    PointerBuf::from_tokens([key])
}

/// An ordered list of patch operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Patch(json_patch::Patch);

impl Patch {
    /// Create an empty patch.
    pub fn new() -> Self {
        Self(json_patch::Patch(Vec::new()))
    }

    /// Single `add` operation.
    pub fn add(path: PointerBuf, value: Value) -> Self {
        Self::from(vec![PatchOperation::Add(AddOperation { path, value })])
    }

    /// Single `remove` operation.
    pub fn remove(path: PointerBuf) -> Self {
        Self::from(vec![PatchOperation::Remove(RemoveOperation { path })])
    }

    /// Decode a patch document.
    pub fn from_json(json: &str) -> Result<Self, PatchError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Encode as a patch document.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// The operations, in order.
    pub fn operations(&self) -> &[PatchOperation] {
        &self.0 .0
    }

    /// Number of operations.
    pub fn len(&self) -> usize {
        self.0 .0.len()
    }

    /// Is the patch empty.
    pub fn is_empty(&self) -> bool {
        self.0 .0.is_empty()
    }

    /// Append all operations of `other`.
    pub fn extend(&mut self, other: Patch) {
        self.0 .0.extend(other.0 .0);
    }

    /// Apply to a copy of `doc` and return the patched copy.
    pub fn apply(&self, doc: &Value) -> Result<Value, PatchError> {
        let mut out = doc.clone();
        json_patch::patch(&mut out, &self.0)?;
        Ok(out)
    }
}

impl Default for Patch {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Vec<PatchOperation>> for Patch {
    fn from(ops: Vec<PatchOperation>) -> Self {
        Self(json_patch::Patch(ops))
    }
}

impl From<json_patch::Patch> for Patch {
    fn from(patch: json_patch::Patch) -> Self {
        Self(patch)
    }
}
