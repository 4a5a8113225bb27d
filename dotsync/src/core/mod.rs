//! Core document primitives.
//!
//! Pure, synchronous building blocks shared by the client store and the
//! relay server: JSON Patch application and the snapshot model built on
//! top of it.

pub mod patch;
pub mod snapshot;

// Re-export core types
pub use patch::{member_path, Patch, PatchOperation, PatchError, PointerBuf};
pub use snapshot::{apply_patch, PlayerId, Position, Snapshot, SnapshotError};
