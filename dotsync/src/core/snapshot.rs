//! Snapshot
//!
//! The shared state every client replicates: player identifier -> position.
//!
//! A snapshot keeps the whole patched document, exactly as the relay holds
//! it. Positions are read out of it on demand, so members that are not
//! positions (or extra fields on a player) survive every patch.

use std::fmt;
use serde::{Serialize, Deserialize};
use serde_json::{Map, Value};
use thiserror::Error;

use super::patch::{Patch, PatchError};

/// Player identifier. Used verbatim as a JSON Pointer segment.
pub type PlayerId = String;

/// Largest integer an `f64` holds exactly.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// Snapshot errors.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// The patch itself failed.
    #[error(transparent)]
    Patch(#[from] PatchError),
}

/// A player's position on the board.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Position {
    /// Horizontal coordinate.
    pub x: f64,
    /// Vertical coordinate (grows downward).
    pub y: f64,
}

impl Position {
    /// Create a position.
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Offset by `(dx, dy)`.
    pub fn offset(self, dx: f64, dy: f64) -> Self {
        Self::new(self.x + dx, self.y + dy)
    }

    /// Read `{"x": <number>, "y": <number>}`. Other members are ignored.
    pub fn from_value(value: &Value) -> Option<Self> {
        Some(Self::new(value.get("x")?.as_f64()?, value.get("y")?.as_f64()?))
    }

    /// Render as `{"x":..,"y":..}`; whole coordinates are written as integers.
    pub fn to_value(self) -> Value {
        serde_json::json!({ "x": coordinate(self.x), "y": coordinate(self.y) })
    }
}

fn coordinate(v: f64) -> Value {
    if v.fract() == 0.0 && v.abs() <= MAX_SAFE_INTEGER {
        Value::from(v as i64)
    } else {
        Value::from(v)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// The shared document and the players it places.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot {
    document: Value,
}

impl Snapshot {
    /// Empty snapshot (`{}`).
    pub fn new() -> Self {
        Self::from_document(Value::Object(Map::new()))
    }

    /// Wrap a document as received from a relay.
    pub fn from_document(document: Value) -> Self {
        Self { document }
    }

    /// The underlying document.
    pub fn document(&self) -> &Value {
        &self.document
    }

    /// Position of a player, if the member exists and holds one.
    pub fn get(&self, id: &str) -> Option<Position> {
        Position::from_value(self.document.get(id)?)
    }

    /// Number of players with a readable position.
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    /// No player has a readable position.
    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    /// Iterate players in identifier order, skipping members that are not
    /// positions.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Position)> {
        self.document
            .as_object()
            .into_iter()
            .flat_map(|members| members.iter())
            .filter_map(|(id, value)| Position::from_value(value).map(|pos| (id.as_str(), pos)))
    }
}

impl Default for Snapshot {
    fn default() -> Self {
        Self::new()
    }
}

impl FromIterator<(PlayerId, Position)> for Snapshot {
    fn from_iter<I: IntoIterator<Item = (PlayerId, Position)>>(iter: I) -> Self {
        let members = iter.into_iter().map(|(id, pos)| (id, pos.to_value())).collect();
        Self::from_document(Value::Object(members))
    }
}

/// Apply `patch` to a copy of `current`.
///
/// `current` is never modified. Fails only if an operation fails; any
/// document the patch produces is accepted, as the relay accepts it.
pub fn apply_patch(current: &Snapshot, patch: &Patch) -> Result<Snapshot, SnapshotError> {
    Ok(Snapshot::from_document(patch.apply(&current.document)?))
}
