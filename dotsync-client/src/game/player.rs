//! Player controls
//!
//! Turns local input into the patch documents the relay expects. Nothing
//! here touches the store: the new position comes back through the relay.

use std::str::FromStr;

use dotsync::{member_path, Patch, Position, Snapshot};

/// Where a freshly joined player appears.
pub const SPAWN_POSITION: Position = Position::new(20.0, 20.0);

/// One grid step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    /// Offset for one step. `y` grows downward, so up is `-1`.
    pub fn delta(self) -> (f64, f64) {
        match self {
            Direction::Up => (0.0, -1.0),
            Direction::Down => (0.0, 1.0),
            Direction::Left => (-1.0, 0.0),
            Direction::Right => (1.0, 0.0),
        }
    }
}

impl FromStr for Direction {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "up" | "w" => Ok(Direction::Up),
            "down" | "s" => Ok(Direction::Down),
            "left" | "a" => Ok(Direction::Left),
            "right" | "d" => Ok(Direction::Right),
            _ => Err(()),
        }
    }
}

/// `add /<player>` with the given position.
pub fn place_patch(player: &str, position: Position) -> Patch {
    Patch::add(member_path(player), position.to_value())
}

/// Patch that (re)spawns `player` at [`SPAWN_POSITION`].
pub fn spawn_patch(player: &str) -> Patch {
    place_patch(player, SPAWN_POSITION)
}

/// Patch moving `player` one step from where the snapshot has it.
///
/// `None` if the player is not in the snapshot yet.
pub fn move_patch(snapshot: &Snapshot, player: &str, direction: Direction) -> Option<Patch> {
    let (dx, dy) = direction.delta();
    let current = snapshot.get(player)?;
    Some(place_patch(player, current.offset(dx, dy)))
}
