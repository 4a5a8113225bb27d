//! UI module - line commands and the text view of the board

use std::fmt::Write;

use dotsync::{ConnectionState, Snapshot};

use crate::game::Direction;

/// One line of user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Pick the local player id.
    Name(String),
    /// Place the local player at the spawn point.
    Join,
    /// Step the local player.
    Move(Direction),
    /// Print the current snapshot.
    Show,
    /// Exit.
    Quit,
}

/// Why a line was not understood.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    /// `name` without an argument.
    #[error("usage: name <id>")]
    MissingName,
    /// Anything else.
    #[error("unknown command: {0}")]
    Unknown(String),
}

impl Command {
    /// Parse one input line. `Ok(None)` for a blank line.
    pub fn parse(line: &str) -> Result<Option<Self>, CommandError> {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            return Ok(None);
        };

        let command = match verb {
            "name" => match words.next() {
                Some(id) => Command::Name(id.to_string()),
                None => return Err(CommandError::MissingName),
            },
            "join" => Command::Join,
            "show" => Command::Show,
            "quit" | "exit" => Command::Quit,
            other => match other.parse::<Direction>() {
                Ok(direction) => Command::Move(direction),
                Err(()) => return Err(CommandError::Unknown(other.to_string())),
            },
        };
        Ok(Some(command))
    }
}

/// Render the board as one line per player, marking the local one.
pub fn render(snapshot: &Snapshot, local: Option<&str>, connection: ConnectionState) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "[{:?}] {} player(s)", connection, snapshot.len());
    for (id, position) in snapshot.iter() {
        let marker = if Some(id) == local { '*' } else { ' ' };
        let _ = writeln!(out, "{} {:<16} {}", marker, id, position);
    }
    out
}

/// Help text printed on start.
pub const HELP: &str = "commands: name <id> | join | up/down/left/right (w/s/a/d) | show | quit";
