//! Game module - player controls expressed as patches

pub mod player;

pub use player::*;
