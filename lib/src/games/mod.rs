//! Bundled game modules and their registry.

pub mod tictactoe;

use crate::error::{Error, Result};
use crate::game::Game;

/// Constructs the game named by the CLI. Variants are game-specific
/// strings; every game accepts its default variant.
pub fn find_game(name: &str, variant: Option<&str>) -> Result<Box<dyn Game>> {
    match name {
        "tictactoe" => Ok(Box::new(tictactoe::TicTacToe::new(variant)?)),
        _ => Err(Error::InvalidArgument(format!("unknown game \"{name}\""))),
    }
}

/// Names accepted by [`find_game`].
#[must_use]
pub fn all_games() -> Vec<&'static str> {
    vec!["tictactoe"]
}
