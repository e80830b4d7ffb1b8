use clap::Args;

use gamesman::{games, Result};

#[derive(Args, Debug)]
pub struct GetStart {
    game: String,
    variant: Option<String>,
}

impl GetStart {
    pub fn run(self) -> Result<()> {
        let game = games::find_game(&self.game, self.variant.as_deref())?;
        println!("{}", game.initial_position());
        Ok(())
    }
}
