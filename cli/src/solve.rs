use std::path::PathBuf;

use clap::{ArgAction, Args};
use log::info;

use gamesman::{games, Manager, Result, SolveOptions};

#[derive(Args, Debug)]
pub struct Solve {
    #[arg(help = "name of the game, e.g. \"tictactoe\"")]
    game: String,
    variant: Option<String>,
    #[arg(long, default_value = "data")]
    data_path: PathBuf,
    #[arg(short, long, action = ArgAction::SetTrue, help = "re-solve tiers already on disk")]
    force: bool,
    #[arg(long, help = "soft per-tier memory bound in bytes")]
    memory_limit: Option<u64>,
}

impl Solve {
    pub fn run(self, show_progress: bool) -> Result<()> {
        let game = games::find_game(&self.game, self.variant.as_deref())?;
        let mut manager = Manager::init(game, &self.data_path)?;
        let report = manager.solve(&SolveOptions {
            force: self.force,
            verbose: show_progress,
            memory_limit: self.memory_limit,
            workers: None,
        })?;
        info!(
            "{}: {} of {} tiers solved, {} skipped",
            self.game, report.tiers_solved, report.tiers_total, report.tiers_skipped
        );
        if report.canceled {
            info!("solve was canceled before completion");
        }
        Ok(())
    }
}
