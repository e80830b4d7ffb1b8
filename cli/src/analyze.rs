use std::fs;
use std::path::PathBuf;

use clap::Args;

use gamesman::{games, Manager, Result, SolveOptions};

#[derive(Args, Debug)]
pub struct Analyze {
    game: String,
    variant: Option<String>,
    #[arg(long, default_value = "data")]
    data_path: PathBuf,
    #[arg(short, long, help = "write the summary table here instead of stdout")]
    output: Option<PathBuf>,
    #[arg(long, help = "soft per-tier memory bound in bytes")]
    memory_limit: Option<u64>,
}

impl Analyze {
    pub fn run(self, show_progress: bool) -> Result<()> {
        let game = games::find_game(&self.game, self.variant.as_deref())?;
        let mut manager = Manager::init(game, &self.data_path)?;
        let analysis = manager.analyze(&SolveOptions {
            force: false,
            verbose: show_progress,
            memory_limit: self.memory_limit,
            workers: None,
        })?;
        let table = analysis.to_string();
        match self.output {
            Some(path) => fs::write(path, table)?,
            None => print!("{table}"),
        }
        Ok(())
    }
}
