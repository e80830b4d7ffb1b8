mod analyze;
mod getrandom;
mod getstart;
mod query;
mod solve;

use clap::{ArgAction, Parser, Subcommand};
use env_logger::{Builder, Target};
use log::LevelFilter;

use crate::analyze::Analyze;
use crate::getrandom::GetRandom;
use crate::getstart::GetStart;
use crate::query::Query;
use crate::solve::Solve;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
    #[arg(short, long, action = ArgAction::SetTrue, global = true)]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    Solve(Solve),
    Analyze(Analyze),
    Query(Query),
    Getstart(GetStart),
    Getrandom(GetRandom),
}

impl Cmd {
    fn run(self, show_progress: bool) -> gamesman::Result<()> {
        match self {
            Self::Solve(solve) => solve.run(show_progress),
            Self::Analyze(analyze) => analyze.run(show_progress),
            Self::Query(query) => query.run(),
            Self::Getstart(getstart) => getstart.run(),
            Self::Getrandom(getrandom) => getrandom.run(),
        }
    }
}

fn main() {
    let args = Cli::parse();
    let mut builder = Builder::new();
    builder
        .filter(
            None,
            if args.quiet {
                LevelFilter::Error
            } else {
                match args.verbose {
                    0 => LevelFilter::Info,
                    1 => LevelFilter::Debug,
                    _ => LevelFilter::Trace,
                }
            },
        )
        .default_format()
        .target(Target::Stdout);
    builder.init();

    if let Err(err) = args.cmd.run(!args.quiet) {
        eprintln!("gamesman: {err}");
        std::process::exit(i32::from(err.exit_code()));
    }
}
