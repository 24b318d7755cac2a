use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use self::{archive::ArchiveArg, run::RunArg, state::StateArg};

mod archive;
mod run;
mod state;

#[derive(Debug, Clone, Parser)]
#[command(author, version, about, long_about = None)]
pub struct CommandArgs {
    /// What mode to run the program in
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Debug, Clone, Subcommand)]
enum Mode {
    /// Run the population training loop, resuming a saved run if present
    Run(#[clap(flatten)] RunArg),
    /// Show the persisted loop state of a run
    State(#[clap(flatten)] StateArg),
    /// List the tournament archive of a run
    Archive(#[clap(flatten)] ArchiveArg),
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("EVOKER_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

pub fn run() -> anyhow::Result<()> {
    init_tracing();
    let args = CommandArgs::parse();
    match args.mode {
        Mode::Run(arg) => run::run(&arg)?,
        Mode::State(arg) => state::run(&arg)?,
        Mode::Archive(arg) => archive::run(&arg)?,
    }
    Ok(())
}
