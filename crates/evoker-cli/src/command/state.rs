use std::path::PathBuf;

use anyhow::Context as _;
use evoker_scheduler::{JsonStateStore, StateStore as _};

use crate::util;

#[derive(Debug, Clone, clap::Args)]
pub(crate) struct StateArg {
    /// Run directory holding the saved state
    #[arg(long, default_value = "evoker-run")]
    dir: PathBuf,
    /// Output file path
    #[arg(long)]
    output: Option<PathBuf>,
}

pub(crate) fn run(arg: &StateArg) -> anyhow::Result<()> {
    let store = JsonStateStore::new(arg.dir.join("state.json"));
    let state = store
        .read()
        .context("Failed to read saved state")?
        .with_context(|| format!("No saved run under {}", arg.dir.display()))?;
    eprintln!(
        "Loop {}, {} learner lifemarks",
        state.loop_ix,
        state.lifemarks.len()
    );
    util::save_json(&state, arg.output.clone())
}
