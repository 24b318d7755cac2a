use std::{
    fs, io,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context as _;
use evoker_agent::FsAgentStore;
use evoker_engine::SyntheticEngine;
use evoker_scheduler::{
    ConfigChannel, ConfigError, Driver, DriverSetup, FileConfigChannel, JsonStateStore, LoopConfig,
    MetricsWriter, PmtArchive, StateStore as _,
};
use tracing::info;

use crate::prompt::{self, KeyPauseGate};

const RESUME_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, clap::Args)]
pub(crate) struct RunArg {
    /// Run directory holding checkpoints, state, and metrics
    #[arg(long, default_value = "evoker-run")]
    dir: PathBuf,
    /// Stop after this many generations instead of waiting for `exit`
    #[arg(long)]
    loops: Option<u32>,
    /// Seed for the synthetic table engine
    #[arg(long, default_value_t = 0)]
    seed: u64,
    /// Resume a saved run without asking
    #[arg(long)]
    yes: bool,
    /// Discard any saved run and start from scratch
    #[arg(long)]
    fresh: bool,
}

/// Channel that overlays the config file and enforces a `--loops` budget.
#[derive(Debug)]
struct BudgetedChannel {
    inner: FileConfigChannel,
    remaining: Option<u32>,
}

impl ConfigChannel for BudgetedChannel {
    fn refresh(&mut self, current: &LoopConfig) -> Result<LoopConfig, ConfigError> {
        let mut config = self.inner.refresh(current)?;
        if let Some(remaining) = &mut self.remaining {
            if *remaining == 0 {
                config.exit = true;
            } else {
                *remaining -= 1;
            }
        }
        Ok(config)
    }

    fn clear_exit(&mut self) -> Result<(), ConfigError> {
        self.inner.clear_exit()
    }
}

pub(crate) fn run(arg: &RunArg) -> anyhow::Result<()> {
    let RunArg {
        dir,
        loops,
        seed,
        yes,
        fresh,
    } = arg;
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create run directory: {}", dir.display()))?;

    let state_store = JsonStateStore::new(dir.join("state.json"));
    let saved = state_store.read().context("Failed to read saved state")?;
    let resume_state = match saved {
        None => None,
        Some(_) if *fresh => {
            discard_run(dir)?;
            None
        }
        Some(state) => {
            if *yes || prompt::confirm_resume(state.loop_ix, RESUME_TIMEOUT)? {
                Some(state)
            } else {
                discard_run(dir)?;
                None
            }
        }
    };

    let store = FsAgentStore::open(dir.join("agents")).context("Failed to open agent store")?;
    let archive = PmtArchive::open(dir.join("pmt")).context("Failed to open tournament archive")?;
    let engine = SyntheticEngine::with_seed(store.clone(), engine_seed(*seed, 0));
    let archive_engine = SyntheticEngine::with_seed(archive.store().clone(), engine_seed(*seed, 1));

    let mut driver = Driver::new(DriverSetup {
        store,
        engine,
        archive,
        archive_engine,
        config_channel: BudgetedChannel {
            inner: FileConfigChannel::new(dir.join("config.json")),
            remaining: *loops,
        },
        state_store,
        metrics: MetricsWriter::new(dir.join("metrics.jsonl")),
        pause_gate: KeyPauseGate,
        config: LoopConfig::default(),
    })
    .context("Failed to build the loop driver")?;
    if let Some(state) = resume_state {
        driver.resume_from(state).context("Failed to resume")?;
    }

    let completed = driver.run().context("Training loop failed")?;
    eprintln!(
        "Completed {completed} generations ({} in total).",
        driver.loops_completed()
    );
    Ok(())
}

/// Removes the saved state, checkpoints, and archive of a previous run.
///
/// A fresh run reuses agent names from loop 1 on, so stale checkpoints or
/// snapshots must not survive into it. Metrics are kept; rows carry the
/// loop index and remain tellable apart.
fn discard_run(dir: &Path) -> anyhow::Result<()> {
    for sub in ["agents", "pmt"] {
        remove_ignoring_absence(&dir.join(sub), |path| fs::remove_dir_all(path))?;
    }
    remove_ignoring_absence(&dir.join("state.json"), |path| fs::remove_file(path))?;
    info!(dir = %dir.display(), "discarded saved run");
    Ok(())
}

fn remove_ignoring_absence(
    path: &Path,
    remove: fn(&Path) -> io::Result<()>,
) -> anyhow::Result<()> {
    match remove(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("Failed to remove {}", path.display())),
    }
}

const fn engine_seed(seed: u64, stream: u64) -> [u8; 16] {
    let lo = seed.to_le_bytes();
    let hi = stream.to_le_bytes();
    let mut bytes = [0; 16];
    let mut i = 0;
    while i < 8 {
        bytes[i] = lo[i];
        bytes[i + 8] = hi[i];
        i += 1;
    }
    bytes
}
