//! The generation loop.
//!
//! # Loop Overview
//!
//! [`Driver::run`] repeats one generation until the configuration source
//! raises the exit flag. Each generation:
//!
//! 1. tops the learner cohort up and, while the reference pool is empty,
//!    bootstraps it from the fresh cohort,
//! 2. trains aged copies of all learners against the pool,
//! 3. measures every `(base, aged)` pair plus reference probes,
//! 4. judges the pairs, rolls lifemarks forward, prunes sour learners,
//! 5. promotes improved learners into the pool and evicts what they
//!    displace, snapshotting the best reference into the archive on the
//!    archiving cadence,
//! 6. persists the loop state, appends a metrics row, honors the pause
//!    gate, runs the archive tournament on cadence, and finally lets the
//!    game-size controller react to the separation fraction.
//!
//! # Design Decisions
//!
//! The configuration is re-read at every loop top and validated before
//! use, so an operator can retune a running loop between generations but
//! never hand a generation an inconsistent snapshot. State is persisted
//! before the pause gate and the tournament: everything after the persist
//! point is repeatable, which is what makes mid-run interruption safe.

use std::{fmt, time::Instant};

use evoker_agent::AgentStore;
use evoker_engine::SimulationEngine;
use tracing::info;

use crate::{
    SchedulerError,
    analyze::{analyze_pairs, apply_survivors},
    archive::PmtArchive,
    cohort::{Population, bootstrap_refs, fill_learners},
    config::{ConfigChannel, LoopConfig},
    metrics::{LoopMetrics, MetricsWriter},
    persist::{LoopState, StateStore},
    refpool::{rank_refs, rebalance},
    rounds::{run_test, run_training},
};

/// Hook invoked between generations when pausing is enabled.
pub trait PauseGate: fmt::Debug {
    /// Blocks until the operator releases the loop.
    fn wait(&mut self, loop_ix: u32) -> Result<(), SchedulerError>;
}

/// Gate that never blocks.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPause;

impl PauseGate for NoPause {
    fn wait(&mut self, _loop_ix: u32) -> Result<(), SchedulerError> {
        Ok(())
    }
}

/// Everything a [`Driver`] is wired from.
#[derive(Debug)]
pub struct DriverSetup<S, E, T, C, G> {
    /// Store holding the live population.
    pub store: S,
    /// Engine for training and test rounds on the live store.
    pub engine: E,
    pub archive: PmtArchive,
    /// Engine for archive tournaments, reading the archive's store.
    pub archive_engine: E,
    pub config_channel: C,
    pub state_store: T,
    pub metrics: MetricsWriter,
    pub pause_gate: G,
    pub config: LoopConfig,
}

/// Drives the self-play training loop over its collaborators.
#[derive(Debug)]
pub struct Driver<S, E, T, C, G> {
    store: S,
    engine: E,
    archive: PmtArchive,
    archive_engine: E,
    config_channel: C,
    state_store: T,
    metrics: MetricsWriter,
    pause_gate: G,
    config: LoopConfig,
    population: Population,
    state: LoopState,
}

impl<S, E, T, C, G> Driver<S, E, T, C, G>
where
    S: AgentStore,
    E: SimulationEngine,
    T: StateStore,
    C: ConfigChannel,
    G: PauseGate,
{
    /// Builds a driver over a fresh, empty population.
    pub fn new(setup: DriverSetup<S, E, T, C, G>) -> Result<Self, SchedulerError> {
        setup.config.validate()?;
        Ok(Self {
            store: setup.store,
            engine: setup.engine,
            archive: setup.archive,
            archive_engine: setup.archive_engine,
            config_channel: setup.config_channel,
            state_store: setup.state_store,
            metrics: setup.metrics,
            pause_gate: setup.pause_gate,
            config: setup.config,
            population: Population::default(),
            state: LoopState::default(),
        })
    }

    /// Reads the persisted loop state, if any.
    pub fn saved_state(&self) -> Result<Option<LoopState>, SchedulerError> {
        Ok(self.state_store.read()?)
    }

    /// Adopts a persisted state and reattaches the stored population.
    ///
    /// Learners and references are rebuilt from the store listing alone;
    /// the next generation continues after `state.loop_ix`.
    pub fn resume_from(&mut self, state: LoopState) -> Result<(), SchedulerError> {
        let ids = self.store.list()?;
        self.population = Population::from_ids(ids);
        info!(
            loop_ix = state.loop_ix,
            learners = self.population.learners.len(),
            refs = self.population.refs.len(),
            "resuming from saved state"
        );
        self.state = state;
        Ok(())
    }

    /// The current live population.
    #[must_use]
    pub fn population(&self) -> &Population {
        &self.population
    }

    /// Number of completed generations.
    #[must_use]
    pub fn loops_completed(&self) -> u32 {
        self.state.loop_ix
    }

    /// Runs generations until the exit flag is raised.
    ///
    /// The flag is consumed: it is cleared at the source and locally, so
    /// a later `run` starts generations again instead of replaying the
    /// exit. Returns the number of generations this call completed.
    pub fn run(&mut self) -> Result<u32, SchedulerError> {
        let mut completed = 0;
        loop {
            let refreshed = self.config_channel.refresh(&self.config)?;
            refreshed.validate()?;
            self.config = refreshed;
            if self.config.exit {
                info!(completed, "training loop exits");
                self.config_channel.clear_exit()?;
                self.config.exit = false;
                return Ok(completed);
            }
            self.run_generation()?;
            completed += 1;
        }
    }

    fn run_generation(&mut self) -> Result<(), SchedulerError> {
        let loop_ix = self.state.loop_ix + 1;
        let _span = tracing::info_span!("generation", loop_ix).entered();
        let started = Instant::now();
        info!(
            learners = self.population.learners.len(),
            refs = self.population.refs.len(),
            "generation starts"
        );

        let mut rng = rand::rng();
        let cix = fill_learners(
            &self.store,
            &mut self.population,
            &self.config,
            loop_ix,
            &mut rng,
        )?;
        if self.population.refs.is_empty() {
            bootstrap_refs(
                &self.store,
                &mut self.population,
                &self.config,
                loop_ix,
                cix,
                &mut rng,
            )?;
        }

        let pairs = run_training(&self.store, &mut self.engine, &self.population, &self.config)?;
        let outcome = run_test(
            &self.store,
            &mut self.engine,
            &self.population,
            pairs,
            &self.config,
        )?;

        let analysis = analyze_pairs(&outcome, &self.state.lifemarks, &self.config)?;
        apply_survivors(&self.store, &analysis)?;
        self.population.learners = analysis.survivors.clone();

        let ranked = rank_refs(&self.population.refs, &outcome)?;
        if loop_ix % self.config.n_loops_pmt == 0 {
            if let Some(&best) = ranked.first() {
                self.archive
                    .archive_from(&self.store, best, self.config.n_dmk_pmt)?;
            }
        }
        let update = rebalance(
            &self.store,
            &mut self.population.refs,
            &ranked,
            &analysis,
            &outcome,
            &self.config,
        )?;

        self.state = LoopState {
            loop_ix,
            lifemarks: analysis.lifemarks.clone(),
        };
        self.state_store.write(&self.state)?;

        let loop_secs = started.elapsed().as_secs_f64();
        self.metrics.append(&LoopMetrics {
            loop_ix,
            refs_gain: update.refs_gain,
            refs_won_stdev_avg: update.refs_won_stdev_avg,
            speed: outcome.speed,
            game_size_tr: self.config.game_size_tr,
            game_size_ts: self.config.game_size_ts,
            sep_fraction: analysis.sep_fraction,
            loop_secs,
        })?;
        info!(loop_secs, "generation finished");

        if self.config.pause {
            self.pause_gate.wait(loop_ix)?;
        }
        if loop_ix % self.config.n_loops_pmt == 0 {
            self.archive
                .tournament(&mut self.archive_engine, &self.config)?;
        }
        adjust_game_sizes(&mut self.config, analysis.sep_fraction);
        Ok(())
    }
}

/// Grows the game sizes when measurements stop separating.
///
/// Too low a separation fraction means the test volume no longer resolves
/// the pairs, so the test game grows; the training game follows once the
/// test game outgrows it by more than the allowed factor.
fn adjust_game_sizes(config: &mut LoopConfig, sep_fraction: f32) {
    if sep_fraction < config.min_sep {
        config.game_size_ts += config.game_size_upd;
        info!(
            sep_fraction,
            game_size_ts = config.game_size_ts,
            "test game size increased"
        );
    }
    if config.game_size_ts > config.game_size_tr * u64::from(config.factor_ts_tr) {
        config.game_size_tr += config.game_size_upd;
        info!(game_size_tr = config.game_size_tr, "training game size increased");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    };

    use evoker_agent::{AgentId, Family, FsAgentStore};
    use evoker_engine::{SyntheticEngine, SyntheticEngineConfig};

    use crate::{
        config::ConfigError,
        persist::JsonStateStore,
    };

    use super::*;

    /// Channel that lets a fixed number of generations run, then exits.
    #[derive(Debug)]
    struct ExitAfter {
        remaining: u32,
    }

    impl ConfigChannel for ExitAfter {
        fn refresh(&mut self, current: &LoopConfig) -> Result<LoopConfig, ConfigError> {
            let mut config = current.clone();
            if self.remaining == 0 {
                config.exit = true;
            } else {
                self.remaining -= 1;
            }
            Ok(config)
        }
    }

    #[derive(Debug)]
    struct CountingGate(Arc<AtomicU32>);

    impl PauseGate for CountingGate {
        fn wait(&mut self, _loop_ix: u32) -> Result<(), SchedulerError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn family(tag: char) -> Family {
        Family::new(tag).unwrap()
    }

    fn test_config() -> LoopConfig {
        LoopConfig {
            families: vec![family('a')],
            ndmk_learners: 4,
            ndmk_refs: 2,
            ndmk_tr: 2,
            ndmk_ts: 4,
            game_size_tr: 4_000,
            game_size_ts: 4_000,
            game_size_upd: 2_000,
            dmk_n_players_tr: 10,
            dmk_n_players_ts: 10,
            min_sep: 0.0,
            prob_fresh_dmk: 1.0,
            n_loops_pmt: 2,
            n_dmk_pmt: 3,
            ..LoopConfig::default()
        }
    }

    type TestDriver =
        Driver<FsAgentStore, SyntheticEngine<FsAgentStore>, JsonStateStore, ExitAfter, CountingGate>;

    fn build_driver(
        dir: &std::path::Path,
        config: LoopConfig,
        generations: u32,
    ) -> (TestDriver, Arc<AtomicU32>) {
        let store = FsAgentStore::open(dir.join("agents")).unwrap();
        let archive = PmtArchive::open(dir.join("pmt")).unwrap();
        let engine_config = SyntheticEngineConfig {
            interval_hands: 500,
            ..SyntheticEngineConfig::default()
        };
        let engine = SyntheticEngine::with_options(
            store.clone(),
            *b"evoker-driver-ts",
            engine_config.clone(),
        );
        let archive_engine = SyntheticEngine::with_options(
            archive.store().clone(),
            *b"evoker-driver-pm",
            engine_config,
        );
        let pauses = Arc::new(AtomicU32::new(0));
        let driver = Driver::new(DriverSetup {
            store,
            engine,
            archive,
            archive_engine,
            config_channel: ExitAfter {
                remaining: generations,
            },
            state_store: JsonStateStore::new(dir.join("state.json")),
            metrics: MetricsWriter::new(dir.join("metrics.jsonl")),
            pause_gate: CountingGate(Arc::clone(&pauses)),
            config,
        })
        .unwrap();
        (driver, pauses)
    }

    fn metric_rows(dir: &std::path::Path) -> Vec<serde_json::Value> {
        let text = std::fs::read_to_string(dir.join("metrics.jsonl")).unwrap();
        text.lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[test]
    fn test_first_generation_builds_population_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let (mut driver, _) = build_driver(dir.path(), test_config(), 1);

        assert_eq!(driver.run().unwrap(), 1);

        let population = driver.population();
        assert_eq!(population.learners.len(), 4);
        assert_eq!(population.refs.len(), 2);
        assert!(population.refs.iter().all(|id| id.is_reference()));
        assert!(
            population
                .learners
                .iter()
                .chain(&population.refs)
                .all(|&id| driver.store.exists(id) && id.family() == family('a'))
        );

        let state = driver.saved_state().unwrap().unwrap();
        assert_eq!(state.loop_ix, 1);
        assert_eq!(state.lifemarks.len(), 4);
        assert!(state.lifemarks.values().all(|lm| lm.len() == 1));

        let rows = metric_rows(dir.path());
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["loop_ix"], 1);
        assert_eq!(rows[0]["game_size_ts"], 4_000);
    }

    #[test]
    fn test_three_generations_keep_population_invariants() {
        let dir = tempfile::tempdir().unwrap();
        let (mut driver, _) = build_driver(dir.path(), test_config(), 3);

        assert_eq!(driver.run().unwrap(), 3);
        assert_eq!(driver.loops_completed(), 3);

        let population = driver.population();
        assert_eq!(population.learners.len(), 4);
        assert_eq!(population.refs.len(), 2);
        assert!(population.learners.iter().all(|id| !id.is_reference()));
        assert!(population.refs.iter().all(|id| id.is_reference()));

        // Stored agents and the in-memory population must agree.
        let stored = Population::from_ids(driver.store.list().unwrap());
        let mut learners = population.learners.clone();
        learners.sort_unstable();
        assert_eq!(stored.learners, learners);
        let mut refs = population.refs.clone();
        refs.sort_unstable();
        assert_eq!(stored.refs, refs);

        // One lifemark per surviving lineage, one mark per generation.
        let state = driver.saved_state().unwrap().unwrap();
        assert_eq!(state.lifemarks.len(), 4);
        assert!(state.lifemarks.values().all(|lm| lm.len() == 3));
        assert_eq!(metric_rows(dir.path()).len(), 3);
    }

    #[test]
    fn test_run_resumes_where_the_last_run_stopped() {
        let dir = tempfile::tempdir().unwrap();
        let (mut first, _) = build_driver(dir.path(), test_config(), 2);
        assert_eq!(first.run().unwrap(), 2);
        let parted = first.population().clone();
        drop(first);

        let (mut second, _) = build_driver(dir.path(), test_config(), 1);
        let state = second.saved_state().unwrap().unwrap();
        assert_eq!(state.loop_ix, 2);
        second.resume_from(state).unwrap();

        let mut resumed = second.population().clone();
        resumed.learners.sort_unstable();
        resumed.refs.sort_unstable();
        let mut parted_sorted = parted;
        parted_sorted.learners.sort_unstable();
        parted_sorted.refs.sort_unstable();
        assert_eq!(resumed, parted_sorted);

        assert_eq!(second.run().unwrap(), 1);
        assert_eq!(second.loops_completed(), 3);
        assert_eq!(second.saved_state().unwrap().unwrap().loop_ix, 3);
    }

    #[test]
    fn test_resume_restores_lifemark_histories() {
        let dir = tempfile::tempdir().unwrap();
        let veteran: AgentId = "dmk01a00_00".parse().unwrap();
        {
            let store = FsAgentStore::open(dir.path().join("agents")).unwrap();
            store.create(veteran).unwrap();
            let mut lifemarks = std::collections::BTreeMap::new();
            lifemarks.insert(veteran, "+|-".parse().unwrap());
            JsonStateStore::new(dir.path().join("state.json"))
                .write(&LoopState { loop_ix: 5, lifemarks })
                .unwrap();
        }

        let (mut driver, _) = build_driver(dir.path(), test_config(), 1);
        let state = driver.saved_state().unwrap().unwrap();
        driver.resume_from(state).unwrap();
        assert_eq!(driver.run().unwrap(), 1);
        assert_eq!(driver.loops_completed(), 6);

        // The veteran's lineage carries its old history plus one new mark.
        let state = driver.saved_state().unwrap().unwrap();
        let (id, lifemark) = state
            .lifemarks
            .iter()
            .find(|(id, _)| id.same_slot(veteran))
            .unwrap();
        assert!(!id.is_reference());
        assert!(lifemark.as_str().starts_with("+|-"));
        assert_eq!(lifemark.len(), 4);
    }

    #[test]
    fn test_exit_before_first_generation_does_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let (mut driver, _) = build_driver(dir.path(), test_config(), 0);

        assert_eq!(driver.run().unwrap(), 0);
        assert_eq!(driver.loops_completed(), 0);
        assert!(driver.saved_state().unwrap().is_none());
        assert!(driver.population().learners.is_empty());
    }

    #[test]
    fn test_pause_gate_runs_once_per_generation() {
        let dir = tempfile::tempdir().unwrap();
        let config = LoopConfig {
            pause: true,
            ..test_config()
        };
        let (mut driver, pauses) = build_driver(dir.path(), config, 2);

        assert_eq!(driver.run().unwrap(), 2);
        assert_eq!(pauses.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_low_separation_grows_test_then_training_game() {
        let mut config = LoopConfig {
            game_size_tr: 1_000,
            game_size_ts: 1_000,
            game_size_upd: 500,
            min_sep: 0.5,
            factor_ts_tr: 2,
            ..LoopConfig::default()
        };

        adjust_game_sizes(&mut config, 0.2);
        assert_eq!((config.game_size_ts, config.game_size_tr), (1_500, 1_000));
        adjust_game_sizes(&mut config, 0.2);
        assert_eq!((config.game_size_ts, config.game_size_tr), (2_000, 1_000));
        adjust_game_sizes(&mut config, 0.2);
        assert_eq!((config.game_size_ts, config.game_size_tr), (2_500, 1_500));
        // Healthy separation leaves both sizes alone.
        adjust_game_sizes(&mut config, 0.9);
        assert_eq!((config.game_size_ts, config.game_size_tr), (2_500, 1_500));
    }
}
