//! Profile-driven stand-in for a real poker table engine.

use std::collections::BTreeMap;

use evoker_agent::{AgentId, AgentStore};
use evoker_stats::{
    separation::{PerfSummary, SeparationReport},
    series::SampleSeries,
};
use rand::{Rng as _, SeedableRng as _};
use rand_distr::Normal;
use rand_pcg::Pcg32;

use crate::{
    EngineError,
    round::{ResultRecord, RoundMode, RoundReport, RoundSpec, RoundStats, SimulationEngine},
};

/// Synthetic throughput per seat, hands per second.
const SEAT_SPEED: f32 = 4.2;

/// Tuning knobs of the synthetic table model.
#[derive(Debug, Clone)]
pub struct SyntheticEngineConfig {
    /// Hands per measurement interval.
    pub interval_hands: u64,
    /// Intervals to play before the early-stop check is consulted.
    pub min_break_intervals: usize,
    /// Multiplier turning a strength edge into a win rate.
    pub won_scale: f32,
    /// Per-hand outcome noise; interval noise shrinks with interval size.
    pub per_hand_stdev: f32,
    /// Training drift toward full strength per training round.
    pub train_rate: f32,
    /// Per-weight training noise, the source of occasional regressions.
    pub train_sigma: f32,
}

impl Default for SyntheticEngineConfig {
    fn default() -> Self {
        Self {
            interval_hands: 10_000,
            min_break_intervals: 4,
            won_scale: 600.0,
            per_hand_stdev: 3_000.0,
            train_rate: 0.05,
            train_sigma: 0.06,
        }
    }
}

/// Simulation engine that derives win rates from stored profiles.
///
/// Each subject's expected win rate is its strength edge over the opponent
/// pool, scaled to a per-hand rate; every interval adds seeded Gaussian
/// table noise on top. Training rounds drift the subjects' profiles
/// upward with diminishing returns, so a fixed seed reproduces a whole
/// training run exactly.
#[derive(Debug)]
pub struct SyntheticEngine<S> {
    store: S,
    rng: Pcg32,
    config: SyntheticEngineConfig,
}

impl<S> SyntheticEngine<S>
where
    S: AgentStore,
{
    /// Creates an engine with a random seed and default tuning.
    #[must_use]
    pub fn new(store: S) -> Self {
        Self::with_seed(store, rand::rng().random())
    }

    /// Like [`Self::new`], but with a specific seed for reproducible runs.
    #[must_use]
    pub fn with_seed(store: S, seed: [u8; 16]) -> Self {
        Self::with_options(store, seed, SyntheticEngineConfig::default())
    }

    #[must_use]
    pub fn with_options(store: S, seed: [u8; 16], config: SyntheticEngineConfig) -> Self {
        Self {
            store,
            rng: Pcg32::from_seed(seed),
            config,
        }
    }

    /// Expected win rate of each subject against its opponent pool.
    #[expect(clippy::cast_precision_loss)]
    fn edges(&self, subject_strengths: &[f32], ref_strengths: &[f32]) -> Vec<f32> {
        if ref_strengths.is_empty() {
            // Self-contained tournament: everyone plays everyone else.
            let total: f32 = subject_strengths.iter().sum();
            let n_others = subject_strengths.len().saturating_sub(1).max(1) as f32;
            subject_strengths
                .iter()
                .map(|&s| (s - (total - s) / n_others) * self.config.won_scale)
                .collect()
        } else {
            let pool = ref_strengths.iter().sum::<f32>() / ref_strengths.len() as f32;
            subject_strengths
                .iter()
                .map(|&s| (s - pool) * self.config.won_scale)
                .collect()
        }
    }

    fn should_break(&self, spec: &RoundSpec, series: &[SampleSeries], done: usize) -> bool {
        if spec.mode != RoundMode::Test {
            return false;
        }
        let Some(break_factor) = spec.sep_break_factor else {
            return false;
        };
        if done < self.config.min_break_intervals {
            return false;
        }
        let summaries: BTreeMap<AgentId, PerfSummary> = spec
            .subjects
            .iter()
            .zip(series)
            .filter_map(|(&id, s)| Some((id, s.summary()?)))
            .collect();
        let pairs: Vec<(PerfSummary, PerfSummary)> = if spec.sep_pairs.is_empty() {
            let all: Vec<PerfSummary> = summaries.into_values().collect();
            let mut pairs = Vec::new();
            for i in 0..all.len() {
                for j in (i + 1)..all.len() {
                    pairs.push((all[i], all[j]));
                }
            }
            pairs
        } else {
            let unknown = PerfSummary {
                win_rate: 0.0,
                mean_stdev: None,
            };
            spec.sep_pairs
                .iter()
                .map(
                    |pair| match (summaries.get(&pair.base), summaries.get(&pair.aged)) {
                        (Some(&base), Some(&aged)) => (base, aged),
                        _ => (unknown, unknown),
                    },
                )
                .collect()
        };
        SeparationReport::new(&pairs, spec.n_stdev).fraction() >= break_factor
    }
}

impl<S> SimulationEngine for SyntheticEngine<S>
where
    S: AgentStore,
{
    #[expect(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    fn run_round(&mut self, spec: &RoundSpec) -> Result<RoundReport, EngineError> {
        if spec.subjects.is_empty() {
            return Err(EngineError::EmptyRound);
        }
        let n_intervals = (spec.game_size / self.config.interval_hands) as usize;
        // A single interval cannot estimate its own spread, so the round
        // would end without usable records anyway.
        if n_intervals < 2 {
            return Err(EngineError::TooFewHands {
                game_size: spec.game_size,
                interval_hands: self.config.interval_hands,
            });
        }

        let mut subject_strengths = Vec::with_capacity(spec.subjects.len());
        for &id in &spec.subjects {
            subject_strengths.push(self.store.load_profile(id)?.strength());
        }
        let mut ref_strengths = Vec::with_capacity(spec.refs.len());
        for &id in &spec.refs {
            ref_strengths.push(self.store.load_profile(id)?.strength());
        }
        let edges = self.edges(&subject_strengths, &ref_strengths);

        let interval_stdev = self.config.per_hand_stdev / (self.config.interval_hands as f32).sqrt();
        let noise = Normal::new(0.0, interval_stdev).unwrap();

        let mut series = vec![SampleSeries::new(); spec.subjects.len()];
        let mut done = 0;
        for _ in 0..n_intervals {
            for (series, &edge) in series.iter_mut().zip(&edges) {
                let sample = edge + self.rng.sample(noise);
                series.push(sample);
            }
            done += 1;
            if self.should_break(spec, &series, done) {
                tracing::debug!(intervals = done, of = n_intervals, "round separated early");
                break;
            }
        }

        if spec.mode == RoundMode::Train {
            for &id in &spec.subjects {
                let mut profile = self.store.load_profile(id)?;
                let drift = self.config.train_rate * (1.0 - profile.strength());
                profile.perturb(drift, self.config.train_sigma, &mut self.rng);
                self.store.save_profile(id, &profile)?;
            }
        }

        let mut records = BTreeMap::new();
        for (&id, series) in spec.subjects.iter().zip(&series) {
            let meta = self.store.load_meta(id)?;
            let record = ResultRecord::from_series(meta.family, meta.age, meta.trainable, series)
                .ok_or(EngineError::Incomplete { id })?;
            records.insert(id, record);
        }

        let seats = (spec.subjects.len() + spec.refs.len()) as f32 * spec.players_per_agent as f32;
        let stats = RoundStats {
            speed: seats * SEAT_SPEED,
            hands_played: done as u64 * self.config.interval_hands,
        };
        Ok(RoundReport { records, stats })
    }
}
