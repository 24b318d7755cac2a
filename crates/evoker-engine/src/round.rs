use std::{collections::BTreeMap, fmt};

use evoker_agent::{AgentId, Family};
use evoker_stats::{separation::PerfSummary, series::SampleSeries};

use crate::EngineError;

/// What a round is allowed to do to the participating agents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundMode {
    /// Subjects' parameters are updated while they play.
    Train,
    /// Pure measurement, nobody learns.
    Test,
}

/// A `(pre-age, aged)` twin pair whose separation the round should watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SepPair {
    pub base: AgentId,
    pub aged: AgentId,
}

/// One blocking round request handed to a simulation engine.
#[derive(Debug, Clone)]
pub struct RoundSpec {
    pub mode: RoundMode,
    /// Agents whose results are collected (and, in training, updated).
    pub subjects: Vec<AgentId>,
    /// Frozen opponents every subject plays against. When empty, subjects
    /// play each other.
    pub refs: Vec<AgentId>,
    /// Number of hands to play per agent.
    pub game_size: u64,
    /// Table fan-out hint: simultaneous seats per agent.
    pub players_per_agent: u32,
    /// Twin pairs to watch for the early-stop check. When empty and an
    /// early-stop factor is set, all subject pairs are watched instead.
    pub sep_pairs: Vec<SepPair>,
    /// Fraction of watched pairs that must be separated before a test
    /// round may stop early. `None` disables the early stop.
    pub sep_break_factor: Option<f32>,
    /// Separation confidence multiplier for the early-stop check.
    pub n_stdev: f32,
}

/// Measured outcome of one agent over one round.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultRecord {
    pub family: Family,
    pub age: u32,
    pub trainable: bool,
    /// Win rate measured over each completed interval.
    pub interval_won: Vec<f32>,
    /// Cumulative win rate after each interval; the last entry is the
    /// round result.
    pub cumulative_won: Vec<f32>,
    /// Sample stdev of the interval samples.
    pub won_stdev: f32,
    /// Condensed summary used for ranking and separation checks.
    pub summary: PerfSummary,
}

impl ResultRecord {
    /// Builds a record from an accumulated interval series.
    ///
    /// # Returns
    ///
    /// * `Some(record)` - if the series holds at least two intervals
    /// * `None` - if the series is too short to estimate its spread
    #[must_use]
    pub fn from_series(
        family: Family,
        age: u32,
        trainable: bool,
        series: &SampleSeries,
    ) -> Option<Self> {
        let summary = series.summary()?;
        Some(Self {
            family,
            age,
            trainable,
            interval_won: series.samples().to_vec(),
            cumulative_won: series.running_means().to_vec(),
            won_stdev: series.stdev()?,
            summary,
        })
    }

    /// Final cumulative win rate of the round.
    #[must_use]
    pub fn final_won(&self) -> f32 {
        self.summary.win_rate
    }
}

/// Round-level throughput numbers reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoundStats {
    /// Hands played per second across all tables.
    pub speed: f32,
    /// Hands actually played per agent; lower than the requested game
    /// size when the round stopped early.
    pub hands_played: u64,
}

/// Aggregated result of one round.
#[derive(Debug, Clone, PartialEq)]
pub struct RoundReport {
    /// One record per requested subject.
    pub records: BTreeMap<AgentId, ResultRecord>,
    pub stats: RoundStats,
}

/// A poker simulation backend.
///
/// One call runs one full round and blocks until aggregated results are
/// available; the engine may fan out internally however it likes, but the
/// caller never issues two rounds concurrently.
pub trait SimulationEngine: fmt::Debug + Send {
    fn run_round(&mut self, spec: &RoundSpec) -> Result<RoundReport, EngineError>;
}
