//! Simulation engine interface and the synthetic table engine.
//!
//! The scheduler talks to poker simulation through the [`SimulationEngine`]
//! trait: one blocking [`RoundSpec`] in, one aggregated [`RoundReport`]
//! out. How games are dealt, batched, or accelerated is entirely the
//! engine's business; the scheduler only ever sees per-agent win-rate
//! series.
//!
//! [`SyntheticEngine`] is the bundled implementation. It does not deal
//! cards; it derives win rates from stored behavior profiles plus seeded
//! table noise, which makes whole training runs reproducible and fast
//! enough for tests and dry runs.

pub use self::{round::*, synthetic::*};

pub mod round;
pub mod synthetic;

use evoker_agent::{AgentId, StoreError};

/// Error produced by a simulation engine.
#[derive(Debug, derive_more::Display, derive_more::Error)]
pub enum EngineError {
    /// The round spec lists no subjects to measure.
    #[display("round spec contains no subjects")]
    EmptyRound,
    /// The requested game volume cannot fill the two measurement
    /// intervals a spread estimate needs.
    #[display(
        "game size {game_size} yields fewer than two measurement intervals of {interval_hands} hands"
    )]
    TooFewHands { game_size: u64, interval_hands: u64 },
    /// The engine finished without a result for a requested subject.
    #[display("round produced no result for {id}")]
    Incomplete { id: AgentId },
    /// Agent state could not be read or written.
    #[display("agent storage failed during round")]
    Store(StoreError),
}

impl From<StoreError> for EngineError {
    fn from(source: StoreError) -> Self {
        Self::Store(source)
    }
}
