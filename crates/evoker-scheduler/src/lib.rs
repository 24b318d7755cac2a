//! Population scheduling for iterated self-play training.
//!
//! One generation ("loop") of the scheduler tops the learner cohort up to
//! its target size, trains an aged copy of every learner against the
//! frozen reference pool, tests the (base, aged) pairs, appends one
//! lifemark per learner, prunes decayed learners, promotes clear improvers
//! into the reference pool, and persists loop state so an interrupted run
//! resumes where it stopped. Every few generations the current best
//! reference is snapshotted into a bounded tournament archive for
//! longitudinal, monitoring-only ranking.
//!
//! The [`driver::Driver`] owns the loop; the other modules are its phases:
//!
//! - [`cohort`] creates agents and bootstraps the first reference pool;
//! - [`rounds`] partitions and runs training and test rounds;
//! - [`analyze`] scores pairs, updates lifemarks, selects survivors;
//! - [`refpool`] promotes learners into the reference pool;
//! - [`archive`] maintains the tournament archive;
//! - [`config`], [`persist`], and [`metrics`] carry the knobs, the resume
//!   state, and the monitoring rows.

pub use self::{
    analyze::*, archive::*, cohort::*, config::*, driver::*, metrics::*, persist::*, refpool::*,
    rounds::*,
};

pub mod analyze;
pub mod archive;
pub mod cohort;
pub mod config;
pub mod driver;
pub mod metrics;
pub mod persist;
pub mod refpool;
pub mod rounds;

use evoker_agent::{AgentId, StoreError};
use evoker_engine::EngineError;

/// Error produced while driving the population loop.
#[derive(Debug, derive_more::Display, derive_more::Error)]
pub enum SchedulerError {
    /// A configuration snapshot could not be produced or failed validation.
    #[display("configuration rejected")]
    Config(ConfigError),
    /// Checkpoint state or metadata was unavailable for a named agent.
    #[display("agent state unavailable")]
    AgentState(StoreError),
    /// The simulation engine failed to run a round.
    #[display("simulation round failed")]
    Round(EngineError),
    /// A round finished without a result a population decision needs.
    #[display("round returned no result for {id}")]
    RoundIncomplete { id: AgentId },
    /// Loop state or metrics could not be written durably.
    #[display("persistence failed")]
    Persist(PersistError),
}

impl From<ConfigError> for SchedulerError {
    fn from(source: ConfigError) -> Self {
        Self::Config(source)
    }
}

impl From<StoreError> for SchedulerError {
    fn from(source: StoreError) -> Self {
        Self::AgentState(source)
    }
}

impl From<EngineError> for SchedulerError {
    fn from(source: EngineError) -> Self {
        Self::Round(source)
    }
}

impl From<PersistError> for SchedulerError {
    fn from(source: PersistError) -> Self {
        Self::Persist(source)
    }
}
