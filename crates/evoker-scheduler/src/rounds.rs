//! Training and test round orchestration.
//!
//! Training clones every learner into an aged twin and trains the twins
//! chunk by chunk against the reference pool. The test pass then measures
//! all `(base, aged)` pairs, plus a probe twin for every reference whose
//! base learner is no longer alive, spread round-robin over table groups
//! of bounded size so a pair never straddles two groups.

use std::collections::BTreeMap;

use evoker_agent::{AgentId, AgentStore};
use evoker_engine::{ResultRecord, RoundMode, RoundSpec, SepPair, SimulationEngine};
use tracing::{debug, info};

use crate::{SchedulerError, cohort::Population, config::LoopConfig};

/// One table group of a test pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TestGroup {
    pub subjects: Vec<AgentId>,
    /// The watched pairs whose both members sit in this group.
    pub pairs: Vec<SepPair>,
}

/// Group layout of a test pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TestPlan {
    pub groups: Vec<TestGroup>,
    /// `(reference, probe twin)` clones to create before the pass and
    /// drop after it.
    pub twins: Vec<(AgentId, AgentId)>,
}

/// Everything the analysis stage needs from one test pass.
#[derive(Debug, Clone)]
pub struct TestOutcome {
    /// Per-agent results merged across all groups. Probe results are
    /// keyed by the learner-shaped twin name.
    pub records: BTreeMap<AgentId, ResultRecord>,
    /// The `(base, aged)` pairs that were measured.
    pub pairs: Vec<SepPair>,
    /// Mean hands per second across the group rounds.
    pub speed: f32,
}

impl TestOutcome {
    /// Looks a subject's result up, treating absence as an incomplete round.
    pub fn record(&self, id: AgentId) -> Result<&ResultRecord, SchedulerError> {
        self.records
            .get(&id)
            .ok_or(SchedulerError::RoundIncomplete { id })
    }
}

fn chunk_groups(ids: &[AgentId], group_size: usize) -> Vec<Vec<AgentId>> {
    assert!(group_size > 0, "group size must be positive");
    ids.chunks(group_size).map(<[AgentId]>::to_vec).collect()
}

/// Lays a test pass out over table groups.
///
/// A pair counts as one indivisible unit of two subjects; a stale
/// reference, one whose base learner left the cohort, contributes a
/// single-subject probe unit. Units are dealt round-robin over
/// `total.div_ceil(group_size)` groups.
#[must_use]
pub fn plan_test(
    learners: &[AgentId],
    pairs: &[SepPair],
    refs: &[AgentId],
    group_size: usize,
) -> TestPlan {
    assert!(group_size > 0, "group size must be positive");
    let twins: Vec<(AgentId, AgentId)> = refs
        .iter()
        .copied()
        .filter(|reference| !learners.contains(&reference.as_learner()))
        .map(|reference| (reference, reference.as_learner()))
        .collect();
    let total = 2 * pairs.len() + twins.len();
    if total == 0 {
        return TestPlan::default();
    }

    let n_groups = total.div_ceil(group_size);
    let mut groups = vec![TestGroup::default(); n_groups];
    let mut next = 0;
    for pair in pairs {
        let group = &mut groups[next % n_groups];
        group.subjects.extend([pair.base, pair.aged]);
        group.pairs.push(*pair);
        next += 1;
    }
    for &(_, twin) in &twins {
        groups[next % n_groups].subjects.push(twin);
        next += 1;
    }
    TestPlan { groups, twins }
}

/// Runs the training pass for one generation.
///
/// Every learner is first copied under its aged name; the aged copies
/// then train against the reference pool in chunks of `ndmk_tr`. The
/// originals stay untouched so the test pass can measure whether training
/// actually helped.
pub fn run_training<S, E>(
    store: &S,
    engine: &mut E,
    population: &Population,
    config: &LoopConfig,
) -> Result<Vec<SepPair>, SchedulerError>
where
    S: AgentStore + ?Sized,
    E: SimulationEngine + ?Sized,
{
    let mut pairs = Vec::with_capacity(population.learners.len());
    for &base in &population.learners {
        let aged = base.aged();
        store.clone_agent(base, aged)?;
        pairs.push(SepPair { base, aged });
    }

    let subjects: Vec<AgentId> = pairs.iter().map(|pair| pair.aged).collect();
    for (group_ix, group) in chunk_groups(&subjects, config.ndmk_tr)
        .into_iter()
        .enumerate()
    {
        info!(group_ix, subjects = group.len(), "running training round");
        let spec = RoundSpec {
            mode: RoundMode::Train,
            subjects: group,
            refs: population.refs.clone(),
            game_size: config.game_size_tr,
            players_per_agent: config.dmk_n_players_tr,
            sep_pairs: Vec::new(),
            sep_break_factor: None,
            n_stdev: config.sep_n_stdev,
        };
        let report = engine.run_round(&spec)?;
        info!(
            group_ix,
            speed = report.stats.speed,
            hands = report.stats.hands_played,
            "training round finished"
        );
    }
    Ok(pairs)
}

/// Runs the test pass for one generation and collects all results.
///
/// Probe twins are created before the first group and deleted again
/// whether or not a group round fails. Each group round may stop early
/// once `sep_pairs_factor` of its watched pairs are separated.
#[expect(clippy::cast_precision_loss)]
pub fn run_test<S, E>(
    store: &S,
    engine: &mut E,
    population: &Population,
    pairs: Vec<SepPair>,
    config: &LoopConfig,
) -> Result<TestOutcome, SchedulerError>
where
    S: AgentStore + ?Sized,
    E: SimulationEngine + ?Sized,
{
    let plan = plan_test(
        &population.learners,
        &pairs,
        &population.refs,
        config.ndmk_ts,
    );
    for &(reference, twin) in &plan.twins {
        store.clone_agent(reference, twin)?;
        debug!(reference = %reference, twin = %twin, "created reference probe twin");
    }

    let mut records = BTreeMap::new();
    let mut speeds = Vec::with_capacity(plan.groups.len());
    let mut failure = None;
    for (group_ix, group) in plan.groups.iter().enumerate() {
        info!(
            group_ix,
            subjects = group.subjects.len(),
            pairs = group.pairs.len(),
            "running test round"
        );
        let spec = RoundSpec {
            mode: RoundMode::Test,
            subjects: group.subjects.clone(),
            refs: population.refs.clone(),
            game_size: config.game_size_ts,
            players_per_agent: config.dmk_n_players_ts,
            sep_pairs: group.pairs.clone(),
            sep_break_factor: Some(config.sep_pairs_factor),
            n_stdev: config.sep_n_stdev,
        };
        match engine.run_round(&spec) {
            Ok(report) => {
                info!(
                    group_ix,
                    speed = report.stats.speed,
                    hands = report.stats.hands_played,
                    "test round finished"
                );
                speeds.push(report.stats.speed);
                records.extend(report.records);
            }
            Err(err) => {
                failure = Some(err);
                break;
            }
        }
    }

    // Probe twins never outlive the pass, even a failed one.
    for &(_, twin) in &plan.twins {
        store.delete(twin)?;
    }
    if let Some(err) = failure {
        return Err(err.into());
    }

    for group in &plan.groups {
        for &subject in &group.subjects {
            if !records.contains_key(&subject) {
                return Err(SchedulerError::RoundIncomplete { id: subject });
            }
        }
    }

    let speed = if speeds.is_empty() {
        0.0
    } else {
        speeds.iter().sum::<f32>() / speeds.len() as f32
    };
    Ok(TestOutcome {
        records,
        pairs,
        speed,
    })
}
