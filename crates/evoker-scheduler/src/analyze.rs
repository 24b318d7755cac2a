//! Test-pass analysis: separation verdicts, lifemarks, and pruning.
//!
//! Every `(base, aged)` pair gets a verdict: the aged copy replaces its
//! base only when the two measurably separated and the aged one won more.
//! The pair's lifemark history gains one mark per generation and follows
//! whichever copy survives; histories whose trailing window turned sour
//! get the learner removed from the cohort altogether.

use std::collections::BTreeMap;

use evoker_agent::{AgentId, AgentStore, Lifemark, Mark};
use evoker_stats::separation::{rank_descending, separation_factor};
use tracing::{debug, info};

use crate::{SchedulerError, config::LoopConfig, rounds::TestOutcome};

/// How one `(base, aged)` pair came out of the test pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PairVerdict {
    pub base: AgentId,
    pub aged: AgentId,
    /// Separation factor between the two measurements.
    pub factor: f32,
    pub separated: bool,
    /// Aged final win rate minus base final win rate.
    pub delta: f32,
    /// Mark appended to the pair's lifemark history.
    pub mark: Mark,
}

/// Everything one generation's analysis decided.
#[derive(Debug, Clone, Default)]
pub struct Analysis {
    pub verdicts: Vec<PairVerdict>,
    /// Aged copies that separated and improved, best first. These are the
    /// promotion candidates for the reference pool.
    pub improved: Vec<AgentId>,
    /// The learner cohort after keeper selection and lifemark pruning.
    pub survivors: Vec<AgentId>,
    /// Learners dropped by the lifemark removal rule.
    pub removed: Vec<AgentId>,
    /// Lifemark histories of the survivors.
    pub lifemarks: BTreeMap<AgentId, Lifemark>,
    /// Fraction of pairs that separated; `1.0` when there were no pairs.
    pub sep_fraction: f32,
}

/// Judges every measured pair and rolls the lifemark histories forward.
///
/// `prior` holds the histories persisted after the previous generation,
/// keyed by the base learner names. The returned map is keyed by the
/// survivor names instead, with removed learners' histories dropped.
#[expect(clippy::cast_precision_loss)]
pub fn analyze_pairs(
    outcome: &TestOutcome,
    prior: &BTreeMap<AgentId, Lifemark>,
    config: &LoopConfig,
) -> Result<Analysis, SchedulerError> {
    let mut verdicts = Vec::with_capacity(outcome.pairs.len());
    let mut scored = Vec::with_capacity(outcome.pairs.len());
    for pair in &outcome.pairs {
        let base = outcome.record(pair.base)?;
        let aged = outcome.record(pair.aged)?;
        let factor = separation_factor(base.summary, aged.summary, config.sep_n_stdev);
        let separated = factor >= 1.0;
        let delta = aged.final_won() - base.final_won();
        let mark = if separated {
            if delta > 0.0 {
                Mark::Improved
            } else {
                Mark::Worsened
            }
        } else {
            Mark::Inconclusive
        };
        scored.push((verdicts.len(), aged.final_won()));
        verdicts.push(PairVerdict {
            base: pair.base,
            aged: pair.aged,
            factor,
            separated,
            delta,
            mark,
        });
    }

    let ranked = rank_descending(scored);
    for (pos, &(ix, won)) in ranked.iter().enumerate() {
        let verdict = &verdicts[ix];
        info!(
            pos,
            agent = %verdict.aged,
            won,
            delta = verdict.delta,
            factor = verdict.factor,
            mark = %verdict.mark,
            "learner result"
        );
    }
    let improved: Vec<AgentId> = ranked
        .iter()
        .filter(|&&(ix, _)| verdicts[ix].mark == Mark::Improved)
        .map(|&(ix, _)| verdicts[ix].aged)
        .collect();
    info!(count = improved.len(), "learners separated and improved");

    let mut survivors = Vec::with_capacity(verdicts.len());
    let mut lifemarks = BTreeMap::new();
    for verdict in &verdicts {
        let keeper = if verdict.mark == Mark::Improved {
            verdict.aged
        } else {
            verdict.base
        };
        let mut lifemark = prior.get(&verdict.base).cloned().unwrap_or_default();
        lifemark.push(verdict.mark);
        lifemarks.insert(keeper, lifemark);
        survivors.push(keeper);
    }

    let mut removed = Vec::new();
    survivors.retain(|id| {
        let due = lifemarks
            .get(id)
            .is_some_and(|lifemark| lifemark.removal_due(config.remove_key));
        if due {
            removed.push(*id);
        }
        !due
    });
    for id in &removed {
        if let Some(lifemark) = lifemarks.remove(id) {
            info!(agent = %id, lifemark = %lifemark, "removing learner with bad lifemark");
        }
    }

    let sep_fraction = if verdicts.is_empty() {
        1.0
    } else {
        verdicts.iter().filter(|verdict| verdict.separated).count() as f32 / verdicts.len() as f32
    };

    Ok(Analysis {
        verdicts,
        improved,
        survivors,
        removed,
        lifemarks,
        sep_fraction,
    })
}

/// Deletes every pair member that did not make it into the survivor list.
pub fn apply_survivors<S>(store: &S, analysis: &Analysis) -> Result<(), SchedulerError>
where
    S: AgentStore + ?Sized,
{
    for verdict in &analysis.verdicts {
        for id in [verdict.base, verdict.aged] {
            if !analysis.survivors.contains(&id) {
                store.delete(id)?;
                debug!(agent = %id, "deleted non-surviving learner");
            }
        }
    }
    Ok(())
}
