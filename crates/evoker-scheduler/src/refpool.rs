//! Reference pool ranking, promotion, and eviction.
//!
//! References never play under their own name: each one is measured
//! through a learner-shaped probe result, either its still-living base
//! learner or the probe twin the test pass created for it. Promotion
//! walks the best improved learners worst-first; a candidate replaces the
//! reference holding its own lineage slot outright, and otherwise must
//! statistically separate from the weakest remaining reference to enter.

use evoker_agent::{AgentId, AgentStore};
use evoker_stats::separation::{rank_descending, separation_factor};
use tracing::info;

use crate::{SchedulerError, analyze::Analysis, config::LoopConfig, rounds::TestOutcome};

/// One generation's changes to the reference pool.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RefsUpdate {
    /// `(learner, new reference)` promotions, best learner first.
    pub promoted: Vec<(AgentId, AgentId)>,
    /// References dropped from the pool.
    pub evicted: Vec<AgentId>,
    /// Summed win-rate improvement of the promoted learners.
    pub refs_gain: f32,
    /// Mean interval stdev across the pool before the update.
    pub refs_won_stdev_avg: f32,
}

/// Ranks the reference pool from strongest to weakest probe result.
pub fn rank_refs(
    refs: &[AgentId],
    outcome: &TestOutcome,
) -> Result<Vec<AgentId>, SchedulerError> {
    let mut scored = Vec::with_capacity(refs.len());
    for &reference in refs {
        let won = outcome.record(reference.as_learner())?.final_won();
        scored.push((reference, won));
    }
    let ranked = rank_descending(scored);
    for (pos, &(reference, won)) in ranked.iter().enumerate() {
        info!(pos, reference = %reference, won, "reference result");
    }
    Ok(ranked.into_iter().map(|(reference, _)| reference).collect())
}

/// Promotes improved learners into the pool and evicts what they displace.
///
/// `ranked` must be the pool ordered by [`rank_refs`]; `refs` is replaced
/// with the updated pool, surviving references first in ranked order and
/// new ones appended best first. The pool's stdev average is taken before
/// any change so the reported number describes the benchmark the learners
/// actually faced.
#[expect(clippy::cast_precision_loss)]
pub fn rebalance<S>(
    store: &S,
    refs: &mut Vec<AgentId>,
    ranked: &[AgentId],
    analysis: &Analysis,
    outcome: &TestOutcome,
    config: &LoopConfig,
) -> Result<RefsUpdate, SchedulerError>
where
    S: AgentStore + ?Sized,
{
    let mut stdev_total = 0.0;
    for &reference in refs.iter() {
        stdev_total += outcome.record(reference.as_learner())?.won_stdev;
    }
    let refs_won_stdev_avg = stdev_total / config.ndmk_refs as f32;

    let mut remaining = ranked.to_vec();
    let mut promoted_learners = Vec::new();
    for &candidate in analysis.improved.iter().take(config.ndmk_refs).rev() {
        let slot_match = remaining
            .iter()
            .position(|reference| reference.same_slot(candidate));
        if let Some(ix) = slot_match {
            remaining.remove(ix);
            promoted_learners.push(candidate);
        } else if let Some(&weakest) = remaining.last() {
            let candidate_summary = outcome.record(candidate)?.summary;
            let weakest_summary = outcome.record(weakest.as_learner())?.summary;
            if separation_factor(candidate_summary, weakest_summary, config.sep_n_stdev) >= 1.0 {
                remaining.pop();
                promoted_learners.push(candidate);
            }
        }
    }
    promoted_learners.reverse();

    let mut update = RefsUpdate {
        promoted: Vec::with_capacity(promoted_learners.len()),
        evicted: Vec::new(),
        refs_gain: 0.0,
        refs_won_stdev_avg,
    };
    for &reference in refs.iter() {
        if !remaining.contains(&reference) {
            store.delete(reference)?;
            update.evicted.push(reference);
            info!(reference = %reference, "evicted reference");
        }
    }
    for &learner in &promoted_learners {
        let reference = learner.as_reference();
        store.clone_agent(learner, reference)?;
        info!(learner = %learner, reference = %reference, "promoted learner into reference pool");
        if let Some(verdict) = analysis
            .verdicts
            .iter()
            .find(|verdict| verdict.aged == learner)
        {
            update.refs_gain += verdict.delta;
        }
        update.promoted.push((learner, reference));
        remaining.push(reference);
    }
    *refs = remaining;

    if !update.promoted.is_empty() {
        info!(
            promoted = update.promoted.len(),
            evicted = update.evicted.len(),
            refs_gain = update.refs_gain,
            "reference pool updated"
        );
    }
    Ok(update)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use evoker_agent::{Family, Mark, MemAgentStore};
    use evoker_engine::ResultRecord;
    use evoker_stats::separation::PerfSummary;

    use crate::analyze::PairVerdict;

    use super::*;

    fn family(tag: char) -> Family {
        Family::new(tag).unwrap()
    }

    fn id(name: &str) -> AgentId {
        name.parse().unwrap()
    }

    fn measurement(won: f32, won_stdev: f32) -> ResultRecord {
        ResultRecord {
            family: family('a'),
            age: 0,
            trainable: false,
            interval_won: vec![won],
            cumulative_won: vec![won],
            won_stdev,
            summary: PerfSummary {
                win_rate: won,
                mean_stdev: Some(1.0),
            },
        }
    }

    /// Outcome holding `(learner-shaped id, won, won_stdev)` rows.
    fn outcome(rows: &[(&str, f32, f32)]) -> TestOutcome {
        let records: BTreeMap<AgentId, ResultRecord> = rows
            .iter()
            .map(|&(name, won, stdev)| (id(name), measurement(won, stdev)))
            .collect();
        TestOutcome {
            records,
            pairs: Vec::new(),
            speed: 0.0,
        }
    }

    /// Analysis whose only content is one ranked list of improved agents.
    fn improved_analysis(improved: &[(AgentId, f32)]) -> Analysis {
        Analysis {
            verdicts: improved
                .iter()
                .map(|&(aged, delta)| PairVerdict {
                    base: aged.as_learner(),
                    aged,
                    factor: 2.0,
                    separated: true,
                    delta,
                    mark: Mark::Improved,
                })
                .collect(),
            improved: improved.iter().map(|&(aged, _)| aged).collect(),
            survivors: improved.iter().map(|&(aged, _)| aged).collect(),
            removed: Vec::new(),
            lifemarks: BTreeMap::new(),
            sep_fraction: 1.0,
        }
    }

    fn config(ndmk_refs: usize) -> LoopConfig {
        LoopConfig {
            ndmk_refs,
            ..LoopConfig::default()
        }
    }

    #[test]
    fn test_ranks_references_by_probe_results() {
        let weak = id("dmk01a00_00").as_reference();
        let strong = id("dmk01a01_00").as_reference();
        let outcome = outcome(&[("dmk01a00_00", 10.0, 1.0), ("dmk01a01_00", 30.0, 1.0)]);

        let ranked = rank_refs(&[weak, strong], &outcome).unwrap();
        assert_eq!(ranked, vec![strong, weak]);
    }

    #[test]
    fn test_missing_probe_result_is_an_error() {
        let reference = id("dmk01a00_00").as_reference();
        let err = rank_refs(&[reference], &outcome(&[])).unwrap_err();
        assert!(matches!(err, SchedulerError::RoundIncomplete { .. }));
    }

    #[test]
    fn test_slot_match_replaces_the_older_age_outright() {
        let store = MemAgentStore::new();
        let candidate = id("dmk01a00_01");
        store.create(candidate).unwrap();
        let old_slot = id("dmk01a00_00").as_reference();
        let other = id("dmk01a01_00").as_reference();
        store.create(old_slot).unwrap();
        store.create(other).unwrap();

        // The candidate is weaker than both, yet owns old_slot's lineage.
        let outcome = outcome(&[
            ("dmk01a00_00", 50.0, 1.0),
            ("dmk01a01_00", 40.0, 1.0),
            ("dmk01a00_01", 5.0, 1.0),
        ]);
        let mut refs = vec![old_slot, other];
        let ranked = rank_refs(&refs, &outcome).unwrap();
        let update = rebalance(
            &store,
            &mut refs,
            &ranked,
            &improved_analysis(&[(candidate, 2.0)]),
            &outcome,
            &config(2),
        )
        .unwrap();

        assert_eq!(update.evicted, vec![old_slot]);
        assert_eq!(update.promoted, vec![(candidate, candidate.as_reference())]);
        assert_eq!(refs, vec![other, candidate.as_reference()]);
        assert!(!store.exists(old_slot));
        assert!(store.exists(candidate.as_reference()));
        assert!(store.exists(candidate));
    }

    #[test]
    fn test_new_lineage_must_separate_from_the_weakest() {
        let store = MemAgentStore::new();
        let candidate = id("dmk02a00_01");
        store.create(candidate).unwrap();
        let strong = id("dmk01a00_00").as_reference();
        let weak = id("dmk01a01_00").as_reference();
        store.create(strong).unwrap();
        store.create(weak).unwrap();

        let outcome = outcome(&[
            ("dmk01a00_00", 50.0, 2.0),
            ("dmk01a01_00", 10.0, 4.0),
            ("dmk02a00_01", 40.0, 1.0),
        ]);
        let mut refs = vec![strong, weak];
        let ranked = rank_refs(&refs, &outcome).unwrap();
        let update = rebalance(
            &store,
            &mut refs,
            &ranked,
            &improved_analysis(&[(candidate, 15.0)]),
            &outcome,
            &config(2),
        )
        .unwrap();

        assert_eq!(update.evicted, vec![weak]);
        assert_eq!(update.promoted, vec![(candidate, candidate.as_reference())]);
        assert!((update.refs_gain - 15.0).abs() < f32::EPSILON);
        // Stdev average describes the pool before the change.
        assert!((update.refs_won_stdev_avg - 3.0).abs() < f32::EPSILON);
        assert_eq!(refs, vec![strong, candidate.as_reference()]);
        assert!(!store.exists(weak));
    }

    #[test]
    fn test_unseparated_candidate_changes_nothing() {
        let store = MemAgentStore::new();
        let candidate = id("dmk02a00_01");
        store.create(candidate).unwrap();
        let strong = id("dmk01a00_00").as_reference();
        let weak = id("dmk01a01_00").as_reference();
        store.create(strong).unwrap();
        store.create(weak).unwrap();

        let outcome = outcome(&[
            ("dmk01a00_00", 50.0, 1.0),
            ("dmk01a01_00", 10.0, 1.0),
            ("dmk02a00_01", 11.0, 1.0),
        ]);
        let mut refs = vec![strong, weak];
        let ranked = rank_refs(&refs, &outcome).unwrap();
        let update = rebalance(
            &store,
            &mut refs,
            &ranked,
            &improved_analysis(&[(candidate, 1.0)]),
            &outcome,
            &config(2),
        )
        .unwrap();

        assert!(update.promoted.is_empty());
        assert!(update.evicted.is_empty());
        assert!(update.refs_gain.abs() < f32::EPSILON);
        assert_eq!(refs, vec![strong, weak]);
        assert!(store.exists(weak));
        assert!(!store.exists(candidate.as_reference()));
    }

    #[test]
    fn test_candidates_beyond_pool_size_are_ignored() {
        let store = MemAgentStore::new();
        let best = id("dmk02a00_01");
        let second = id("dmk02a01_01");
        for candidate in [best, second] {
            store.create(candidate).unwrap();
        }
        let reference = id("dmk01a00_00").as_reference();
        store.create(reference).unwrap();

        let outcome = outcome(&[
            ("dmk01a00_00", 10.0, 1.0),
            ("dmk02a00_01", 50.0, 1.0),
            ("dmk02a01_01", 40.0, 1.0),
        ]);
        let mut refs = vec![reference];
        let ranked = rank_refs(&refs, &outcome).unwrap();
        let update = rebalance(
            &store,
            &mut refs,
            &ranked,
            &improved_analysis(&[(best, 20.0), (second, 15.0)]),
            &outcome,
            &config(1),
        )
        .unwrap();

        assert_eq!(update.promoted, vec![(best, best.as_reference())]);
        assert_eq!(refs, vec![best.as_reference()]);
        assert!(!store.exists(second.as_reference()));
    }
}
