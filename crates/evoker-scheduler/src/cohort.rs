//! Learner cohort top-up and first-generation reference bootstrap.
//!
//! Families with no living learner are served first so every configured
//! family stays alive. Remaining slots sample a parent from the reference
//! pool: the slot is filled fresh with probability `prob_fresh_dmk`,
//! otherwise by crossover with a second same-family reference. An empty
//! reference pool degrades to fresh creation from uniformly drawn
//! families rather than failing.

use evoker_agent::{AgentId, AgentStore, Family};
use rand::{Rng, seq::IndexedRandom};
use tracing::info;

use crate::{SchedulerError, config::LoopConfig};

/// The two disjoint agent sets a generation works on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Population {
    /// Actively trained agents.
    pub learners: Vec<AgentId>,
    /// Frozen benchmark agents.
    pub refs: Vec<AgentId>,
}

impl Population {
    /// Splits a stored id listing into learners and references.
    #[must_use]
    pub fn from_ids(ids: impl IntoIterator<Item = AgentId>) -> Self {
        let mut population = Self::default();
        for id in ids {
            if id.is_reference() {
                population.refs.push(id);
            } else {
                population.learners.push(id);
            }
        }
        population
    }
}

/// Tops the learner cohort up to its configured size.
///
/// Returns the next free creation index for this generation, so the
/// first-generation reference bootstrap can continue the numbering.
pub fn fill_learners<S, R>(
    store: &S,
    population: &mut Population,
    config: &LoopConfig,
    loop_ix: u32,
    rng: &mut R,
) -> Result<u32, SchedulerError>
where
    S: AgentStore + ?Sized,
    R: Rng + ?Sized,
{
    let mut cix = 0;
    if population.learners.len() >= config.ndmk_learners {
        return Ok(cix);
    }
    let missing = config.ndmk_learners - population.learners.len();
    info!(missing, "topping up learner cohort");

    let mut forced: Vec<Family> = config
        .families
        .iter()
        .copied()
        .filter(|family| !population.learners.iter().any(|id| id.family() == *family))
        .collect();

    while population.learners.len() < config.ndmk_learners {
        let id = match forced.pop() {
            Some(family) => {
                let id = AgentId::fresh(loop_ix, family, cix);
                store.create(id)?;
                info!(agent = %id, family = %family, "created fresh learner for unrepresented family");
                id
            }
            None => match population.refs.choose(rng).copied() {
                None => {
                    let family = config.families[rng.random_range(0..config.families.len())];
                    let id = AgentId::fresh(loop_ix, family, cix);
                    store.create(id)?;
                    info!(agent = %id, family = %family, "created fresh learner (empty reference pool)");
                    id
                }
                Some(main) => {
                    let family = main.family();
                    let id = AgentId::fresh(loop_ix, family, cix);
                    let partners: Vec<AgentId> = population
                        .refs
                        .iter()
                        .copied()
                        .filter(|reference| reference.family() == family && *reference != main)
                        .collect();
                    if partners.is_empty() || rng.random_bool(config.prob_fresh_dmk) {
                        store.create(id)?;
                        info!(agent = %id, family = %family, "created fresh learner");
                    } else {
                        let secondary = partners[rng.random_range(0..partners.len())];
                        let fresh_profile = rng.random_bool(config.prob_fresh_ckpt);
                        store.crossover(main, secondary, id, fresh_profile)?;
                        info!(
                            child = %id,
                            main = %main,
                            secondary = %secondary,
                            fresh_profile,
                            "created crossover learner"
                        );
                    }
                    id
                }
            },
        };
        population.learners.push(id);
        cix += 1;
    }
    Ok(cix)
}

/// Builds the first-generation reference pool.
///
/// A prefix of the learner cohort is cloned under reference names; if the
/// pool is still short, fresh reference agents are created directly,
/// continuing the creation numbering at `cix`.
pub fn bootstrap_refs<S, R>(
    store: &S,
    population: &mut Population,
    config: &LoopConfig,
    loop_ix: u32,
    mut cix: u32,
    rng: &mut R,
) -> Result<(), SchedulerError>
where
    S: AgentStore + ?Sized,
    R: Rng + ?Sized,
{
    let seeds: Vec<AgentId> = population
        .learners
        .iter()
        .take(config.ndmk_refs)
        .copied()
        .collect();
    for seed in seeds {
        let reference = seed.as_reference();
        store.clone_agent(seed, reference)?;
        info!(reference = %reference, source = %seed, "seeded reference from learner");
        population.refs.push(reference);
    }
    while population.refs.len() < config.ndmk_refs {
        let family = config.families[rng.random_range(0..config.families.len())];
        let reference = AgentId::fresh(loop_ix, family, cix).as_reference();
        store.create(reference)?;
        info!(reference = %reference, family = %family, "created fresh reference");
        population.refs.push(reference);
        cix += 1;
    }
    info!(count = population.refs.len(), "reference pool bootstrapped");
    Ok(())
}
