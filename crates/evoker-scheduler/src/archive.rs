//! Long-horizon tournament archive of the strongest references.
//!
//! Every archiving interval the current best reference is snapshotted
//! into a separate store, under its learner-shaped name since the copy no
//! longer belongs to the live pool. Archived snapshots periodically play
//! a tournament among themselves, which both tracks absolute progress
//! across the whole run and decides who gets evicted once the archive is
//! full.

use std::{
    cmp::Ordering,
    collections::BTreeMap,
    fs, io,
    path::PathBuf,
};

use chrono::{DateTime, Utc};
use evoker_agent::{AgentId, AgentStore, Family, FsAgentStore};
use evoker_engine::{RoundMode, RoundSpec, SimulationEngine};
use evoker_stats::separation::rank_descending;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{SchedulerError, config::LoopConfig, persist::PersistError};

const INDEX_FILE: &str = "archive.json";

/// Index entry describing one archived snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotInfo {
    pub family: Family,
    pub age: u32,
    /// Latest tournament result, absent until the snapshot first plays.
    pub won: Option<f32>,
    pub archived_at: DateTime<Utc>,
}

/// Archive of reference snapshots with a persisted ranking index.
#[derive(Debug, Clone)]
pub struct PmtArchive {
    store: FsAgentStore,
    index_path: PathBuf,
}

impl PmtArchive {
    /// Opens the archive rooted at `root`, creating it if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, SchedulerError> {
        let root = root.into();
        let index_path = root.join(INDEX_FILE);
        let store = FsAgentStore::open(root)?;
        Ok(Self { store, index_path })
    }

    /// The store a tournament engine must read snapshots from.
    #[must_use]
    pub fn store(&self) -> &FsAgentStore {
        &self.store
    }

    /// Reads the snapshot index. A missing file is an empty archive.
    pub fn entries(&self) -> Result<BTreeMap<AgentId, SnapshotInfo>, SchedulerError> {
        match fs::read_to_string(&self.index_path) {
            Ok(text) => Ok(serde_json::from_str(&text).map_err(|source| PersistError::Json {
                path: self.index_path.clone(),
                source,
            })?),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(source) => Err(PersistError::Io {
                path: self.index_path.clone(),
                source,
            }
            .into()),
        }
    }

    fn write_entries(
        &self,
        entries: &BTreeMap<AgentId, SnapshotInfo>,
    ) -> Result<(), SchedulerError> {
        let text =
            serde_json::to_string_pretty(entries).map_err(|source| PersistError::Json {
                path: self.index_path.clone(),
                source,
            })?;
        let tmp = self.index_path.with_extension("json.tmp");
        fs::write(&tmp, text).map_err(|source| PersistError::Io {
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, &self.index_path).map_err(|source| PersistError::Io {
            path: self.index_path.clone(),
            source,
        })?;
        Ok(())
    }

    /// Picks the eviction victim: the worst tournament result, with
    /// never-measured snapshots ranking below every measured one.
    fn worst_ranked(entries: &BTreeMap<AgentId, SnapshotInfo>) -> Option<AgentId> {
        entries
            .iter()
            .min_by(|a, b| match (a.1.won, b.1.won) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Less,
                (Some(_), None) => Ordering::Greater,
                (Some(x), Some(y)) => x.total_cmp(&y),
            })
            .map(|(&id, _)| id)
    }

    /// Copies `reference` from the live store into the archive.
    ///
    /// The snapshot is stored under the reference's learner-shaped name.
    /// Re-archiving a name that is already present is a no-op, since
    /// reference profiles are frozen and cannot have changed. When the
    /// archive is full the worst-ranked snapshot is evicted first.
    pub fn archive_from<S>(
        &self,
        source: &S,
        reference: AgentId,
        capacity: usize,
    ) -> Result<(), SchedulerError>
    where
        S: AgentStore + ?Sized,
    {
        let snapshot = reference.as_learner();
        let mut entries = self.entries()?;
        if entries.contains_key(&snapshot) && self.store.exists(snapshot) {
            debug!(snapshot = %snapshot, "snapshot already archived");
            return Ok(());
        }

        while entries.len() >= capacity {
            let Some(victim) = Self::worst_ranked(&entries) else {
                break;
            };
            entries.remove(&victim);
            self.store.delete(victim)?;
            info!(snapshot = %victim, "evicted archived snapshot");
        }

        let meta = source.load_meta(reference)?;
        let profile = source.load_profile(reference)?;
        if self.store.exists(snapshot) {
            // Torn earlier insert: the agent landed but the index write
            // did not. Replace the orphan.
            self.store.delete(snapshot)?;
        }
        self.store.insert(snapshot, &meta, &profile)?;
        entries.insert(
            snapshot,
            SnapshotInfo {
                family: meta.family,
                age: meta.age,
                won: None,
                archived_at: Utc::now(),
            },
        );
        self.write_entries(&entries)?;
        info!(snapshot = %snapshot, reference = %reference, "archived reference snapshot");
        Ok(())
    }

    /// Runs the archive tournament and refreshes the stored rankings.
    ///
    /// All snapshots play each other, no references, at twice the test
    /// game size; the round may stop only once every pair is separated.
    /// Returns the `(snapshot, won)` ranking best first, or `None` when
    /// the archive holds too few snapshots to be worth a round. The
    /// engine must read agents from [`Self::store`].
    pub fn tournament<E>(
        &self,
        engine: &mut E,
        config: &LoopConfig,
    ) -> Result<Option<Vec<(AgentId, f32)>>, SchedulerError>
    where
        E: SimulationEngine + ?Sized,
    {
        let subjects = self.store.list()?;
        if subjects.len() <= 2 {
            debug!(
                count = subjects.len(),
                "skipping tournament, too few snapshots"
            );
            return Ok(None);
        }

        info!(count = subjects.len(), "tournament starts");
        let spec = RoundSpec {
            mode: RoundMode::Test,
            subjects,
            refs: Vec::new(),
            game_size: config.game_size_ts * 2,
            players_per_agent: config.dmk_n_players_ts,
            sep_pairs: Vec::new(),
            sep_break_factor: Some(1.0),
            n_stdev: config.sep_n_stdev,
        };
        let report = engine.run_round(&spec)?;

        let scored: Vec<(AgentId, f32)> = report
            .records
            .iter()
            .map(|(&id, record)| (id, record.final_won()))
            .collect();
        let ranked = rank_descending(scored);
        for (pos, &(id, won)) in ranked.iter().enumerate() {
            let record = &report.records[&id];
            info!(
                pos,
                snapshot = %id,
                family = %record.family,
                age = record.age,
                won,
                "tournament result"
            );
        }

        let mut entries = self.entries()?;
        for &(id, won) in &ranked {
            if let Some(entry) = entries.get_mut(&id) {
                entry.won = Some(won);
            }
        }
        self.write_entries(&entries)?;
        Ok(Some(ranked))
    }
}

#[cfg(test)]
mod tests {
    use evoker_agent::{PROFILE_LEN, Profile};
    use evoker_engine::{SyntheticEngine, SyntheticEngineConfig};

    use super::*;

    fn id(name: &str) -> AgentId {
        name.parse().unwrap()
    }

    fn setup() -> (tempfile::TempDir, FsAgentStore, PmtArchive) {
        let dir = tempfile::tempdir().unwrap();
        let store = FsAgentStore::open(dir.path().join("agents")).unwrap();
        let archive = PmtArchive::open(dir.path().join("pmt")).unwrap();
        (dir, store, archive)
    }

    /// Creates a live reference with a chosen strength.
    fn add_reference(store: &FsAgentStore, name: &str, strength: f32) -> AgentId {
        let reference = id(name).as_reference();
        store.create(reference).unwrap();
        store
            .save_profile(reference, &Profile::from_weights(vec![strength; PROFILE_LEN]))
            .unwrap();
        reference
    }

    fn tournament_engine(archive: &PmtArchive) -> SyntheticEngine<FsAgentStore> {
        SyntheticEngine::with_options(
            archive.store().clone(),
            *b"evoker-archive-t",
            SyntheticEngineConfig {
                interval_hands: 200,
                ..SyntheticEngineConfig::default()
            },
        )
    }

    #[test]
    fn test_snapshot_lands_under_learner_shaped_name() {
        let (_dir, store, archive) = setup();
        let reference = add_reference(&store, "dmk03a01_02", 0.6);

        archive.archive_from(&store, reference, 20).unwrap();

        let snapshot = reference.as_learner();
        assert!(archive.store().exists(snapshot));
        assert!(store.exists(reference));
        let entries = archive.entries().unwrap();
        let info = &entries[&snapshot];
        assert_eq!(info.age, 2);
        assert_eq!(info.won, None);
    }

    #[test]
    fn test_rearchiving_the_same_reference_is_a_noop() {
        let (_dir, store, archive) = setup();
        let reference = add_reference(&store, "dmk03a01_02", 0.6);

        archive.archive_from(&store, reference, 20).unwrap();
        archive.archive_from(&store, reference, 20).unwrap();

        assert_eq!(archive.entries().unwrap().len(), 1);
        assert_eq!(archive.store().list().unwrap().len(), 1);
    }

    #[test]
    fn test_full_archive_evicts_the_worst_ranked() {
        let (_dir, store, archive) = setup();
        for (name, strength) in [("dmk01a00_00", 0.5), ("dmk01a01_00", 0.5), ("dmk02a00_00", 0.5)]
        {
            let reference = add_reference(&store, name, strength);
            archive.archive_from(&store, reference, 3).unwrap();
        }
        let mut entries = archive.entries().unwrap();
        entries.get_mut(&id("dmk01a00_00")).unwrap().won = Some(5.0);
        entries.get_mut(&id("dmk01a01_00")).unwrap().won = Some(1.0);
        entries.get_mut(&id("dmk02a00_00")).unwrap().won = Some(-3.0);
        archive.write_entries(&entries).unwrap();

        let newcomer = add_reference(&store, "dmk04a00_00", 0.5);
        archive.archive_from(&store, newcomer, 3).unwrap();

        let entries = archive.entries().unwrap();
        assert_eq!(entries.len(), 3);
        assert!(!entries.contains_key(&id("dmk02a00_00")));
        assert!(!archive.store().exists(id("dmk02a00_00")));
        assert!(entries.contains_key(&id("dmk04a00_00")));
    }

    #[test]
    fn test_unmeasured_snapshot_is_evicted_before_measured_ones() {
        let (_dir, store, archive) = setup();
        for name in ["dmk01a00_00", "dmk01a01_00"] {
            let reference = add_reference(&store, name, 0.5);
            archive.archive_from(&store, reference, 2).unwrap();
        }
        let mut entries = archive.entries().unwrap();
        entries.get_mut(&id("dmk01a00_00")).unwrap().won = Some(-10.0);
        archive.write_entries(&entries).unwrap();

        let newcomer = add_reference(&store, "dmk02a00_00", 0.5);
        archive.archive_from(&store, newcomer, 2).unwrap();

        let entries = archive.entries().unwrap();
        assert!(entries.contains_key(&id("dmk01a00_00")));
        assert!(!entries.contains_key(&id("dmk01a01_00")));
    }

    #[test]
    fn test_tiny_archive_skips_the_tournament() {
        let (_dir, store, archive) = setup();
        for name in ["dmk01a00_00", "dmk01a01_00"] {
            let reference = add_reference(&store, name, 0.5);
            archive.archive_from(&store, reference, 20).unwrap();
        }

        let mut engine = tournament_engine(&archive);
        let ranked = archive
            .tournament(&mut engine, &LoopConfig::default())
            .unwrap();
        assert!(ranked.is_none());
    }

    #[test]
    fn test_tournament_ranks_snapshots_and_records_results() {
        let (_dir, store, archive) = setup();
        for (name, strength) in [
            ("dmk01a00_00", 0.9),
            ("dmk01a01_00", 0.5),
            ("dmk02a00_00", 0.1),
        ] {
            let reference = add_reference(&store, name, strength);
            archive.archive_from(&store, reference, 20).unwrap();
        }

        let config = LoopConfig {
            game_size_ts: 2_000,
            ..LoopConfig::default()
        };
        let mut engine = tournament_engine(&archive);
        let ranked = archive.tournament(&mut engine, &config).unwrap().unwrap();

        assert_eq!(ranked.len(), 3);
        assert_eq!(ranked[0].0, id("dmk01a00_00"));
        assert_eq!(ranked[2].0, id("dmk02a00_00"));
        let entries = archive.entries().unwrap();
        for (id, won) in &ranked {
            assert_eq!(entries[id].won, Some(*won));
        }
    }
}
