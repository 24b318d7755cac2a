//! Agent checkpoint storage.
//!
//! [`AgentStore`] is the capability the scheduler holds on the concrete
//! training stack: creating, copying, crossing over, and deleting stored
//! agents. [`FsAgentStore`] is the filesystem adapter used in production,
//! [`MemAgentStore`] keeps everything in memory for tests.

use std::{
    collections::BTreeMap,
    fmt, fs, io,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard, PoisonError},
};

use chrono::Utc;
use serde::{Serialize, de::DeserializeOwned};

use crate::{
    id::AgentId,
    meta::{AgentMeta, Lineage},
    profile::Profile,
};

const META_FILE: &str = "meta.json";
const PROFILE_FILE: &str = "profile.json";

/// Error produced by agent storage operations.
#[derive(Debug, derive_more::Display, derive_more::Error)]
pub enum StoreError {
    /// Checkpoint or metadata is absent for a name that should exist.
    #[display("no stored agent named {id}")]
    Missing { id: AgentId },
    #[display("agent {id} already exists")]
    AlreadyExists { id: AgentId },
    #[display("i/o failure on {}", path.display())]
    Io { path: PathBuf, source: io::Error },
    #[display("malformed json in {}", path.display())]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Storage capability over agent checkpoints and metadata.
///
/// The primitive operations are `insert`, `delete`, the loaders, and
/// `list`; creation, copying, and crossover are provided on top of them,
/// so an implementation only decides where bytes live.
pub trait AgentStore: fmt::Debug + Send + Sync {
    /// Stores a new agent under `id`. Fails if the name is taken.
    fn insert(&self, id: AgentId, meta: &AgentMeta, profile: &Profile) -> Result<(), StoreError>;

    /// Removes the agent's stored state. Deleting an absent agent is a
    /// no-op, so retries and cleanup passes stay safe.
    fn delete(&self, id: AgentId) -> Result<(), StoreError>;

    fn exists(&self, id: AgentId) -> bool;

    fn load_meta(&self, id: AgentId) -> Result<AgentMeta, StoreError>;

    fn load_profile(&self, id: AgentId) -> Result<Profile, StoreError>;

    /// Overwrites the agent's profile, e.g. after a training round.
    fn save_profile(&self, id: AgentId, profile: &Profile) -> Result<(), StoreError>;

    /// Lists all stored agents in name order.
    fn list(&self) -> Result<Vec<AgentId>, StoreError>;

    /// Creates a fresh agent with a randomly initialized profile.
    fn create(&self, id: AgentId) -> Result<AgentMeta, StoreError> {
        let meta = AgentMeta {
            family: id.family(),
            age: id.age(),
            trainable: !id.is_reference(),
            lineage: Lineage::Fresh,
            created_at: Utc::now(),
        };
        self.insert(id, &meta, &Profile::random(&mut rand::rng()))?;
        Ok(meta)
    }

    /// Copies an existing agent under a new name.
    ///
    /// The copy keeps the source's lineage and profile. Reference copies
    /// are frozen, and a frozen source stays frozen in the copy.
    fn clone_agent(&self, src: AgentId, dst: AgentId) -> Result<AgentMeta, StoreError> {
        let src_meta = self.load_meta(src)?;
        let profile = self.load_profile(src)?;
        let meta = AgentMeta {
            family: dst.family(),
            age: dst.age(),
            trainable: src_meta.trainable && !dst.is_reference(),
            lineage: src_meta.lineage,
            created_at: Utc::now(),
        };
        self.insert(dst, &meta, &profile)?;
        Ok(meta)
    }

    /// Creates a crossover child of two parents.
    ///
    /// With `fresh_profile` the child's profile is freshly initialized,
    /// otherwise it is blended from both parents' profiles. Both parents
    /// must exist either way.
    fn crossover(
        &self,
        main: AgentId,
        secondary: AgentId,
        child: AgentId,
        fresh_profile: bool,
    ) -> Result<AgentMeta, StoreError> {
        let rng = &mut rand::rng();
        let profile = if fresh_profile {
            self.load_meta(main)?;
            self.load_meta(secondary)?;
            Profile::random(rng)
        } else {
            Profile::blend(&self.load_profile(main)?, &self.load_profile(secondary)?, rng)
        };
        let meta = AgentMeta {
            family: child.family(),
            age: child.age(),
            trainable: !child.is_reference(),
            lineage: Lineage::Crossover { main, secondary },
            created_at: Utc::now(),
        };
        self.insert(child, &meta, &profile)?;
        Ok(meta)
    }
}

fn read_json<T>(path: &Path) -> Result<T, StoreError>
where
    T: DeserializeOwned,
{
    let text = fs::read_to_string(path).map_err(|source| StoreError::Io {
        path: path.to_owned(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| StoreError::Json {
        path: path.to_owned(),
        source,
    })
}

fn write_json<T>(path: &Path, value: &T) -> Result<(), StoreError>
where
    T: Serialize,
{
    let text = serde_json::to_string_pretty(value).map_err(|source| StoreError::Json {
        path: path.to_owned(),
        source,
    })?;
    fs::write(path, text).map_err(|source| StoreError::Io {
        path: path.to_owned(),
        source,
    })
}

/// Filesystem-backed agent store.
///
/// Each agent occupies one directory named after its id, holding
/// `meta.json` and `profile.json`. Directory names are authoritative, so
/// the live population can be reconstructed from a bare listing on resume.
#[derive(Debug, Clone)]
pub struct FsAgentStore {
    root: PathBuf,
}

impl FsAgentStore {
    /// Opens the store rooted at `root`, creating the directory if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|source| StoreError::Io {
            path: root.clone(),
            source,
        })?;
        Ok(Self { root })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn agent_dir(&self, id: AgentId) -> PathBuf {
        self.root.join(id.to_string())
    }

    fn meta_path(&self, id: AgentId) -> PathBuf {
        self.agent_dir(id).join(META_FILE)
    }

    fn profile_path(&self, id: AgentId) -> PathBuf {
        self.agent_dir(id).join(PROFILE_FILE)
    }
}

impl AgentStore for FsAgentStore {
    fn insert(&self, id: AgentId, meta: &AgentMeta, profile: &Profile) -> Result<(), StoreError> {
        let dir = self.agent_dir(id);
        if dir.exists() {
            return Err(StoreError::AlreadyExists { id });
        }
        fs::create_dir_all(&dir).map_err(|source| StoreError::Io { path: dir, source })?;
        write_json(&self.meta_path(id), meta)?;
        write_json(&self.profile_path(id), profile)
    }

    fn delete(&self, id: AgentId) -> Result<(), StoreError> {
        let dir = self.agent_dir(id);
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Io { path: dir, source }),
        }
    }

    fn exists(&self, id: AgentId) -> bool {
        self.meta_path(id).is_file()
    }

    fn load_meta(&self, id: AgentId) -> Result<AgentMeta, StoreError> {
        if !self.exists(id) {
            return Err(StoreError::Missing { id });
        }
        read_json(&self.meta_path(id))
    }

    fn load_profile(&self, id: AgentId) -> Result<Profile, StoreError> {
        let path = self.profile_path(id);
        if !path.is_file() {
            return Err(StoreError::Missing { id });
        }
        read_json(&path)
    }

    fn save_profile(&self, id: AgentId, profile: &Profile) -> Result<(), StoreError> {
        if !self.exists(id) {
            return Err(StoreError::Missing { id });
        }
        write_json(&self.profile_path(id), profile)
    }

    fn list(&self) -> Result<Vec<AgentId>, StoreError> {
        let entries = fs::read_dir(&self.root).map_err(|source| StoreError::Io {
            path: self.root.clone(),
            source,
        })?;
        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| StoreError::Io {
                path: self.root.clone(),
                source,
            })?;
            if !entry.path().is_dir() {
                continue;
            }
            // Foreign directories are not ours to manage.
            match entry.file_name().to_string_lossy().parse() {
                Ok(id) => ids.push(id),
                Err(err) => {
                    tracing::debug!(name = %entry.file_name().to_string_lossy(), %err, "skipping non-agent directory");
                }
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }
}

/// In-memory agent store for tests and dry runs. Thread-safe.
#[derive(Debug, Default)]
pub struct MemAgentStore {
    agents: Mutex<BTreeMap<AgentId, (AgentMeta, Profile)>>,
}

impl MemAgentStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A poisoned lock only means another thread panicked mid-operation;
    /// the map itself stays consistent, so take it anyway.
    fn agents(&self) -> MutexGuard<'_, BTreeMap<AgentId, (AgentMeta, Profile)>> {
        self.agents.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl AgentStore for MemAgentStore {
    fn insert(&self, id: AgentId, meta: &AgentMeta, profile: &Profile) -> Result<(), StoreError> {
        let mut agents = self.agents();
        if agents.contains_key(&id) {
            return Err(StoreError::AlreadyExists { id });
        }
        agents.insert(id, (meta.clone(), profile.clone()));
        Ok(())
    }

    fn delete(&self, id: AgentId) -> Result<(), StoreError> {
        self.agents().remove(&id);
        Ok(())
    }

    fn exists(&self, id: AgentId) -> bool {
        self.agents().contains_key(&id)
    }

    fn load_meta(&self, id: AgentId) -> Result<AgentMeta, StoreError> {
        self.agents()
            .get(&id)
            .map(|(meta, _)| meta.clone())
            .ok_or(StoreError::Missing { id })
    }

    fn load_profile(&self, id: AgentId) -> Result<Profile, StoreError> {
        self.agents()
            .get(&id)
            .map(|(_, profile)| profile.clone())
            .ok_or(StoreError::Missing { id })
    }

    fn save_profile(&self, id: AgentId, profile: &Profile) -> Result<(), StoreError> {
        let mut agents = self.agents();
        let (_, stored) = agents.get_mut(&id).ok_or(StoreError::Missing { id })?;
        *stored = profile.clone();
        Ok(())
    }

    fn list(&self) -> Result<Vec<AgentId>, StoreError> {
        Ok(self.agents().keys().copied().collect())
    }
}
