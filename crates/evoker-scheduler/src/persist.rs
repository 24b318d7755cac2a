//! Durable loop state enabling resume after interruption.

use std::{
    collections::BTreeMap,
    fmt, fs, io,
    path::{Path, PathBuf},
};

use evoker_agent::{AgentId, Lifemark};
use serde::{Deserialize, Serialize};

/// Error raised when loop state or metrics cannot be read or written.
#[derive(Debug, derive_more::Display, derive_more::Error)]
pub enum PersistError {
    /// The backing file could not be read or written.
    #[display("i/o failure on {}", path.display())]
    Io { path: PathBuf, source: io::Error },
    /// The backing file holds malformed JSON.
    #[display("malformed state file {}", path.display())]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// The sole artifact needed to resume a run: how many generations have
/// completed and every surviving learner's outcome history.
///
/// Agent checkpoints themselves live in the agent store; on resume the
/// population is reconstructed by listing it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopState {
    /// Number of completed generations.
    pub loop_ix: u32,
    /// Outcome history per surviving learner.
    pub lifemarks: BTreeMap<AgentId, Lifemark>,
}

/// Durable storage for [`LoopState`].
pub trait StateStore: fmt::Debug {
    /// Loads the persisted state, or `None` when no run has persisted yet.
    fn read(&self) -> Result<Option<LoopState>, PersistError>;

    /// Durably replaces the persisted state.
    fn write(&self, state: &LoopState) -> Result<(), PersistError>;
}

/// File-backed [`StateStore`] writing JSON through a temp-file rename, so
/// a crash mid-write never leaves a truncated state file behind.
#[derive(Debug, Clone)]
pub struct JsonStateStore {
    path: PathBuf,
}

impl JsonStateStore {
    /// Creates a store persisting to `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the state file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StateStore for JsonStateStore {
    fn read(&self) -> Result<Option<LoopState>, PersistError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(source) if source.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(PersistError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|source| PersistError::Json {
                path: self.path.clone(),
                source,
            })
    }

    fn write(&self, state: &LoopState) -> Result<(), PersistError> {
        let text = serde_json::to_string_pretty(state).map_err(|source| PersistError::Json {
            path: self.path.clone(),
            source,
        })?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, text).map_err(|source| PersistError::Io {
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, &self.path).map_err(|source| PersistError::Io {
            path: self.path.clone(),
            source,
        })
    }
}
