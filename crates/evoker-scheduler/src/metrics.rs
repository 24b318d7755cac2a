//! Per-generation monitoring rows appended as JSON lines.

use std::{
    fs::OpenOptions,
    io::Write as _,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::persist::PersistError;

/// One monitoring row per completed generation.
///
/// Written for humans and plotting tools; the scheduler never reads it
/// back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopMetrics {
    pub loop_ix: u32,
    /// Summed win-rate delta of the learners promoted into the pool.
    pub refs_gain: f32,
    /// Mean interval-sample stdev across the outgoing reference pool.
    pub refs_won_stdev_avg: f32,
    /// Mean hands-per-second across the generation's test groups.
    pub speed: f32,
    pub game_size_tr: u64,
    pub game_size_ts: u64,
    /// Fraction of learner pairs separated this generation.
    pub sep_fraction: f32,
    /// Wall-clock seconds from generation start to state persist.
    pub loop_secs: f64,
}

/// Append-only JSON-lines writer for [`LoopMetrics`].
#[derive(Debug, Clone)]
pub struct MetricsWriter {
    path: PathBuf,
}

impl MetricsWriter {
    /// Creates a writer appending to `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the metrics file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one row as a single JSON line.
    pub fn append(&self, row: &LoopMetrics) -> Result<(), PersistError> {
        let line = serde_json::to_string(row).map_err(|source| PersistError::Json {
            path: self.path.clone(),
            source,
        })?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| PersistError::Io {
                path: self.path.clone(),
                source,
            })?;
        writeln!(file, "{line}").map_err(|source| PersistError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(loop_ix: u32) -> LoopMetrics {
        LoopMetrics {
            loop_ix,
            refs_gain: 12.5,
            refs_won_stdev_avg: 3.0,
            speed: 2_100.0,
            game_size_tr: 100_000,
            game_size_ts: 200_000,
            sep_fraction: 0.6,
            loop_secs: 42.0,
        }
    }

    #[test]
    fn test_append_writes_one_line_per_row() {
        let dir = tempfile::tempdir().unwrap();
        let writer = MetricsWriter::new(dir.path().join("metrics.jsonl"));

        writer.append(&row(1)).unwrap();
        writer.append(&row(2)).unwrap();

        let text = std::fs::read_to_string(writer.path()).unwrap();
        let rows: Vec<LoopMetrics> = text
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(rows, [row(1), row(2)]);
    }
}
