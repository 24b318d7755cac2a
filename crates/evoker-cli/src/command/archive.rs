use std::{cmp::Ordering, path::PathBuf};

use chrono::{DateTime, Utc};
use evoker_agent::{AgentId, Family};
use evoker_scheduler::PmtArchive;
use serde::Serialize;

use crate::util;

#[derive(Debug, Clone, clap::Args)]
pub(crate) struct ArchiveArg {
    /// Run directory holding the tournament archive
    #[arg(long, default_value = "evoker-run")]
    dir: PathBuf,
    /// Output file path
    #[arg(long)]
    output: Option<PathBuf>,
}

/// One archived snapshot, flattened for display.
#[derive(Debug, Serialize)]
struct SnapshotRow {
    name: AgentId,
    family: Family,
    age: u32,
    /// Latest tournament win rate; absent until the snapshot first plays.
    won: Option<f32>,
    archived_at: DateTime<Utc>,
}

pub(crate) fn run(arg: &ArchiveArg) -> anyhow::Result<()> {
    let archive = PmtArchive::open(arg.dir.join("pmt"))?;
    let mut rows: Vec<SnapshotRow> = archive
        .entries()?
        .into_iter()
        .map(|(name, info)| SnapshotRow {
            name,
            family: info.family,
            age: info.age,
            won: info.won,
            archived_at: info.archived_at,
        })
        .collect();
    // Best first; unmeasured snapshots trail the measured ones.
    rows.sort_by(|a, b| match (a.won, b.won) {
        (Some(x), Some(y)) => y.total_cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.name.cmp(&b.name),
    });

    eprintln!("{} archived snapshots", rows.len());
    util::save_json(&rows, arg.output.clone())
}
