//! `randomizer list`: read-only views over the run store and the catalog.

use anyhow::Result;

use crate::core::record::RunRecord;
use crate::core::types::{Tactic, Technique};
use crate::io::catalog::Catalog;
use crate::io::run_store::RunStore;
use crate::io::tool::SimulationTool;

/// Most recent runs first. With a tactic, only runs that were launched with that filter.
pub fn list_runs(store: &RunStore, tactic: Option<Tactic>, limit: usize) -> Result<Vec<RunRecord>> {
    let Some(tactic) = tactic else {
        return store.list(limit);
    };
    let mut runs = store.list(usize::MAX)?;
    runs.retain(|run| run.tactic_filter == Some(tactic));
    runs.truncate(limit);
    Ok(runs)
}

pub fn list_techniques(tool: &dyn SimulationTool, tactic: Option<Tactic>) -> Result<Vec<Technique>> {
    Catalog::new(tool).list(tactic)
}
