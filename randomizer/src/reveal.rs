//! `randomizer reveal`: the full record of a run, technique included.

use anyhow::Result;

use crate::core::record::RunRecord;
use crate::core::types::docs_url;
use crate::error::{RandomizerError, find_domain_error};
use crate::io::run_store::RunStore;

/// How many known run ids to suggest when a requested run does not exist.
pub const NOT_FOUND_SUGGESTIONS: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Revelation {
    pub record: RunRecord,
    pub docs_url: String,
}

/// Load a run regardless of its status.
pub fn reveal_run(store: &RunStore, run_id: &str) -> Result<Revelation> {
    let record = store.get(run_id)?;
    let docs_url = docs_url(&record.technique_id);
    Ok(Revelation { record, docs_url })
}

/// Recent run ids to print alongside a `RunNotFound` error; empty for any other error.
pub fn suggestions_for(store: &RunStore, err: &anyhow::Error) -> Vec<String> {
    match find_domain_error(err) {
        Some(RandomizerError::RunNotFound(_)) => store
            .recent_run_ids(NOT_FOUND_SUGGESTIONS)
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}
