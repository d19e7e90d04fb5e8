//! Technique catalog backed by the simulation tool's listing.

use std::cell::OnceCell;

use anyhow::Result;
use tracing::debug;

use crate::core::types::{Tactic, Technique};
use crate::error::RandomizerError;
use crate::io::tool::SimulationTool;

/// Lists techniques, fetching the tool's listing at most once per process.
pub struct Catalog<'a> {
    tool: &'a dyn SimulationTool,
    cache: OnceCell<Vec<Technique>>,
}

impl<'a> Catalog<'a> {
    pub fn new(tool: &'a dyn SimulationTool) -> Self {
        Self {
            tool,
            cache: OnceCell::new(),
        }
    }

    /// Techniques in listing order, optionally restricted to one tactic.
    pub fn list(&self, tactic: Option<Tactic>) -> Result<Vec<Technique>> {
        let all = self.all()?;
        Ok(all
            .iter()
            .filter(|technique| tactic.is_none_or(|t| technique.tactic == t))
            .cloned()
            .collect())
    }

    fn all(&self) -> Result<&[Technique]> {
        if let Some(cached) = self.cache.get() {
            return Ok(cached);
        }
        let techniques = self
            .tool
            .list_techniques()
            .map_err(|err| RandomizerError::CatalogUnavailable(format!("{err:#}")))?;
        debug!(count = techniques.len(), "catalog loaded");
        Ok(self.cache.get_or_init(|| techniques))
    }
}
