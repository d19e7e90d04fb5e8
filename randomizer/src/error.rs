//! Domain failures that map to distinct exit codes.
//!
//! Orchestration code returns `anyhow::Result` and attaches context freely;
//! the CLI walks the error chain for a [`RandomizerError`] to pick the exit
//! code. Anything without one exits with [`exit_codes::INVALID`].

use crate::core::types::{Tactic, ToolStep};
use crate::exit_codes;

#[derive(Debug, thiserror::Error)]
pub enum RandomizerError {
    #[error("running in account {actual}, expected {expected}")]
    AccountMismatch { expected: String, actual: String },

    #[error("another run is in progress (pid {pid}, run {run_id}, since {acquired_at})")]
    LockHeld {
        pid: u32,
        run_id: String,
        acquired_at: String,
    },

    #[error("{}", no_match_message(.tactic))]
    NoEligibleTechnique { tactic: Option<Tactic> },

    #[error("technique catalog unavailable: {0}")]
    CatalogUnavailable(String),

    #[error("{step} failed for run {run_id}: {message}")]
    ToolFailure {
        run_id: String,
        step: ToolStep,
        message: String,
    },

    #[error("cleanup incomplete for run {run_id}: {summary}")]
    CleanupIncomplete { run_id: String, summary: String },

    #[error("run {0} not found")]
    RunNotFound(String),

    #[error("run record {run_id} is unreadable: {reason}")]
    CorruptRecord { run_id: String, reason: String },

    #[error("run {run_id} cannot move from {from} to {to}")]
    InvalidTransition {
        run_id: String,
        from: String,
        to: String,
    },

    #[error("interrupted by operator{}", .run_id.as_deref().map(|id| format!(" (run {id} marked failed)")).unwrap_or_default())]
    Interrupted { run_id: Option<String> },

    #[error("{0}")]
    InvalidInput(String),
}

impl RandomizerError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::AccountMismatch { .. } => exit_codes::ACCOUNT_MISMATCH,
            Self::LockHeld { .. } => exit_codes::LOCK_HELD,
            Self::NoEligibleTechnique { .. } => exit_codes::NO_ELIGIBLE_TECHNIQUE,
            Self::CatalogUnavailable(_)
            | Self::ToolFailure { .. }
            | Self::CleanupIncomplete { .. } => exit_codes::TOOL_FAILURE,
            Self::RunNotFound(_) | Self::CorruptRecord { .. } => exit_codes::RUN_NOT_FOUND,
            Self::Interrupted { .. } => exit_codes::INTERRUPTED,
            Self::InvalidTransition { .. } | Self::InvalidInput(_) => exit_codes::INVALID,
        }
    }
}

/// Find the first [`RandomizerError`] in an error chain.
pub fn find_domain_error(err: &anyhow::Error) -> Option<&RandomizerError> {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<RandomizerError>())
}

/// Exit code for any error returned by a command.
pub fn exit_code_for(err: &anyhow::Error) -> i32 {
    find_domain_error(err).map_or(exit_codes::INVALID, RandomizerError::exit_code)
}

fn no_match_message(tactic: &Option<Tactic>) -> String {
    match tactic {
        Some(tactic) => format!("no techniques match tactic {tactic}"),
        None => "the technique catalog is empty".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn exit_code_survives_added_context() {
        let err = Err::<(), _>(RandomizerError::RunNotFound("x".to_string()))
            .context("reveal run")
            .unwrap_err();
        assert_eq!(exit_code_for(&err), exit_codes::RUN_NOT_FOUND);
    }

    #[test]
    fn plain_errors_are_invalid() {
        let err = anyhow::anyhow!("boom");
        assert_eq!(exit_code_for(&err), exit_codes::INVALID);
    }

    #[test]
    fn no_eligible_technique_names_the_filter_or_the_empty_catalog() {
        let filtered = RandomizerError::NoEligibleTechnique {
            tactic: Some(Tactic::Persistence),
        };
        assert_eq!(filtered.to_string(), "no techniques match tactic persistence");
        let unfiltered = RandomizerError::NoEligibleTechnique { tactic: None };
        assert_eq!(unfiltered.to_string(), "the technique catalog is empty");
    }

    #[test]
    fn domain_codes_are_distinct() {
        let codes = [
            RandomizerError::LockHeld {
                pid: 1,
                run_id: "r".to_string(),
                acquired_at: "t".to_string(),
            }
            .exit_code(),
            RandomizerError::RunNotFound("r".to_string()).exit_code(),
            RandomizerError::NoEligibleTechnique { tactic: None }.exit_code(),
            RandomizerError::AccountMismatch {
                expected: "a".to_string(),
                actual: "b".to_string(),
            }
            .exit_code(),
            RandomizerError::CatalogUnavailable("x".to_string()).exit_code(),
        ];
        let mut unique = codes.to_vec();
        unique.sort_unstable();
        unique.dedup();
        assert_eq!(unique.len(), codes.len());
        assert!(!codes.contains(&exit_codes::OK));
    }
}
