//! Stable exit codes for randomizer CLI commands.
//!
//! Automation callers branch on these, so values must never be reused.
//! `2` is left to clap for usage errors.

/// Command succeeded.
pub const OK: i32 = 0;
/// Invalid input, config or state layout, or any error without a dedicated code.
pub const INVALID: i32 = 1;
/// Another process holds the run lock.
pub const LOCK_HELD: i32 = 3;
/// The requested run id has no readable record.
pub const RUN_NOT_FOUND: i32 = 4;
/// The tactic filter matched no technique in the catalog.
pub const NO_ELIGIBLE_TECHNIQUE: i32 = 5;
/// The active cloud credentials belong to a different account.
pub const ACCOUNT_MISMATCH: i32 = 6;
/// The simulation tool failed (catalog listing, warmup, detonate, revert or cleanup).
pub const TOOL_FAILURE: i32 = 7;
/// The operator interrupted the run; progress was recorded as failed.
pub const INTERRUPTED: i32 = 130;
