//! Randomized, blind attack-simulation orchestrator.
//!
//! Picks a simulation technique at random, drives the external simulation
//! tool through warmup, detonation and cleanup, and keeps a durable record of
//! every run so the choice can be revealed after the blue team has
//! investigated. The architecture keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (run ids, selection, transition
//!   rules, staleness). No I/O; randomness and clocks are passed in.
//! - **[`io`]**: Side-effecting operations (state directory, lock, child
//!   processes). Collaborators sit behind traits so tests can script them.
//!
//! Orchestration modules ([`run`], [`cleanup`], [`reveal`], [`listing`],
//! [`status`]) combine the two to implement CLI commands.

pub mod cleanup;
pub mod core;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod listing;
pub mod logging;
pub mod render;
pub mod reveal;
pub mod run;
pub mod status;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
