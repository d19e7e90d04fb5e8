//! Deterministic, pure logic shared by the randomizer.
//!
//! Core modules must be free of I/O side effects. Randomness and clocks are
//! passed in so every function here is reproducible in tests.

pub mod ids;
pub mod record;
pub mod selector;
pub mod staleness;
pub mod types;
