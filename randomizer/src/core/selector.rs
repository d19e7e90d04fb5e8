//! Technique selection logic.
//!
//! Choice-set computation is pure and separate from the random source so a
//! seeded RNG gives deterministic picks in tests.

use std::collections::HashSet;
use std::ops::RangeInclusive;

use rand::Rng;
use rand::seq::SliceRandom;

use crate::core::types::Technique;

/// Narrow `eligible` by recent history.
///
/// Recent techniques are removed only while something remains: if every
/// eligible technique was used recently, the full eligible set is returned.
pub fn choice_set<'a>(
    eligible: &'a [Technique],
    recent: &[String],
    avoid_recent: bool,
) -> Vec<&'a Technique> {
    if !avoid_recent || recent.is_empty() {
        return eligible.iter().collect();
    }
    let recent: HashSet<&str> = recent.iter().map(String::as_str).collect();
    let fresh: Vec<&Technique> = eligible
        .iter()
        .filter(|technique| !recent.contains(technique.id.as_str()))
        .collect();
    if fresh.is_empty() {
        return eligible.iter().collect();
    }
    fresh
}

/// Pick one technique uniformly at random from `eligible` after history narrowing.
///
/// Returns `None` only when `eligible` is empty.
pub fn select_technique<'a, R: Rng + ?Sized>(
    eligible: &'a [Technique],
    recent: &[String],
    avoid_recent: bool,
    rng: &mut R,
) -> Option<&'a Technique> {
    choice_set(eligible, recent, avoid_recent)
        .choose(rng)
        .copied()
}

/// Pick a dwell in whole seconds within `range`.
pub fn pick_dwell_secs<R: Rng + ?Sized>(range: &RangeInclusive<u64>, rng: &mut R) -> u64 {
    if range.start() >= range.end() {
        return *range.start();
    }
    rng.gen_range(range.clone())
}
