//! Stale lock decision.

use std::time::Duration;

/// Returns true if a lock marker may be reclaimed.
///
/// A marker is stale when its owner is gone, or when it has outlived
/// `threshold` (the longest a live run can take).
pub fn is_stale(marker_age: Duration, owner_alive: bool, threshold: Duration) -> bool {
    !owner_alive || marker_age > threshold
}
