//! Diagnostics on stderr, filtered by `RUST_LOG`.
//!
//! Stdout carries command output only. What happened in a run is kept in its
//! run record and in the per-step tool logs under `logs/<run-id>/`, neither of
//! which depends on the log level chosen here.

use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber.
///
/// Without `RUST_LOG` only warnings and errors are shown, which still covers
/// stale lock reclaims and unreadable history. For everything:
///
/// ```bash
/// RUST_LOG=randomizer=debug randomizer status
/// ```
pub fn init() {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .from_env_lossy();
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}
