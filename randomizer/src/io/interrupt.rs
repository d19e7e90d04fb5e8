//! Operator interrupt handling.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::warn;

/// Upper bound on how long an interruptible wait sleeps between flag checks.
const POLL_SLICE: Duration = Duration::from_millis(250);

/// Shared cancellation flag set by the Ctrl-C handler.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route Ctrl-C into a new token instead of terminating the process.
    pub fn install_ctrlc() -> Result<Self> {
        let token = Self::new();
        let flag = token.clone();
        ctrlc::set_handler(move || {
            warn!("interrupt received, stopping after the current step");
            flag.cancel();
        })
        .context("install interrupt handler")?;
        Ok(token)
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Sleep for `duration` unless cancelled first. Returns false if cancelled.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep(POLL_SLICE.min(deadline - now));
        }
    }
}
