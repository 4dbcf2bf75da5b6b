//! Stall detection for codec loops.

use reelcut_core::{ReelError, Result};
use std::time::{Duration, Instant};

/// Fails a loop that has made no progress for `limit`.
///
/// Every dequeue that returns nothing is retried; the watch only trips when
/// the time since the last [`StallWatch::progress`] exceeds the limit.
#[derive(Debug)]
pub struct StallWatch {
    what: &'static str,
    limit: Duration,
    last_progress: Instant,
}

impl StallWatch {
    pub fn new(what: &'static str, limit: Duration) -> Self {
        Self {
            what,
            limit,
            last_progress: Instant::now(),
        }
    }

    /// Record forward progress, resetting the deadline.
    pub fn progress(&mut self) {
        self.last_progress = Instant::now();
    }

    pub fn elapsed(&self) -> Duration {
        self.last_progress.elapsed()
    }

    /// `Err(Timeout)` once the limit has passed without progress.
    pub fn check(&self) -> Result<()> {
        let elapsed = self.elapsed();
        if elapsed > self.limit {
            return Err(ReelError::Timeout(format!(
                "{} made no progress for {} ms",
                self.what,
                elapsed.as_millis()
            )));
        }
        Ok(())
    }
}
