//! Turns cumulative byte counters into "since last sample" deltas.
//!
//! Disk and network collectors (local and remote) all go through this so the
//! first-sample and counter-reset rules are the same everywhere.

use tracing::warn;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateTracker {
    last: Option<u64>,
}

impl RateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `cur` and return how much the counter grew since the previous
    /// observation. The first observation and any decrease both return 0 and
    /// become the new baseline.
    pub fn observe(&mut self, cur: u64) -> u64 {
        let delta = match self.last {
            None => 0,
            Some(prev) if cur >= prev => cur - prev,
            Some(prev) => {
                warn!("counter went backwards ({prev} -> {cur}); resetting baseline");
                0
            }
        };
        self.last = Some(cur);
        delta
    }

    /// Last recorded cumulative value, if any.
    pub fn last(&self) -> Option<u64> {
        self.last
    }
}
