//! Supervisor tunables.

use crate::error::{Error, Result};
use std::time::Duration;

/// Headroom subtracted from the tick interval to get the probe deadline,
/// so a stuck probe cannot starve the following tick.
const PROBE_DEADLINE_MARGIN: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct Settings {
    /// Reconciliation period.
    pub tick_interval: Duration,
    /// Launcher parallelism.
    pub workers: usize,
    /// Upper bound on declared services; also the work queue capacity.
    pub max_services: usize,
    /// Buffer of the internal signal channel (kept >= 2).
    pub signal_buffer: usize,
    /// SIGTERM -> SIGKILL grace period during shutdown.
    pub grace: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            workers: 4,
            max_services: 100,
            signal_buffer: 4,
            grace: Duration::from_secs(5),
        }
    }
}

impl Settings {
    /// Deadline applied to each probe command. `tick_interval - 100ms`,
    /// falling back to half the tick for very short intervals.
    pub fn probe_deadline(&self) -> Duration {
        if self.tick_interval > PROBE_DEADLINE_MARGIN * 2 {
            self.tick_interval - PROBE_DEADLINE_MARGIN
        } else {
            self.tick_interval / 2
        }
    }
}

/// Parse duration strings like "500ms", "10s", "1m". A bare number is
/// taken as seconds.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    let parsed = if let Some(ms) = s.strip_suffix("ms") {
        ms.trim().parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.trim().parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.trim()
            .parse::<u64>()
            .ok()
            .map(|m| Duration::from_secs(m * 60))
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    };

    parsed.ok_or_else(|| Error::InvalidDuration(s.to_string()))
}
