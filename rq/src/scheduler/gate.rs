//! Admission gate: spaces execution starts by a fixed minimum interval

use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

/// Result of an admission check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Enough time has passed since the last start
    Admit,

    /// Not yet; this much of the interval remains
    Wait(Duration),
}

/// Tracks the last execution start and decides when the next may begin
#[derive(Debug)]
pub struct RateGate {
    min_interval: Duration,
    last_start: Option<Instant>,
}

impl RateGate {
    pub fn new(min_interval: Duration) -> Self {
        debug!(?min_interval, "RateGate::new: called");
        Self {
            min_interval,
            last_start: None,
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    pub fn last_start(&self) -> Option<Instant> {
        self.last_start
    }

    /// Check whether an execution may start at `now`
    ///
    /// A gate that has never recorded a start always admits.
    pub fn check(&self, now: Instant) -> Admission {
        let Some(last) = self.last_start else {
            return Admission::Admit;
        };

        let elapsed = now.saturating_duration_since(last);
        if elapsed >= self.min_interval {
            Admission::Admit
        } else {
            Admission::Wait(self.min_interval - elapsed)
        }
    }

    /// Record that an execution started at `now`
    pub fn record_start(&mut self, now: Instant) {
        self.last_start = Some(now);
    }
}
