//! Per-target statistics.

mod history;

pub use history::*;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::probe::ProbeOutcome;

/// Reachability of a target as of its latest probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum HostStatus {
    #[default]
    Unknown,
    Up,
    Down,
}

impl std::fmt::Display for HostStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Unknown => "Unknown",
            Self::Up => "Up",
            Self::Down => "Down",
        };
        f.write_str(s)
    }
}

/// Counters, extrema and history for one monitored target.
///
/// A worker is the only writer of its `HostStats`; everyone else receives
/// clones. The history is left out of the serialized form; serialize
/// [`HostStats::history`] on its own.
#[derive(Debug, Clone, Serialize)]
pub struct HostStats {
    target: String,
    pub sent: u64,
    pub received: u64,
    pub last_status: HostStatus,
    pub last_latency_ms: Option<f64>,
    pub last_message: String,
    pub last_seen: Option<DateTime<Utc>>,
    pub first_seen: Option<DateTime<Utc>>,
    pub latency_min_ms: Option<f64>,
    pub latency_max_ms: Option<f64>,
    pub latency_sum_ms: f64,
    pub latency_count: u64,
    #[serde(skip)]
    history: History,
}

impl HostStats {
    pub fn new(target: impl Into<String>, history_capacity: usize) -> Self {
        Self {
            target: target.into(),
            sent: 0,
            received: 0,
            last_status: HostStatus::Unknown,
            last_latency_ms: None,
            last_message: String::new(),
            last_seen: None,
            first_seen: None,
            latency_min_ms: None,
            latency_max_ms: None,
            latency_sum_ms: 0.0,
            latency_count: 0,
            history: History::with_capacity(history_capacity),
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    /// Count a probe attempt before it is sent.
    pub fn begin_attempt(&mut self) {
        self.sent += 1;
    }

    /// Fold a finished probe into the statistics.
    pub fn record(&mut self, outcome: &ProbeOutcome, now: DateTime<Utc>) {
        if outcome.success {
            self.received += 1;
            self.last_status = HostStatus::Up;
            self.last_latency_ms = outcome.latency_ms;
            self.last_seen = Some(now);
            if self.first_seen.is_none() {
                self.first_seen = Some(now);
            }
            if let Some(latency) = outcome.latency_ms {
                self.latency_sum_ms += latency;
                self.latency_count += 1;
                self.latency_min_ms = Some(self.latency_min_ms.map_or(latency, |m| m.min(latency)));
                self.latency_max_ms = Some(self.latency_max_ms.map_or(latency, |m| m.max(latency)));
            }
            self.history.push(now, outcome.latency_ms);
        } else {
            self.last_status = HostStatus::Down;
            self.last_latency_ms = None;
            self.history.push(now, None);
        }
        // record() without begin_attempt() must not break received <= sent
        self.sent = self.sent.max(self.received);
        self.last_message = outcome.message.clone();
    }

    pub fn loss_percent(&self) -> f64 {
        if self.sent == 0 {
            return 0.0;
        }
        (self.sent - self.received) as f64 / self.sent as f64 * 100.0
    }

    pub fn uptime_percent(&self) -> f64 {
        if self.sent == 0 {
            return 0.0;
        }
        self.received as f64 / self.sent as f64 * 100.0
    }

    pub fn avg_latency_ms(&self) -> Option<f64> {
        if self.latency_count == 0 {
            return None;
        }
        Some(self.latency_sum_ms / self.latency_count as f64)
    }
}
