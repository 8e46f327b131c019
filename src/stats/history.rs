//! Bounded latency history.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Number of history points kept per target.
pub const DEFAULT_HISTORY_CAPACITY: usize = 3000;

/// One probe outcome in the history. `latency_ms` is `None` for a lost probe.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HistorySample {
    pub time: DateTime<Utc>,
    pub latency_ms: Option<f64>,
}

/// Fixed-capacity ring buffer of samples, oldest first.
///
/// Timestamps never go backwards: a sample older than the newest entry is
/// stamped with the newest entry's time.
#[derive(Debug, Clone, Serialize)]
pub struct History {
    samples: VecDeque<HistorySample>,
    #[serde(skip)]
    capacity: usize,
}

impl History {
    /// A capacity of zero is treated as one.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity.min(DEFAULT_HISTORY_CAPACITY)),
            capacity,
        }
    }

    pub fn push(&mut self, time: DateTime<Utc>, latency_ms: Option<f64>) {
        let time = match self.samples.back() {
            Some(last) if last.time > time => last.time,
            _ => time,
        };

        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(HistorySample { time, latency_ms });
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Samples oldest first.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &HistorySample> + ExactSizeIterator {
        self.samples.iter()
    }

    pub fn latest(&self) -> Option<&HistorySample> {
        self.samples.back()
    }
}

impl Default for History {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_HISTORY_CAPACITY)
    }
}
