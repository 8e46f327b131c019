//! Status transitions and overall health, derived from stats updates.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::monitor::{HostManager, UpdateStream};
use crate::stats::{HostStats, HostStatus};

/// How often the status log drains the update stream.
pub const DRAIN_INTERVAL: Duration = Duration::from_millis(200);

/// A target's status changed between two observed updates.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub target: String,
    pub from: HostStatus,
    pub to: HostStatus,
}

/// Remembers the last status seen per target.
#[derive(Debug, Default)]
pub struct StatusTracker {
    last: HashMap<String, HostStatus>,
}

impl StatusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an update; returns the transition if the status changed.
    pub fn observe(&mut self, stats: &HostStats) -> Option<Transition> {
        let to = stats.last_status;
        if to == HostStatus::Unknown {
            return None;
        }

        let from = self
            .last
            .insert(stats.target().to_string(), to)
            .unwrap_or(HostStatus::Unknown);

        (from != to).then(|| Transition {
            target: stats.target().to_string(),
            from,
            to,
        })
    }

    /// Forget targets that are no longer monitored.
    pub fn retain(&mut self, targets: &[String]) {
        self.last.retain(|t, _| targets.contains(t));
    }
}

/// Overall state of the monitored set.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Health {
    Healthy,
    Alert { down: Vec<String> },
}

/// Alert when any target's latest probe failed.
pub fn health(snapshot: &BTreeMap<String, HostStats>) -> Health {
    let down: Vec<String> = snapshot
        .iter()
        .filter(|(_, s)| s.last_status == HostStatus::Down)
        .map(|(t, _)| t.clone())
        .collect();

    if down.is_empty() {
        Health::Healthy
    } else {
        Health::Alert { down }
    }
}

/// Drain the update stream periodically and log status transitions.
///
/// Runs until the task is aborted.
pub async fn run_status_log(mut updates: UpdateStream, manager: Arc<HostManager>) {
    let mut tracker = StatusTracker::new();
    let mut interval = tokio::time::interval(DRAIN_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut alerting = false;

    loop {
        interval.tick().await;

        let latest = updates.drain_latest();
        if latest.is_empty() {
            continue;
        }

        for stats in latest.values() {
            log_update(&mut tracker, stats);
        }
        tracker.retain(&manager.list_hosts().await);

        match health(&manager.snapshot().await) {
            Health::Alert { down } if !alerting => {
                tracing::warn!("SYSTEM ALERT: {} host(s) down: {}", down.len(), down.join(", "));
                alerting = true;
            }
            Health::Healthy if alerting => {
                tracing::info!("All hosts healthy again");
                alerting = false;
            }
            _ => {}
        }
    }
}

fn log_update(tracker: &mut StatusTracker, stats: &HostStats) {
    tracing::trace!(
        host = %stats.target(),
        status = %stats.last_status,
        latency_ms = ?stats.last_latency_ms,
        "Probe result"
    );

    let Some(t) = tracker.observe(stats) else {
        return;
    };
    match t.to {
        HostStatus::Down => tracing::warn!(
            "Host {} is DOWN ({} -> {}): {}",
            t.target,
            t.from,
            t.to,
            stats.last_message
        ),
        _ => tracing::info!(
            "Host {} is {} ({:.1}% loss)",
            t.target,
            t.to,
            stats.loss_percent()
        ),
    }
}
