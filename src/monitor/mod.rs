//! Monitor module: the registry of monitored targets and their workers.

mod updates;
mod worker;

pub use updates::UpdateStream;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::MonitorConfig;
use crate::probe::Prober;
use crate::stats::HostStats;
use updates::{update_channel, UpdatePublisher};
use worker::{IntervalCell, Worker};

/// Manager-side handle of one running worker.
struct WorkerHandle {
    stop_tx: broadcast::Sender<()>,
    interval: Arc<IntervalCell>,
    stats: watch::Receiver<HostStats>,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    fn signal_stop(&self) {
        // Err only means the worker already exited
        let _ = self.stop_tx.send(());
    }

    /// Wait for the worker to exit; abort it if `deadline` passes first.
    async fn join(self, target: &str, deadline: Instant) {
        let abort = self.task.abort_handle();
        match tokio::time::timeout_at(deadline, self.task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!("Monitor: Worker for {} ended abnormally: {}", target, e),
            Err(_) => {
                tracing::warn!(
                    "Monitor: Worker for {} did not stop within the grace period, abandoning it",
                    target
                );
                abort.abort();
            }
        }
    }
}

/// Thread-safe lifecycle and query surface for the set of monitored targets.
///
/// Each target gets its own worker task. Registry changes are serialized by
/// one lock that is never held across a probe or a join. Dropping the
/// manager stops every worker at its next check.
pub struct HostManager {
    config: MonitorConfig,
    prober: Arc<dyn Prober>,
    workers: RwLock<BTreeMap<String, WorkerHandle>>,
    updates: UpdatePublisher,
}

impl HostManager {
    /// Create a manager and the stream its workers publish to.
    pub fn new(config: MonitorConfig, prober: Arc<dyn Prober>) -> (Self, UpdateStream) {
        let (updates, stream) = update_channel(config.channel_capacity);
        let manager = Self {
            config,
            prober,
            workers: RwLock::new(BTreeMap::new()),
            updates,
        };
        (manager, stream)
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Start monitoring `target`. No-op if it is already monitored or empty.
    ///
    /// Targets are compared by exact string; the interval is clamped to the
    /// configured floor. Must be called from within a tokio runtime.
    pub async fn add_host(&self, target: &str, interval: Duration) -> bool {
        if target.is_empty() {
            return false;
        }

        let mut workers = self.workers.write().await;
        if workers.contains_key(target) {
            return false; // Already running
        }

        let interval = self.config.clamp_interval(interval);
        let (stop_tx, stop_rx) = broadcast::channel(1);
        let (stats_tx, stats_rx) = watch::channel(HostStats::new(target, self.config.history_capacity));
        let cell = Arc::new(IntervalCell::new(interval));

        let worker = Worker {
            target: target.to_string(),
            prober: self.prober.clone(),
            interval: cell.clone(),
            probe_timeout: self.config.probe_timeout,
            start_jitter: self.config.start_jitter,
            stats: stats_tx,
            updates: self.updates.clone(),
            stop_rx,
        };
        let task = tokio::spawn(worker.run());

        workers.insert(
            target.to_string(),
            WorkerHandle {
                stop_tx,
                interval: cell,
                stats: stats_rx,
                task,
            },
        );

        tracing::info!("Monitor: Adding host {} (every {:?})", target, interval);
        true
    }

    /// Stop monitoring `target` and wait (bounded) for its worker to exit.
    ///
    /// Once this returns the target is gone from snapshots and its worker
    /// publishes nothing more: the worker checks for a stop between probing
    /// and publishing, and one that misses the grace period is aborted while
    /// suspended in its probe. Returns `false` if the target was not
    /// monitored.
    pub async fn remove_host(&self, target: &str) -> bool {
        let handle = self.workers.write().await.remove(target);
        let Some(handle) = handle else {
            return false;
        };

        handle.signal_stop();
        handle.join(target, Instant::now() + self.config.shutdown_grace).await;

        tracing::info!("Monitor: Removed host {}", target);
        true
    }

    /// Currently monitored targets, sorted.
    pub async fn list_hosts(&self) -> Vec<String> {
        self.workers.read().await.keys().cloned().collect()
    }

    pub async fn contains(&self, target: &str) -> bool {
        self.workers.read().await.contains_key(target)
    }

    /// Change a target's polling interval. Applies from its next sleep.
    pub async fn update_interval(&self, target: &str, interval: Duration) -> bool {
        let interval = self.config.clamp_interval(interval);
        match self.workers.read().await.get(target) {
            Some(handle) => {
                handle.interval.set(interval);
                tracing::debug!("Monitor: Interval for {} set to {:?}", target, interval);
                true
            }
            None => false,
        }
    }

    /// Change every target's polling interval.
    pub async fn set_interval_all(&self, interval: Duration) {
        let interval = self.config.clamp_interval(interval);
        for handle in self.workers.read().await.values() {
            handle.interval.set(interval);
        }
        tracing::info!("Monitor: Interval for all hosts set to {:?}", interval);
    }

    /// Current polling interval of a target.
    pub async fn interval(&self, target: &str) -> Option<Duration> {
        self.workers.read().await.get(target).map(|h| h.interval.get())
    }

    /// Copy of every monitored target's stats, history included.
    pub async fn snapshot(&self) -> BTreeMap<String, HostStats> {
        self.workers
            .read()
            .await
            .iter()
            .map(|(target, handle)| (target.clone(), handle.stats.borrow().clone()))
            .collect()
    }

    /// Copy of one target's stats.
    pub async fn stats(&self, target: &str) -> Option<HostStats> {
        self.workers
            .read()
            .await
            .get(target)
            .map(|handle| handle.stats.borrow().clone())
    }

    /// Stop every worker and wait for all of them within one grace period.
    pub async fn stop_all(&self) {
        let workers = std::mem::take(&mut *self.workers.write().await);
        if workers.is_empty() {
            return;
        }

        tracing::info!("Monitor: Stopping {} hosts", workers.len());
        for handle in workers.values() {
            handle.signal_stop();
        }

        let deadline = Instant::now() + self.config.shutdown_grace;
        for (target, handle) in workers {
            handle.join(&target, deadline).await;
        }
    }

    /// Updates discarded because the stream was full.
    pub fn dropped_updates(&self) -> u64 {
        self.updates.dropped()
    }
}
