//! Per-target probe loop.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use rand::Rng;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tokio::sync::watch;

use super::updates::UpdatePublisher;
use crate::probe::{ProbeOutcome, Prober};
use crate::stats::HostStats;

/// Polling interval shared between a worker and the manager.
///
/// The manager writes, the worker reads at the top of every sleep; a stale
/// read costs at most one cycle. Intervals too long to fit saturate at
/// `u64::MAX` microseconds.
#[derive(Debug)]
pub(crate) struct IntervalCell(AtomicU64);

impl IntervalCell {
    pub(crate) fn new(interval: Duration) -> Self {
        Self(AtomicU64::new(Self::micros(interval)))
    }

    fn micros(interval: Duration) -> u64 {
        u64::try_from(interval.as_micros()).unwrap_or(u64::MAX)
    }

    pub(crate) fn get(&self) -> Duration {
        Duration::from_micros(self.0.load(Ordering::Relaxed))
    }

    pub(crate) fn set(&self, interval: Duration) {
        self.0.store(Self::micros(interval), Ordering::Relaxed);
    }
}

/// Drives one target's probes until its stop signal fires.
///
/// The worker holds the only sender of its stats cell, so it is the single
/// writer of that target's `HostStats`.
pub(crate) struct Worker {
    pub(crate) target: String,
    pub(crate) prober: Arc<dyn Prober>,
    pub(crate) interval: Arc<IntervalCell>,
    pub(crate) probe_timeout: Duration,
    pub(crate) start_jitter: Duration,
    pub(crate) stats: watch::Sender<HostStats>,
    pub(crate) updates: UpdatePublisher,
    pub(crate) stop_rx: broadcast::Receiver<()>,
}

impl Worker {
    pub(crate) async fn run(mut self) {
        tracing::debug!(host = %self.target, "Worker started");

        // Spread first probes of targets added together
        if !self.start_jitter.is_zero() {
            let jitter = rand::thread_rng().gen_range(Duration::ZERO..=self.start_jitter);
            if !self.sleep_or_stop(jitter).await {
                tracing::debug!(host = %self.target, "Worker stopped");
                return;
            }
        }

        loop {
            if self.stop_requested() {
                break;
            }

            self.stats.send_modify(HostStats::begin_attempt);

            let start = Instant::now();
            let mut outcome = match tokio::time::timeout(self.probe_timeout, self.prober.probe(&self.target)).await {
                Ok(outcome) => outcome,
                Err(_) => ProbeOutcome::down(format!("probe timed out after {:?}", self.probe_timeout)),
            };
            // An up target always carries a latency
            if outcome.success && outcome.latency_ms.is_none() {
                outcome.latency_ms = Some(start.elapsed().as_secs_f64() * 1000.0);
            }

            let now = Utc::now();
            self.stats.send_modify(|stats| stats.record(&outcome, now));

            // Removed while probing: the target is gone, publish nothing
            if self.stop_requested() {
                break;
            }
            self.updates.publish(self.stats.borrow().clone());

            let interval = self.interval.get();
            if !self.sleep_or_stop(interval).await {
                break;
            }
        }

        tracing::debug!(host = %self.target, "Worker stopped");
    }

    /// Stop was signalled, or the manager side is gone.
    fn stop_requested(&mut self) -> bool {
        !matches!(self.stop_rx.try_recv(), Err(TryRecvError::Empty))
    }

    /// Sleep unless stopped first. Returns `false` on stop.
    async fn sleep_or_stop(&mut self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.stop_rx.recv() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::updates::update_channel;
    use crate::stats::HostStatus;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    struct Flaky {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Prober for Flaky {
        async fn probe(&self, _target: &str) -> ProbeOutcome {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n % 2 == 0 {
                ProbeOutcome::up(Some(1.0 + n as f64), "reply")
            } else {
                ProbeOutcome::down("timeout")
            }
        }
    }

    struct Stuck;

    struct NoLatency;

    #[async_trait]
    impl Prober for NoLatency {
        async fn probe(&self, _target: &str) -> ProbeOutcome {
            tokio::time::sleep(Duration::from_millis(5)).await;
            ProbeOutcome::up(None, "reply")
        }
    }

    struct Slow;

    #[async_trait]
    impl Prober for Slow {
        async fn probe(&self, _target: &str) -> ProbeOutcome {
            tokio::time::sleep(Duration::from_millis(200)).await;
            ProbeOutcome::up(Some(200.0), "late reply")
        }
    }

    #[async_trait]
    impl Prober for Stuck {
        async fn probe(&self, _target: &str) -> ProbeOutcome {
            tokio::time::sleep(Duration::from_secs(60)).await;
            ProbeOutcome::up(Some(1.0), "late")
        }
    }

    fn worker(
        prober: Arc<dyn Prober>,
        interval: Duration,
        probe_timeout: Duration,
    ) -> (Worker, watch::Receiver<HostStats>, broadcast::Sender<()>, crate::monitor::UpdateStream) {
        let (publisher, stream) = update_channel(100);
        let (stop_tx, stop_rx) = broadcast::channel(1);
        let (stats_tx, stats_rx) = watch::channel(HostStats::new("host", 8));
        let worker = Worker {
            target: "host".to_string(),
            prober,
            interval: Arc::new(IntervalCell::new(interval)),
            probe_timeout,
            start_jitter: Duration::ZERO,
            stats: stats_tx,
            updates: publisher,
            stop_rx,
        };
        (worker, stats_rx, stop_tx, stream)
    }

    #[test]
    fn test_interval_cell_roundtrip() {
        let cell = IntervalCell::new(Duration::from_millis(250));
        assert_eq!(cell.get(), Duration::from_millis(250));
        cell.set(Duration::from_secs(3));
        assert_eq!(cell.get(), Duration::from_secs(3));
    }

    #[test]
    fn test_interval_cell_saturates() {
        let huge = Duration::from_micros(u64::MAX) + Duration::from_micros(2);
        let cell = IntervalCell::new(huge);
        assert_eq!(cell.get(), Duration::from_micros(u64::MAX));

        cell.set(Duration::MAX);
        assert_eq!(cell.get(), Duration::from_micros(u64::MAX));
    }

    #[tokio::test]
    async fn test_success_without_latency_uses_wall_clock() {
        let (worker, _stats, stop_tx, mut stream) =
            worker(Arc::new(NoLatency), Duration::from_secs(3600), Duration::from_secs(1));

        let handle = tokio::spawn(worker.run());
        let update = tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(update.last_status, HostStatus::Up);
        let latency = update.last_latency_ms.unwrap();
        assert!(latency >= 5.0, "latency = {}", latency);
        assert_eq!(update.latency_count, 1);

        stop_tx.send(()).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_during_probe_publishes_nothing() {
        let (worker, _stats, stop_tx, mut stream) =
            worker(Arc::new(Slow), Duration::from_secs(3600), Duration::from_secs(1));

        let handle = tokio::spawn(worker.run());
        tokio::time::sleep(Duration::from_millis(50)).await;
        stop_tx.send(()).unwrap();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(stream.try_next().is_none());
    }

    #[tokio::test]
    async fn test_worker_publishes_each_cycle_and_stops() {
        let prober = Arc::new(Flaky { calls: AtomicUsize::new(0) });
        let (worker, stats_rx, stop_tx, mut stream) =
            worker(prober, Duration::from_millis(10), Duration::from_secs(1));

        let handle = tokio::spawn(worker.run());
        tokio::time::sleep(Duration::from_millis(100)).await;
        stop_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("worker should stop promptly")
            .unwrap();

        let updates = stream.drain();
        assert!(updates.len() >= 2);
        // One writer, strictly ordered
        for pair in updates.windows(2) {
            assert!(pair[0].sent < pair[1].sent);
        }

        let stats = stats_rx.borrow().clone();
        assert_eq!(stats.sent, updates.last().unwrap().sent);
        assert!(stats.received <= stats.sent);
        assert_ne!(stats.last_status, HostStatus::Unknown);
    }

    #[tokio::test]
    async fn test_stop_interrupts_long_sleep() {
        let prober = Arc::new(Flaky { calls: AtomicUsize::new(0) });
        let (worker, _stats, stop_tx, _stream) =
            worker(prober, Duration::from_secs(3600), Duration::from_secs(1));

        let handle = tokio::spawn(worker.run());
        tokio::time::sleep(Duration::from_millis(50)).await;
        stop_tx.send(()).unwrap();

        assert!(tokio::time::timeout(Duration::from_millis(500), handle).await.is_ok());
    }

    #[tokio::test]
    async fn test_dropped_stop_sender_ends_worker() {
        let prober = Arc::new(Flaky { calls: AtomicUsize::new(0) });
        let (worker, _stats, stop_tx, _stream) =
            worker(prober, Duration::from_secs(3600), Duration::from_secs(1));

        let handle = tokio::spawn(worker.run());
        drop(stop_tx);

        assert!(tokio::time::timeout(Duration::from_millis(500), handle).await.is_ok());
    }

    #[tokio::test]
    async fn test_probe_timeout_records_down() {
        let (worker, stats_rx, stop_tx, mut stream) =
            worker(Arc::new(Stuck), Duration::from_secs(3600), Duration::from_millis(50));

        let handle = tokio::spawn(worker.run());
        let update = tokio::time::timeout(Duration::from_secs(2), stream.next())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(update.last_status, HostStatus::Down);
        assert_eq!(update.sent, 1);
        assert_eq!(update.received, 0);
        assert!(update.last_message.starts_with("probe timed out"));
        assert_eq!(stats_rx.borrow().history().len(), 1);

        stop_tx.send(()).unwrap();
        handle.await.unwrap();
    }
}
