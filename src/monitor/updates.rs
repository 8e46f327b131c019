//! Bounded stream of stats updates from workers to consumers.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};

use crate::stats::HostStats;

/// Create the shared update channel.
pub(crate) fn update_channel(capacity: usize) -> (UpdatePublisher, UpdateStream) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let publisher = UpdatePublisher {
        tx,
        dropped: Arc::new(AtomicU64::new(0)),
    };
    (publisher, UpdateStream { rx })
}

/// Producer side, cloned into every worker. Never blocks.
#[derive(Clone)]
pub(crate) struct UpdatePublisher {
    tx: mpsc::Sender<HostStats>,
    dropped: Arc<AtomicU64>,
}

impl UpdatePublisher {
    /// Offer an update; a full channel drops it.
    pub(crate) fn publish(&self, stats: HostStats) -> bool {
        match self.tx.try_send(stats) {
            Ok(()) => true,
            Err(TrySendError::Full(stats)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::trace!("Update channel full, dropping update for {}", stats.target());
                false
            }
            // Consumer went away; nothing to deliver to
            Err(TrySendError::Closed(_)) => false,
        }
    }

    pub(crate) fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Consumer side of the update channel.
///
/// Every item is a copy of one target's stats taken right after a probe.
/// Updates may be dropped when the consumer falls behind, so only the most
/// recent copy per target is meaningful.
pub struct UpdateStream {
    rx: mpsc::Receiver<HostStats>,
}

impl UpdateStream {
    /// Next update if one is waiting; `None` means no new data right now.
    pub fn try_next(&mut self) -> Option<HostStats> {
        self.rx.try_recv().ok()
    }

    /// Wait for the next update. `None` once every worker and the manager are gone.
    pub async fn next(&mut self) -> Option<HostStats> {
        self.rx.recv().await
    }

    /// Everything currently queued, oldest first.
    pub fn drain(&mut self) -> Vec<HostStats> {
        std::iter::from_fn(|| self.try_next()).collect()
    }

    /// Everything currently queued, keeping only the newest copy per target.
    pub fn drain_latest(&mut self) -> BTreeMap<String, HostStats> {
        let mut latest = BTreeMap::new();
        while let Some(stats) = self.try_next() {
            latest.insert(stats.target().to_string(), stats);
        }
        latest
    }
}
