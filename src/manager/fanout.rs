//! Snapshot notification fan-out.
//!
//! Observers never see live engine state: every notification is a complete,
//! immutable snapshot list computed after the underlying store effect
//! committed. The list is shared behind an `Arc` so fan-out to N subscribers
//! costs one allocation, not N copies.

use crate::types::JobSnapshot;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Buffered notifications per subscriber before coalescing kicks in
const FANOUT_BUFFER: usize = 256;

/// Broadcast hub for job snapshot lists
#[derive(Clone)]
pub(crate) struct SnapshotFanout {
    tx: broadcast::Sender<Arc<[JobSnapshot]>>,
}

impl SnapshotFanout {
    pub(crate) fn new() -> Self {
        let (tx, _rx) = broadcast::channel(FANOUT_BUFFER);
        Self { tx }
    }

    /// Broadcast a snapshot list to all current subscribers
    ///
    /// send() returns Err if there are no receivers, which is fine - the
    /// notification is simply dropped.
    pub(crate) fn publish(&self, snapshots: Vec<JobSnapshot>) {
        self.tx.send(Arc::from(snapshots.into_boxed_slice())).ok();
    }

    pub(crate) fn subscribe(&self) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
        }
    }

    /// Number of live subscriptions
    pub(crate) fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// Handle to a snapshot notification stream
///
/// Obtained from [`subscribe`](crate::OfflineDownloader::subscribe).
/// Dropping the handle unsubscribes; there is no separate unregister call.
pub struct Subscription {
    rx: broadcast::Receiver<Arc<[JobSnapshot]>>,
}

impl Subscription {
    /// Receive the next snapshot list
    ///
    /// Returns `None` once the manager is gone and no buffered notifications
    /// remain. A slow subscriber that falls behind the buffer loses the
    /// oldest notifications and resumes at the newest available list; since
    /// every list is complete, skipped intermediates cost nothing but
    /// granularity.
    pub async fn recv(&mut self) -> Option<Arc<[JobSnapshot]>> {
        loop {
            match self.rx.recv().await {
                Ok(snapshots) => return Some(snapshots),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Subscriber lagged, coalescing notifications");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Receive without waiting; `None` when no notification is buffered
    pub fn try_recv(&mut self) -> Option<Arc<[JobSnapshot]>> {
        loop {
            match self.rx.try_recv() {
                Ok(snapshots) => return Some(snapshots),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}
