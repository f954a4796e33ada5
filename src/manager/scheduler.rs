//! Queued-job dispatch against the concurrency cap.
//!
//! A single scheduler task owns the `Queued → Downloading` transition. It
//! blocks on a semaphore permit (one per transfer slot), pulls the next
//! pending id, durably claims it, and only then spawns a worker. Closing the
//! semaphore is the shutdown signal.

use tokio_util::sync::CancellationToken;

use super::OfflineDownloader;

/// How often the scheduler re-checks the pending queue when it is empty
const SCHEDULER_POLL_INTERVAL: std::time::Duration = std::time::Duration::from_millis(100);

impl OfflineDownloader {
    /// Start the scheduler task
    ///
    /// Must be called once after construction for queued jobs to make
    /// progress. The task runs until [`shutdown`](Self::shutdown) closes the
    /// transfer-slot semaphore.
    pub fn start_scheduler(&self) -> tokio::task::JoinHandle<()> {
        let dl = self.clone();
        tokio::spawn(async move {
            tracing::info!(
                max_concurrent = dl.config.download.max_concurrent_jobs,
                "Scheduler started"
            );
            dl.scheduler_loop().await;
            tracing::info!("Scheduler stopped");
        })
    }

    async fn scheduler_loop(&self) {
        loop {
            // One permit per transfer slot; holding it here means a slot is
            // reserved before we commit a job to it
            let permit = match self.dispatch.slots.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return, // semaphore closed: shutting down
            };

            let id = loop {
                if let Some(id) = self.dispatch.pending.lock().await.pop_front() {
                    break id;
                }
                if self.dispatch.slots.is_closed() {
                    return;
                }
                tokio::time::sleep(SCHEDULER_POLL_INTERVAL).await;
            };

            // Register the cancellation token before claiming, so a pause or
            // remove that lands mid-dispatch always finds something to cancel.
            // If a previous worker for this id is still winding down (paused
            // then promptly resumed), defer until it has deregistered.
            let token = CancellationToken::new();
            {
                let mut active = self.dispatch.active.lock().await;
                if active.contains_key(&id) {
                    drop(active);
                    self.dispatch.pending.lock().await.push_back(id);
                    tokio::time::sleep(SCHEDULER_POLL_INTERVAL).await;
                    continue;
                }
                active.insert(id.clone(), token.clone());
            }

            let claimed = match self.store.try_mark_downloading(&id).await {
                Ok(claimed) => claimed,
                Err(e) => {
                    tracing::error!(job_id = %id, error = %e, "Failed to claim job, requeueing");
                    self.dispatch.active.lock().await.remove(&id);
                    self.dispatch.pending.lock().await.push_back(id);
                    tokio::time::sleep(SCHEDULER_POLL_INTERVAL).await;
                    continue;
                }
            };

            if !claimed {
                // Paused, removed, or otherwise no longer eligible
                tracing::debug!(job_id = %id, "Job no longer eligible for dispatch");
                self.dispatch.active.lock().await.remove(&id);
                continue;
            }

            tracing::info!(job_id = %id, "Dispatching download");
            self.publish_snapshots().await;

            let dl = self.clone();
            tokio::spawn(async move {
                // The permit rides along with the worker; dropping it on exit
                // frees the transfer slot
                dl.run_transfer(id, token).await;
                drop(permit);
            });
        }
    }
}
