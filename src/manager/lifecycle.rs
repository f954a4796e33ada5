//! Startup restore and shutdown coordination.

use crate::error::Result;
use crate::types::{JobState, stop_reason};

use super::OfflineDownloader;

impl OfflineDownloader {
    /// Reload persisted jobs into the dispatch queue on startup
    ///
    /// - Queued jobs go back into the pending FIFO.
    /// - Jobs still marked Downloading were interrupted by an unclean
    ///   shutdown; they are requeued and resume from their persisted offset.
    /// - Jobs paused by a clean shutdown (stop reason
    ///   [`stop_reason::SHUTDOWN`]) are requeued as well; only
    ///   user-initiated pauses survive a restart.
    pub(crate) async fn restore_jobs(&self) -> Result<()> {
        let records = self.store.list_jobs().await?;
        if records.is_empty() {
            return Ok(());
        }

        let mut requeued = 0usize;
        let mut pending = self.dispatch.pending.lock().await;

        for record in &records {
            match record.state() {
                JobState::Queued => {
                    pending.push_back(record.id.clone());
                    requeued += 1;
                }
                JobState::Downloading => {
                    tracing::warn!(
                        job_id = %record.id,
                        bytes = record.bytes_downloaded,
                        "Job interrupted by unclean shutdown, requeueing"
                    );
                    if self.store.try_requeue_interrupted(&record.id).await? {
                        pending.push_back(record.id.clone());
                        requeued += 1;
                    }
                }
                JobState::Paused if record.stop_reason == stop_reason::SHUTDOWN => {
                    if self.store.try_requeue_paused(&record.id).await? {
                        pending.push_back(record.id.clone());
                        requeued += 1;
                    }
                }
                JobState::Removing => {
                    // Removal never finished; restart its cleanup tail
                    let dl = self.clone();
                    let id = record.id.clone();
                    tokio::spawn(async move {
                        dl.finalize_removal(&id).await;
                    });
                }
                _ => {}
            }
        }
        drop(pending);

        tracing::info!(
            total = records.len(),
            requeued,
            "Restored persisted jobs"
        );
        self.publish_snapshots().await;
        Ok(())
    }

    /// Gracefully shut down the manager
    ///
    /// Stops accepting new jobs, halts the scheduler, cancels in-flight
    /// transfers (each is persisted as Paused with
    /// [`stop_reason::SHUTDOWN`]), and waits up to the configured grace
    /// period for workers to wind down. Partial bytes stay on disk for the
    /// next session to resume.
    pub async fn shutdown(&self) {
        tracing::info!("Shutdown requested");

        self.dispatch
            .accepting_new
            .store(false, std::sync::atomic::Ordering::SeqCst);

        // Closing the semaphore wakes the scheduler out of acquire and ends
        // its loop
        self.dispatch.slots.close();

        {
            let active = self.dispatch.active.lock().await;
            for (id, token) in active.iter() {
                tracing::debug!(job_id = %id, "Cancelling in-flight transfer for shutdown");
                token.cancel();
            }
        }

        let deadline = tokio::time::Instant::now() + self.config.download.shutdown_grace;
        loop {
            let remaining = self.dispatch.active.lock().await.len();
            if remaining == 0 {
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                tracing::warn!(
                    remaining,
                    "Shutdown grace period expired with workers still active"
                );
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(25)).await;
        }

        tracing::info!("Shutdown complete");
    }
}
