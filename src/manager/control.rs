//! Job lifecycle control operations (start, pause, resume, remove, query).
//!
//! Every mutation follows the same shape: validate against the stored
//! record, durably persist the transition (with a short retry budget), only
//! then touch in-memory dispatch state and notify subscribers. Transitions
//! that lose a race with another actor resolve as no-ops, not errors.

use crate::error::{Error, Result};
use crate::store::NewJob;
use crate::types::{JobSnapshot, JobState, JobStats, SourceLocator, stop_reason};

use super::OfflineDownloader;

impl OfflineDownloader {
    /// Register a new download job and queue it for transfer
    ///
    /// `id` is the stable content identifier and must be unique among live
    /// jobs. Starting an id whose previous job Failed discards that attempt
    /// (record and partial content) and starts fresh; starting an id in any
    /// other state returns [`Error::AlreadyExists`]. To retry a failed job
    /// in place, keeping its record, use [`retry_failed`](Self::retry_failed).
    pub async fn start_download(
        &self,
        id: impl Into<String>,
        locator: SourceLocator,
        metadata: serde_json::Value,
    ) -> Result<()> {
        let id = id.into();

        if !self
            .dispatch
            .accepting_new
            .load(std::sync::atomic::Ordering::SeqCst)
        {
            return Err(Error::ShuttingDown);
        }

        if let Some(existing) = self.store.get_job(&id).await? {
            match existing.state() {
                JobState::Failed => {
                    // A fresh start supersedes the failed attempt entirely
                    tracing::info!(job_id = %id, "Replacing failed job with a fresh download");
                    self.delete_content_file(&id).await;
                    let id_ref = id.as_str();
                    self.persist_with_retry(|| self.store.delete_job(id_ref))
                        .await?;
                }
                state => {
                    return Err(Error::AlreadyExists { id, state });
                }
            }
        }

        let job = NewJob {
            id: id.clone(),
            locator,
            metadata,
        };
        let job_ref = &job;
        self.persist_with_retry(|| self.store.insert_job(job_ref))
            .await?;

        self.dispatch.pending.lock().await.push_back(id.clone());

        tracing::info!(job_id = %id, "Download queued");
        self.publish_snapshots().await;
        Ok(())
    }

    /// Pause a job, recording a user-initiated stop
    ///
    /// Equivalent to [`pause_with_reason`](Self::pause_with_reason) with
    /// [`stop_reason::USER`].
    pub async fn pause(&self, id: &str) -> Result<()> {
        self.pause_with_reason(id, stop_reason::USER).await
    }

    /// Pause a job with an application-supplied stop reason
    ///
    /// Valid on Queued and Downloading jobs; partial bytes are retained. Any
    /// other state is left untouched and the call succeeds as a no-op, so
    /// racing a pause against a completing worker never errors. A zero
    /// reason would make the pause indistinguishable from "never stopped",
    /// so it is coerced to [`stop_reason::USER`].
    pub async fn pause_with_reason(&self, id: &str, reason: i32) -> Result<()> {
        let reason = if reason == stop_reason::NONE {
            stop_reason::USER
        } else {
            reason
        };

        let record = self
            .store
            .get_job(id)
            .await?
            .ok_or_else(|| Error::NotFound(id.to_string()))?;

        match record.state() {
            JobState::Queued | JobState::Downloading => {}
            state => {
                tracing::debug!(job_id = %id, ?state, "Pause is a no-op in this state");
                return Ok(());
            }
        }

        // Durable first: the worker's cancellation handler treats an
        // already-Paused record as "the facade got here before me".
        let paused = self
            .persist_with_retry(|| self.store.try_mark_paused(id, reason))
            .await?;

        if !paused {
            // Lost the race to a terminal transition; nothing to stop
            tracing::debug!(job_id = %id, "Job changed state before pause applied");
            return Ok(());
        }

        self.remove_from_pending(id).await;
        self.cancel_active(id).await;

        tracing::info!(job_id = %id, reason, "Download paused");
        self.publish_snapshots().await;
        Ok(())
    }

    /// Resume a paused job
    ///
    /// Requeues the job; the next free transfer slot picks it up and the
    /// transport is asked to continue from the persisted byte offset. Jobs
    /// in any state other than Paused are left untouched (no-op).
    pub async fn resume(&self, id: &str) -> Result<()> {
        let record = self
            .store
            .get_job(id)
            .await?
            .ok_or_else(|| Error::NotFound(id.to_string()))?;

        if record.state() != JobState::Paused {
            tracing::debug!(job_id = %id, state = ?record.state(), "Resume is a no-op in this state");
            return Ok(());
        }

        let requeued = self
            .persist_with_retry(|| self.store.try_requeue_paused(id))
            .await?;

        if requeued {
            self.dispatch.pending.lock().await.push_back(id.to_string());
            tracing::info!(job_id = %id, "Download resumed");
            self.publish_snapshots().await;
        }
        Ok(())
    }

    /// Remove a job, reclaiming its record and on-disk content
    ///
    /// Valid in any state; removing an id with no record succeeds as a
    /// no-op. The job becomes `Removing` immediately; content deletion
    /// waits for an in-flight worker to wind down and proceeds in the
    /// background. Once cleanup finishes the id disappears from snapshots
    /// entirely and may be reused.
    pub async fn remove(&self, id: &str) -> Result<()> {
        let removing = self
            .persist_with_retry(|| self.store.try_mark_removing(id))
            .await?;

        if !removing {
            // Nothing tracked under this id; the desired end state already holds
            tracing::debug!(job_id = %id, "Remove is a no-op for an unknown id");
            return Ok(());
        }

        self.remove_from_pending(id).await;
        self.cancel_active(id).await;

        tracing::info!(job_id = %id, "Download removal started");
        self.publish_snapshots().await;

        // Finish reclamation off the caller's critical path
        let dl = self.clone();
        let id = id.to_string();
        tokio::spawn(async move {
            dl.finalize_removal(&id).await;
        });

        Ok(())
    }

    /// Retry a failed job in place
    ///
    /// Moves the job back to Queued, clearing its recorded error while
    /// keeping the record (and any partial content) intact. Jobs in any
    /// state other than Failed are left untouched (no-op).
    pub async fn retry_failed(&self, id: &str) -> Result<()> {
        let record = self
            .store
            .get_job(id)
            .await?
            .ok_or_else(|| Error::NotFound(id.to_string()))?;

        if record.state() != JobState::Failed {
            tracing::debug!(job_id = %id, state = ?record.state(), "Retry is a no-op in this state");
            return Ok(());
        }

        let requeued = self
            .persist_with_retry(|| self.store.try_requeue_failed(id))
            .await?;

        if requeued {
            self.dispatch.pending.lock().await.push_back(id.to_string());
            tracing::info!(job_id = %id, "Failed download requeued");
            self.publish_snapshots().await;
        }
        Ok(())
    }

    /// Current snapshot of one job
    pub async fn status(&self, id: &str) -> Result<JobSnapshot> {
        let record = self
            .store
            .get_job(id)
            .await?
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        Ok(record.snapshot())
    }

    /// Snapshots of all tracked jobs
    pub async fn list(&self) -> Result<Vec<JobSnapshot>> {
        let records = self.store.list_jobs().await?;
        Ok(records.iter().map(|r| r.snapshot()).collect())
    }

    /// Aggregate counts and byte totals over all tracked jobs
    pub async fn stats(&self) -> Result<JobStats> {
        let records = self.store.list_jobs().await?;
        let mut stats = JobStats {
            total: records.len(),
            ..Default::default()
        };

        for record in &records {
            match record.state() {
                JobState::Queued => stats.queued += 1,
                JobState::Downloading => stats.downloading += 1,
                JobState::Paused => stats.paused += 1,
                JobState::Completed => stats.completed += 1,
                JobState::Failed => stats.failed += 1,
                JobState::Removing => stats.removing += 1,
            }
            stats.bytes_downloaded += record.bytes_downloaded.max(0) as u64;
            stats.content_length += record.content_length.max(0) as u64;
        }

        Ok(stats)
    }

    /// Pause every Queued and Downloading job
    ///
    /// Jobs are paused concurrently and independently; the first error
    /// encountered, if any, is returned after all jobs were attempted.
    pub async fn pause_all(&self, reason: i32) -> Result<()> {
        let records = self.store.list_jobs().await?;
        let eligible: Vec<_> = records
            .iter()
            .filter(|r| matches!(r.state(), JobState::Queued | JobState::Downloading))
            .collect();

        let results = futures::future::join_all(
            eligible
                .iter()
                .map(|r| self.pause_with_reason(&r.id, reason)),
        )
        .await;

        let mut first_err = None;
        for (record, result) in eligible.iter().zip(results) {
            if let Err(e) = result {
                tracing::warn!(job_id = %record.id, error = %e, "Failed to pause job");
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Resume every Paused job
    pub async fn resume_all(&self) -> Result<()> {
        let records = self.store.list_jobs_by_state(JobState::Paused).await?;

        let results =
            futures::future::join_all(records.iter().map(|r| self.resume(&r.id))).await;

        let mut first_err = None;
        for (record, result) in records.iter().zip(results) {
            if let Err(e) = result {
                tracing::warn!(job_id = %record.id, error = %e, "Failed to resume job");
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Drop an id from the pending FIFO, if queued
    pub(crate) async fn remove_from_pending(&self, id: &str) {
        let mut pending = self.dispatch.pending.lock().await;
        pending.retain(|queued| queued != id);
    }

    /// Signal an in-flight worker to stop; true if one was running
    pub(crate) async fn cancel_active(&self, id: &str) -> bool {
        let active = self.dispatch.active.lock().await;
        match active.get(id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Background tail of [`remove`](Self::remove)
    ///
    /// Waits for any in-flight worker to release the job, then reclaims the
    /// content file and the record.
    pub(crate) async fn finalize_removal(&self, id: &str) {
        // The cancelled worker exits within a chunk boundary; poll until it
        // deregisters rather than holding the map lock across the wait.
        loop {
            let still_active = self.dispatch.active.lock().await.contains_key(id);
            if !still_active {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(25)).await;
        }

        self.delete_content_file(id).await;

        if let Err(e) = self
            .persist_with_retry(|| self.store.delete_job(id))
            .await
        {
            tracing::error!(job_id = %id, error = %e, "Failed to delete job record during removal");
            return;
        }

        self.tracker.forget(id);
        tracing::info!(job_id = %id, "Download removed");
        self.publish_snapshots().await;
    }

    /// Best-effort delete of a job's content file
    ///
    /// Missing files are expected (job never started, or already cleaned).
    pub(crate) async fn delete_content_file(&self, id: &str) {
        let path = self.content_path(id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                tracing::debug!(job_id = %id, path = %path.display(), "Deleted content file");
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(job_id = %id, path = %path.display(), error = %e, "Failed to delete content file");
            }
        }
    }
}
