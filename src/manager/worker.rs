//! Per-job transfer execution.
//!
//! One worker task per in-flight job. The worker streams chunks from the
//! injected transport into the job's content file, reports progress through
//! the dedup tracker, absorbs transient failures against the retry budget,
//! and records exactly one durable outcome before deregistering.

use crate::error::TransferError;
use crate::retry;
use crate::types::{JobState, stop_reason};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use super::OfflineDownloader;

/// How one transfer attempt ended without a transport error
enum AttemptOutcome {
    /// End of stream reached; all bytes on disk
    Completed { bytes: u64 },
    /// Cancellation token fired (pause, remove, or shutdown)
    Cancelled,
}

/// Final outcome of a job's whole transfer, retries included
enum TransferOutcome {
    Completed { bytes: u64 },
    Failed(TransferError),
    Cancelled,
}

impl OfflineDownloader {
    /// Run one job's transfer to a terminal outcome and deregister it
    ///
    /// Called by the scheduler after the job was durably claimed. Always
    /// removes the job from the active map on exit, whatever happened.
    pub(crate) async fn run_transfer(&self, id: String, token: CancellationToken) {
        let outcome = self.transfer_job(&id, &token).await;

        match outcome {
            TransferOutcome::Completed { bytes } => self.finish_completed(&id, bytes).await,
            TransferOutcome::Failed(e) => self.finish_failed(&id, &e).await,
            TransferOutcome::Cancelled => self.finish_cancelled(&id).await,
        }

        self.dispatch.active.lock().await.remove(&id);
    }

    /// Attempt loop: run attempts until completion, cancellation, a
    /// permanent error, or an exhausted retry budget
    async fn transfer_job(&self, id: &str, token: &CancellationToken) -> TransferOutcome {
        let retry_config = &self.config.retry;
        let mut attempt = 0u32;
        let mut delay = retry_config.initial_delay;

        loop {
            match self.run_attempt(id, token).await {
                Ok(AttemptOutcome::Completed { bytes }) => {
                    return TransferOutcome::Completed { bytes };
                }
                Ok(AttemptOutcome::Cancelled) => return TransferOutcome::Cancelled,
                Err(e) if e.is_transient() && attempt < retry_config.max_attempts => {
                    attempt += 1;
                    tracing::warn!(
                        job_id = %id,
                        error = %e,
                        attempt,
                        max_attempts = retry_config.max_attempts,
                        delay_ms = delay.as_millis(),
                        "Transfer attempt failed, retrying"
                    );

                    let backoff = if retry_config.jitter {
                        retry::add_jitter(delay)
                    } else {
                        delay
                    };

                    // Stay responsive to pause/remove while backing off
                    tokio::select! {
                        _ = token.cancelled() => return TransferOutcome::Cancelled,
                        _ = tokio::time::sleep(backoff) => {}
                    }

                    delay = retry::next_delay(delay, retry_config);
                }
                Err(e) => {
                    if e.is_transient() {
                        tracing::error!(
                            job_id = %id,
                            error = %e,
                            attempts = attempt + 1,
                            "Transfer failed after all retry attempts exhausted"
                        );
                    } else {
                        tracing::error!(job_id = %id, error = %e, "Transfer failed permanently");
                    }
                    return TransferOutcome::Failed(e);
                }
            }
        }
    }

    /// One transfer attempt: open the transport at the persisted offset and
    /// stream chunks to disk until done, cancelled, or errored
    ///
    /// Partial bytes are persisted on every exit path so a later resume (or
    /// retry) continues where this attempt left off.
    async fn run_attempt(
        &self,
        id: &str,
        token: &CancellationToken,
    ) -> Result<AttemptOutcome, TransferError> {
        // Store reads gate the attempt; if the store is briefly unavailable
        // the attempt is retryable, not fatal
        let record = self
            .store
            .get_job(id)
            .await
            .map_err(|e| TransferError::Transient(format!("job store unavailable: {}", e)))?;

        let Some(record) = record else {
            // Record vanished (removal won); stop quietly
            return Ok(AttemptOutcome::Cancelled);
        };
        if record.state() != JobState::Downloading {
            return Ok(AttemptOutcome::Cancelled);
        }

        let locator = record
            .locator()
            .map_err(|e| TransferError::Permanent(format!("corrupt source locator: {}", e)))?;
        let requested_offset = record.bytes_downloaded.max(0) as u64;
        let mut total = record.content_length.max(0) as u64;

        let mut stream = self.transport.open(&locator, requested_offset).await?;

        // A transport that cannot honor the offset restarts from zero; the
        // persisted counters must follow or percent would lie
        let mut bytes = stream.resume_offset();
        if bytes != requested_offset {
            tracing::info!(
                job_id = %id,
                requested_offset,
                granted_offset = bytes,
                "Source did not honor resume offset, restarting content"
            );
        }
        if let Some(len) = stream.content_length() {
            total = len;
        }

        let path = self.content_path(id);
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .open(&path)
            .await
            .map_err(|e| TransferError::Permanent(format!("failed to open content file: {}", e)))?;
        // Drop any trailing bytes from a prior attempt beyond the granted offset
        file.set_len(bytes)
            .await
            .map_err(|e| TransferError::Permanent(format!("failed to truncate content file: {}", e)))?;
        file.seek(std::io::SeekFrom::Start(bytes))
            .await
            .map_err(|e| TransferError::Permanent(format!("failed to seek content file: {}", e)))?;

        self.tracker.seed(id, bytes, total);
        self.report_progress(id, bytes, total).await;

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    let _ = file.flush().await;
                    self.persist_partial(id, bytes, total).await;
                    return Ok(AttemptOutcome::Cancelled);
                }
                chunk = stream.next_chunk() => match chunk {
                    Ok(Some(data)) => {
                        file.write_all(&data).await.map_err(|e| {
                            TransferError::Permanent(format!("failed to write content: {}", e))
                        })?;
                        bytes += data.len() as u64;
                        self.report_progress(id, bytes, total).await;
                    }
                    Ok(None) => {
                        file.flush().await.map_err(|e| {
                            TransferError::Permanent(format!("failed to flush content: {}", e))
                        })?;
                        // A stream that declared a total but ran dry early is a
                        // truncated transfer, not a completed one
                        if total > 0 && bytes < total {
                            self.persist_partial(id, bytes, total).await;
                            return Err(TransferError::Transient(format!(
                                "stream ended early at {} of {} bytes",
                                bytes, total
                            )));
                        }
                        return Ok(AttemptOutcome::Completed { bytes });
                    }
                    Err(e) => {
                        let _ = file.flush().await;
                        self.persist_partial(id, bytes, total).await;
                        return Err(e);
                    }
                }
            }
        }
    }

    /// Feed the dedup tracker; persist and notify only on a whole-percent change
    async fn report_progress(&self, id: &str, bytes: u64, total: u64) {
        if self.tracker.on_bytes(id, bytes, total).is_some() {
            self.persist_partial(id, bytes, total).await;
            self.publish_snapshots().await;
        }
    }

    /// Best-effort persistence of partial progress counters
    ///
    /// Progress is advisory until a terminal transition, so failures are
    /// logged rather than propagated; at worst a resume re-fetches a little.
    async fn persist_partial(&self, id: &str, bytes: u64, total: u64) {
        if let Err(e) = self.store.update_progress(id, bytes, total).await {
            tracing::warn!(job_id = %id, error = %e, "Failed to persist partial progress");
        }
    }

    /// Durably record a completed transfer
    async fn finish_completed(&self, id: &str, bytes: u64) {
        // An unknown total resolves to the byte count actually received
        let total = match self.tracker.counters(id) {
            Some((_, total)) if total > 0 => total,
            _ => bytes,
        };

        let result = self
            .persist_with_retry(|| async move {
                self.store.update_progress(id, bytes, total).await?;
                self.store.try_finish(id, JobState::Completed, None).await
            })
            .await;

        match result {
            Ok(true) => {
                tracing::info!(job_id = %id, bytes, "Download completed");
                self.publish_snapshots().await;
            }
            Ok(false) => {
                // Removal or pause won the race; their path owns the record now
                tracing::debug!(job_id = %id, "Completion superseded by a concurrent transition");
            }
            Err(e) => {
                tracing::error!(job_id = %id, error = %e, "Failed to record completion");
            }
        }
    }

    /// Durably record a failed transfer
    async fn finish_failed(&self, id: &str, error: &TransferError) {
        let message = error.to_string();
        let message_ref = message.as_str();
        let result = self
            .persist_with_retry(|| self.store.try_finish(id, JobState::Failed, Some(message_ref)))
            .await;

        match result {
            Ok(true) => {
                tracing::info!(job_id = %id, error = %message, "Download failed");
                self.publish_snapshots().await;
            }
            Ok(false) => {
                tracing::debug!(job_id = %id, "Failure superseded by a concurrent transition");
            }
            Err(e) => {
                tracing::error!(job_id = %id, error = %e, "Failed to record failure");
            }
        }
    }

    /// Settle a cancelled transfer according to who cancelled it
    ///
    /// A facade pause has already written Paused with its reason; removal
    /// has already written Removing. A cancellation with the record still
    /// Downloading can only mean shutdown, which pauses the job so the next
    /// session resumes it explicitly or the restore path requeues it.
    async fn finish_cancelled(&self, id: &str) {
        let state = match self.store.get_job(id).await {
            Ok(Some(record)) => record.state(),
            Ok(None) => return, // removal already reclaimed the record
            Err(e) => {
                tracing::warn!(job_id = %id, error = %e, "Failed to read job after cancellation");
                return;
            }
        };

        match state {
            JobState::Removing => {} // removal path notifies when cleanup ends
            JobState::Downloading => {
                match self
                    .persist_with_retry(|| {
                        self.store.try_mark_paused(id, stop_reason::SHUTDOWN)
                    })
                    .await
                {
                    Ok(true) => {
                        tracing::info!(job_id = %id, "Download paused by shutdown");
                        self.publish_snapshots().await;
                    }
                    Ok(false) => {}
                    Err(e) => {
                        tracing::error!(job_id = %id, error = %e, "Failed to record shutdown pause");
                    }
                }
            }
            _ => {
                // Facade already persisted the transition; just surface the
                // final byte counters
                self.publish_snapshots().await;
            }
        }
    }
}
