//! Job record CRUD and guarded state transitions.
//!
//! Transition writes that race with control-facade calls are expressed as
//! conditional UPDATEs (`WHERE state IN (...)`) returning whether a row
//! changed, so read-modify-write races between the scheduler, workers, and
//! the facade resolve inside SQLite instead of in application code.

use crate::error::{Error, Result, StoreError};
use crate::types::{JobState, stop_reason};

use super::{JobRecord, JobStore, NewJob};

const ALL_COLUMNS: &str = r#"
    id, uri, stream_keys, state, stop_reason,
    bytes_downloaded, content_length, metadata, last_error,
    created_at, started_at, completed_at
"#;

impl JobStore {
    /// Insert a new job record in `Queued` state
    pub async fn insert_job(&self, job: &NewJob) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let stream_keys = serde_json::to_string(&job.locator.stream_keys)?;
        let metadata = serde_json::to_string(&job.metadata)?;

        sqlx::query(
            r#"
            INSERT INTO jobs (
                id, uri, stream_keys, state, stop_reason,
                bytes_downloaded, content_length, metadata, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&job.id)
        .bind(&job.locator.uri)
        .bind(&stream_keys)
        .bind(JobState::Queued.to_i32())
        .bind(stop_reason::NONE)
        .bind(0i64)
        .bind(0i64)
        .bind(&metadata)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Store(StoreError::QueryFailed(format!(
                "Failed to insert job: {}",
                e
            )))
        })?;

        Ok(())
    }

    /// Get a job by id
    pub async fn get_job(&self, id: &str) -> Result<Option<JobRecord>> {
        let row = sqlx::query_as::<_, JobRecord>(&format!(
            "SELECT {ALL_COLUMNS} FROM jobs WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Store(StoreError::QueryFailed(format!("Failed to get job: {}", e)))
        })?;

        Ok(row)
    }

    /// List all jobs
    ///
    /// Returns a point-in-time copy; iteration order is unspecified.
    pub async fn list_jobs(&self) -> Result<Vec<JobRecord>> {
        let rows = sqlx::query_as::<_, JobRecord>(&format!("SELECT {ALL_COLUMNS} FROM jobs"))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                Error::Store(StoreError::QueryFailed(format!(
                    "Failed to list jobs: {}",
                    e
                )))
            })?;

        Ok(rows)
    }

    /// List jobs with a specific state
    pub async fn list_jobs_by_state(&self, state: JobState) -> Result<Vec<JobRecord>> {
        let rows = sqlx::query_as::<_, JobRecord>(&format!(
            "SELECT {ALL_COLUMNS} FROM jobs WHERE state = ? ORDER BY created_at ASC"
        ))
        .bind(state.to_i32())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Store(StoreError::QueryFailed(format!(
                "Failed to list jobs by state: {}",
                e
            )))
        })?;

        Ok(rows)
    }

    /// Delete a job record
    ///
    /// Idempotent: deleting a nonexistent id is a no-op, not an error.
    pub async fn delete_job(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM jobs WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Store(StoreError::QueryFailed(format!(
                    "Failed to delete job: {}",
                    e
                )))
            })?;

        Ok(())
    }

    /// Update transfer progress counters
    pub async fn update_progress(
        &self,
        id: &str,
        bytes_downloaded: u64,
        content_length: u64,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE jobs SET bytes_downloaded = ?, content_length = ? WHERE id = ?",
        )
        .bind(bytes_downloaded as i64)
        .bind(content_length as i64)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Store(StoreError::QueryFailed(format!(
                "Failed to update progress: {}",
                e
            )))
        })?;

        Ok(())
    }

    /// Claim a Queued job for a transfer slot
    ///
    /// Transitions `Queued → Downloading` only if the job is still eligible
    /// (queued, not stopped). Returns false if another actor changed the job
    /// first.
    pub async fn try_mark_downloading(&self, id: &str) -> Result<bool> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET state = ?, stop_reason = ?, started_at = COALESCE(started_at, ?)
            WHERE id = ? AND state = ? AND stop_reason = ?
            "#,
        )
        .bind(JobState::Downloading.to_i32())
        .bind(stop_reason::NONE)
        .bind(now)
        .bind(id)
        .bind(JobState::Queued.to_i32())
        .bind(stop_reason::NONE)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Store(StoreError::QueryFailed(format!(
                "Failed to claim job for download: {}",
                e
            )))
        })?;

        Ok(result.rows_affected() > 0)
    }

    /// Pause a Queued or Downloading job
    ///
    /// State and stop reason are written in one statement so no observer can
    /// ever see `Paused` with a zero stop reason or vice versa.
    pub async fn try_mark_paused(&self, id: &str, reason: i32) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE jobs SET state = ?, stop_reason = ? WHERE id = ? AND state IN (?, ?)",
        )
        .bind(JobState::Paused.to_i32())
        .bind(reason)
        .bind(id)
        .bind(JobState::Queued.to_i32())
        .bind(JobState::Downloading.to_i32())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Store(StoreError::QueryFailed(format!(
                "Failed to mark job paused: {}",
                e
            )))
        })?;

        Ok(result.rows_affected() > 0)
    }

    /// Requeue a Paused job, clearing its stop reason
    pub async fn try_requeue_paused(&self, id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE jobs SET state = ?, stop_reason = ? WHERE id = ? AND state = ?",
        )
        .bind(JobState::Queued.to_i32())
        .bind(stop_reason::NONE)
        .bind(id)
        .bind(JobState::Paused.to_i32())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Store(StoreError::QueryFailed(format!(
                "Failed to requeue paused job: {}",
                e
            )))
        })?;

        Ok(result.rows_affected() > 0)
    }

    /// Requeue a Failed job for an explicit retry, clearing its error
    pub async fn try_requeue_failed(&self, id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET state = ?, stop_reason = ?, last_error = NULL, completed_at = NULL
            WHERE id = ? AND state = ?
            "#,
        )
        .bind(JobState::Queued.to_i32())
        .bind(stop_reason::NONE)
        .bind(id)
        .bind(JobState::Failed.to_i32())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Store(StoreError::QueryFailed(format!(
                "Failed to requeue failed job: {}",
                e
            )))
        })?;

        Ok(result.rows_affected() > 0)
    }

    /// Requeue a job left in Downloading by an unclean shutdown
    pub async fn try_requeue_interrupted(&self, id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE jobs SET state = ?, stop_reason = ? WHERE id = ? AND state = ?",
        )
        .bind(JobState::Queued.to_i32())
        .bind(stop_reason::NONE)
        .bind(id)
        .bind(JobState::Downloading.to_i32())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Store(StoreError::QueryFailed(format!(
                "Failed to requeue interrupted job: {}",
                e
            )))
        })?;

        Ok(result.rows_affected() > 0)
    }

    /// Move a job to Removing from any state
    ///
    /// Clears the stop reason so `Paused ⇔ stop_reason != 0` keeps holding.
    pub async fn try_mark_removing(&self, id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE jobs SET state = ?, stop_reason = ? WHERE id = ?",
        )
        .bind(JobState::Removing.to_i32())
        .bind(stop_reason::NONE)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Store(StoreError::QueryFailed(format!(
                "Failed to mark job removing: {}",
                e
            )))
        })?;

        Ok(result.rows_affected() > 0)
    }

    /// Record a worker's terminal outcome (Completed or Failed)
    ///
    /// Guarded on the job still being Downloading: if the facade moved it to
    /// Removing underfoot, the terminal write is dropped and removal wins.
    pub async fn try_finish(
        &self,
        id: &str,
        final_state: JobState,
        last_error: Option<&str>,
    ) -> Result<bool> {
        debug_assert!(final_state.is_terminal());
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET state = ?, last_error = ?, completed_at = ?
            WHERE id = ? AND state = ?
            "#,
        )
        .bind(final_state.to_i32())
        .bind(last_error)
        .bind(now)
        .bind(id)
        .bind(JobState::Downloading.to_i32())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Store(StoreError::QueryFailed(format!(
                "Failed to record terminal state: {}",
                e
            )))
        })?;

        Ok(result.rows_affected() > 0)
    }
}
