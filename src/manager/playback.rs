//! Resolving completed jobs to local content paths.

use crate::error::Result;
use crate::types::JobState;
use std::path::PathBuf;

use super::OfflineDownloader;

impl OfflineDownloader {
    /// Resolve a job to its local content file for playback
    ///
    /// Returns the on-disk path only for Completed jobs whose content file
    /// actually exists; anything else (unknown id, job not finished, file
    /// reclaimed out-of-band) resolves to `None` rather than an error, so
    /// callers can fall back to streaming.
    pub async fn resolve_playback_source(&self, id: &str) -> Result<Option<PathBuf>> {
        let Some(record) = self.store.get_job(id).await? else {
            return Ok(None);
        };

        if record.state() != JobState::Completed {
            return Ok(None);
        }

        let path = self.content_path(id);
        match tokio::fs::try_exists(&path).await {
            Ok(true) => Ok(Some(path)),
            Ok(false) => {
                tracing::warn!(
                    job_id = %id,
                    path = %path.display(),
                    "Completed job has no content file on disk"
                );
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }
}
