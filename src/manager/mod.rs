//! Core download manager split into focused submodules.
//!
//! The `OfflineDownloader` struct and its methods are organized by domain:
//! - [`control`] - Job lifecycle control (start/pause/resume/remove/query)
//! - [`scheduler`] - Queued-job dispatch against the concurrency cap
//! - [`worker`] - Per-job transfer execution and retry
//! - [`fanout`] - Snapshot notification fan-out to subscribers
//! - [`lifecycle`] - Startup restore and shutdown coordination
//! - [`playback`] - Resolving completed jobs to local content paths

mod control;
mod fanout;
mod lifecycle;
mod playback;
mod scheduler;
mod worker;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

pub use fanout::Subscription;

use crate::config::{Config, RetryConfig};
use crate::error::{Error, Result};
use crate::progress::ProgressTracker;
use crate::retry::with_retry;
use crate::store::JobStore;
use crate::transport::Transport;
use fanout::SnapshotFanout;

use std::path::PathBuf;

/// Dispatch state shared between the control facade and the scheduler
#[derive(Clone)]
pub(crate) struct JobDispatch {
    /// FIFO of job ids awaiting a transfer slot (protected by Mutex)
    pub(crate) pending:
        std::sync::Arc<tokio::sync::Mutex<std::collections::VecDeque<String>>>,
    /// Semaphore bounding concurrent transfers (closed on shutdown)
    pub(crate) slots: std::sync::Arc<tokio::sync::Semaphore>,
    /// Map of in-flight jobs to their cancellation tokens (for pause/remove)
    pub(crate) active: std::sync::Arc<
        tokio::sync::Mutex<std::collections::HashMap<String, tokio_util::sync::CancellationToken>>,
    >,
    /// Flag indicating whether new jobs are accepted (cleared during shutdown)
    pub(crate) accepting_new: std::sync::Arc<std::sync::atomic::AtomicBool>,
}

/// Main offline download manager (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub struct OfflineDownloader {
    /// Durable job index (wrapped in Arc for sharing across tasks)
    pub(crate) store: std::sync::Arc<JobStore>,
    /// Injected byte-range transport
    pub(crate) transport: std::sync::Arc<dyn Transport>,
    /// Configuration (wrapped in Arc for sharing across tasks)
    pub(crate) config: std::sync::Arc<Config>,
    /// Snapshot notification fan-out
    pub(crate) fanout: SnapshotFanout,
    /// Per-job progress accounting with percent dedup
    pub(crate) tracker: std::sync::Arc<ProgressTracker>,
    /// Dispatch state shared with the scheduler
    pub(crate) dispatch: JobDispatch,
}

impl OfflineDownloader {
    /// Create a new OfflineDownloader instance
    ///
    /// This initializes all core components:
    /// - Creates the content directory
    /// - Opens/creates the SQLite job store and runs migrations
    /// - Sets up the snapshot broadcast channel
    /// - Restores persisted jobs, repairing any left mid-transfer by an
    ///   unclean shutdown
    ///
    /// The scheduler is not running yet; call
    /// [`start_scheduler`](Self::start_scheduler) to begin dispatching
    /// queued jobs.
    pub async fn new(config: Config, transport: std::sync::Arc<dyn Transport>) -> Result<Self> {
        tokio::fs::create_dir_all(&config.storage.content_dir)
            .await
            .map_err(|e| {
                Error::Io(std::io::Error::new(
                    e.kind(),
                    format!(
                        "Failed to create content directory '{}': {}",
                        config.storage.content_dir.display(),
                        e
                    ),
                ))
            })?;

        let store = JobStore::new(&config.storage.database_path).await?;

        let dispatch = JobDispatch {
            pending: std::sync::Arc::new(tokio::sync::Mutex::new(
                std::collections::VecDeque::new(),
            )),
            slots: std::sync::Arc::new(tokio::sync::Semaphore::new(
                config.download.max_concurrent_jobs,
            )),
            active: std::sync::Arc::new(tokio::sync::Mutex::new(
                std::collections::HashMap::new(),
            )),
            accepting_new: std::sync::Arc::new(std::sync::atomic::AtomicBool::new(true)),
        };

        let downloader = Self {
            store: std::sync::Arc::new(store),
            transport,
            config: std::sync::Arc::new(config),
            fanout: SnapshotFanout::new(),
            tracker: std::sync::Arc::new(ProgressTracker::new()),
            dispatch,
        };

        // Pick up jobs persisted by a previous session
        downloader.restore_jobs().await?;

        Ok(downloader)
    }

    /// Subscribe to snapshot notifications
    ///
    /// Each notification carries a complete snapshot list of all tracked
    /// jobs. Multiple subscribers are supported; each receives notifications
    /// independently. Dropping the returned [`Subscription`] unsubscribes.
    pub fn subscribe(&self) -> Subscription {
        self.fanout.subscribe()
    }

    /// Get the current configuration
    pub fn get_config(&self) -> std::sync::Arc<Config> {
        std::sync::Arc::clone(&self.config)
    }

    /// Path where a job's content lives on disk
    pub(crate) fn content_path(&self, id: &str) -> PathBuf {
        self.config
            .storage
            .content_dir
            .join(content_file_name(id))
    }

    /// Read the full job index and broadcast it as one snapshot list
    ///
    /// Notification is best-effort: a store read failure here is logged and
    /// swallowed, since the durable state it reflects is already committed.
    pub(crate) async fn publish_snapshots(&self) {
        match self.store.list_jobs().await {
            Ok(records) => {
                let snapshots: Vec<_> = records.iter().map(|r| r.snapshot()).collect();
                self.fanout.publish(snapshots);
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read job index for notification");
            }
        }
    }

    /// Persist a store effect, retrying briefly before giving up
    ///
    /// State transitions must be durably recorded before they become
    /// observable, so store writes on those paths get a short retry budget
    /// rather than failing on the first busy error.
    pub(crate) async fn persist_with_retry<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        with_retry(&store_retry_config(), operation).await
    }
}

/// Retry policy for store writes that gate a state transition
///
/// Short and bounded: the caller is usually holding up a worker or a facade
/// call, so waiting minutes for the disk is worse than failing.
fn store_retry_config() -> RetryConfig {
    RetryConfig {
        max_attempts: 3,
        initial_delay: std::time::Duration::from_millis(50),
        max_delay: std::time::Duration::from_secs(1),
        backoff_multiplier: 2.0,
        jitter: true,
    }
}

/// Deterministic on-disk file name for a job's content
///
/// Combines a sanitized prefix of the id (for debuggability) with a
/// truncated SHA-256 of the full id (for uniqueness when ids collide after
/// sanitizing). The name is persisted implicitly as on-disk content, so the
/// hash must stay identical across builds and toolchains.
pub(crate) fn content_file_name(id: &str) -> String {
    use sha2::{Digest, Sha256};

    let prefix: String = id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .take(64)
        .collect();
    let prefix = if prefix.is_empty() {
        "j".to_string()
    } else {
        prefix
    };

    let digest = Sha256::digest(id.as_bytes());
    let suffix: String = digest[..8].iter().map(|b| format!("{:02x}", b)).collect();

    format!("{}-{}.media", prefix, suffix)
}
