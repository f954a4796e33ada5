//! Configuration types for offline-dl

use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// Storage configuration (content directory and job store path)
///
/// Groups settings related to where downloaded content and the durable job
/// index live. Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding downloaded (and partial) content files
    /// (default: "./offline")
    #[serde(default = "default_content_dir")]
    pub content_dir: PathBuf,

    /// Path to the SQLite job store (default: "./offline/jobs.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            content_dir: default_content_dir(),
            database_path: default_database_path(),
        }
    }
}

/// Download engine configuration (concurrency, shutdown behavior)
///
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Maximum concurrent transfers (default: 3)
    ///
    /// A soft ceiling enforced at scheduling time only; running transfers
    /// are never pre-empted by newly queued jobs.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_jobs: usize,

    /// How long shutdown waits for in-flight workers to wind down
    /// (default: 10 seconds)
    #[serde(default = "default_shutdown_grace", with = "duration_serde")]
    pub shutdown_grace: Duration,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: default_max_concurrent(),
            shutdown_grace: default_shutdown_grace(),
        }
    }
}

/// Retry configuration for transient transfer failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (default: 5)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 60 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

/// Main configuration for [`OfflineDownloader`](crate::OfflineDownloader)
///
/// Fields are organized into logical sub-configs:
/// - [`storage`](StorageConfig) — content directory, job store path
/// - [`download`](DownloadConfig) — concurrency cap, shutdown grace
/// - [`retry`](RetryConfig) — transient-failure backoff policy
///
/// All sub-config fields are flattened so the JSON/TOML format stays flat
/// (no nesting).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Storage settings (content directory, job store path)
    #[serde(flatten)]
    pub storage: StorageConfig,

    /// Download engine settings (concurrency, shutdown)
    #[serde(flatten)]
    pub download: DownloadConfig,

    /// Retry/backoff settings for transient transfer failures
    #[serde(flatten)]
    pub retry: RetryConfig,
}

fn default_content_dir() -> PathBuf {
    PathBuf::from("./offline")
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./offline/jobs.db")
}

fn default_max_concurrent() -> usize {
    3
}

fn default_shutdown_grace() -> Duration {
    Duration::from_secs(10)
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_true() -> bool {
    true
}

/// Serialize Duration as whole seconds for config files
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}
