//! Core types for offline-dl

use serde::{Deserialize, Serialize};

/// Lifecycle state of a download job
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Waiting for a transfer slot
    Queued,
    /// A worker is actively transferring bytes
    Downloading,
    /// Stopped by the application; partial bytes retained
    Paused,
    /// All bytes received and durably recorded
    Completed,
    /// Terminal failure; see the job's last error
    Failed,
    /// Removal in progress; record and content are being reclaimed
    Removing,
}

impl JobState {
    /// Convert integer state code to JobState enum
    pub fn from_i32(state: i32) -> Self {
        match state {
            0 => JobState::Queued,
            1 => JobState::Downloading,
            2 => JobState::Paused,
            3 => JobState::Completed,
            4 => JobState::Failed,
            5 => JobState::Removing,
            _ => JobState::Failed, // Default to Failed for unknown state
        }
    }

    /// Convert JobState enum to integer state code
    pub fn to_i32(&self) -> i32 {
        match self {
            JobState::Queued => 0,
            JobState::Downloading => 1,
            JobState::Paused => 2,
            JobState::Completed => 3,
            JobState::Failed => 4,
            JobState::Removing => 5,
        }
    }

    /// Whether the job has reached an end state (Completed or Failed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

/// Well-known stop reason values
///
/// The stop reason distinguishes an application-initiated pause from a job
/// that simply has not started. Any nonzero value is a valid pause cause;
/// applications may supply their own codes via
/// [`pause_with_reason`](crate::OfflineDownloader::pause_with_reason).
pub mod stop_reason {
    /// Job is not stopped
    pub const NONE: i32 = 0;
    /// Paused by an explicit user action
    pub const USER: i32 = 1;
    /// Paused because the process shut down mid-transfer
    pub const SHUTDOWN: i32 = 2;
}

/// Source reference for a download job
///
/// Carries the manifest/URI reference plus the rendition keys selected for
/// offline fetch. The engine treats both as opaque; only the injected
/// [`Transport`](crate::Transport) interprets them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocator {
    /// URI or manifest reference for the content
    pub uri: String,

    /// Selected-quality stream keys (which renditions to fetch)
    #[serde(default)]
    pub stream_keys: Vec<String>,
}

impl SourceLocator {
    /// Create a locator with no rendition selection
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            stream_keys: Vec::new(),
        }
    }
}

/// Immutable point-in-time view of one job's observable fields
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobSnapshot {
    /// Stable content identifier
    pub id: String,

    /// Current state
    pub state: JobState,

    /// Progress percentage (0.0 to 100.0); 0.0 while the total is unknown,
    /// always 100.0 once Completed
    pub percent: f32,

    /// Bytes transferred so far
    pub bytes_downloaded: u64,

    /// Total size in bytes (0 = unknown)
    pub content_length: u64,

    /// Opaque application payload, returned verbatim
    pub metadata: serde_json::Value,

    /// Last fatal error description (present only in Failed)
    pub last_error: Option<String>,
}

/// Compute the observable percentage for a job
///
/// Defined as 100 for Completed jobs regardless of `content_length`;
/// indeterminate totals (0) report 0.
pub(crate) fn percent_of(state: JobState, bytes_downloaded: u64, content_length: u64) -> f32 {
    if state == JobState::Completed {
        return 100.0;
    }
    if content_length == 0 {
        return 0.0;
    }
    let pct = bytes_downloaded as f64 / content_length as f64 * 100.0;
    pct.clamp(0.0, 100.0) as f32
}

/// Aggregate statistics over all tracked jobs
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct JobStats {
    /// Total number of tracked jobs
    pub total: usize,

    /// Number of jobs waiting for a slot
    pub queued: usize,

    /// Number of jobs actively downloading
    pub downloading: usize,

    /// Number of paused jobs
    pub paused: usize,

    /// Number of completed jobs
    pub completed: usize,

    /// Number of failed jobs
    pub failed: usize,

    /// Number of jobs with removal in progress
    pub removing: usize,

    /// Sum of bytes downloaded across all jobs
    pub bytes_downloaded: u64,

    /// Sum of known content lengths across all jobs
    pub content_length: u64,
}
