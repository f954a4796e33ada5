//! Durable job store for offline-dl
//!
//! SQLite-backed persistence for job records. The store is the single source
//! of truth for job existence and state: every successful write is visible
//! to subsequent reads from any component, and the full index is loadable
//! before any control-facade call is served.
//!
//! ## Submodules
//!
//! Methods on [`JobStore`] are organized by domain:
//! - [`migrations`] — store lifecycle, schema migrations
//! - [`jobs`] — job record CRUD and guarded state transitions

use crate::error::Result;
use crate::types::{JobSnapshot, JobState, SourceLocator, percent_of};
use sqlx::{FromRow, sqlite::SqlitePool};

mod jobs;
mod migrations;

/// New job to be inserted into the store
#[derive(Debug, Clone)]
pub struct NewJob {
    /// Stable content identifier (primary key)
    pub id: String,
    /// Source URI/manifest reference and selected renditions
    pub locator: SourceLocator,
    /// Opaque application payload, stored verbatim
    pub metadata: serde_json::Value,
}

/// Job record from the store
#[derive(Debug, Clone, FromRow)]
pub struct JobRecord {
    /// Stable content identifier
    pub id: String,
    /// Source URI/manifest reference
    pub uri: String,
    /// Selected rendition keys, JSON-encoded
    pub stream_keys: String,
    /// Current state code (see [`JobState`])
    pub state: i32,
    /// 0 = not stopped, nonzero = application-supplied pause cause
    pub stop_reason: i32,
    /// Bytes transferred so far
    pub bytes_downloaded: i64,
    /// Total size in bytes (0 = unknown)
    pub content_length: i64,
    /// Opaque application payload, JSON-encoded
    pub metadata: String,
    /// Last fatal error description
    pub last_error: Option<String>,
    /// Unix timestamp when the job was created
    pub created_at: i64,
    /// Unix timestamp when the first transfer started
    pub started_at: Option<i64>,
    /// Unix timestamp when the job reached a terminal state
    pub completed_at: Option<i64>,
}

impl JobRecord {
    /// Decoded state
    pub fn state(&self) -> JobState {
        JobState::from_i32(self.state)
    }

    /// Decoded source locator
    pub fn locator(&self) -> Result<SourceLocator> {
        let stream_keys: Vec<String> = serde_json::from_str(&self.stream_keys)?;
        Ok(SourceLocator {
            uri: self.uri.clone(),
            stream_keys,
        })
    }

    /// Observable projection of this record
    ///
    /// Metadata that fails to parse degrades to JSON null rather than
    /// poisoning the whole snapshot list.
    pub fn snapshot(&self) -> JobSnapshot {
        let state = self.state();
        let bytes = self.bytes_downloaded.max(0) as u64;
        let total = self.content_length.max(0) as u64;
        JobSnapshot {
            id: self.id.clone(),
            state,
            percent: percent_of(state, bytes, total),
            bytes_downloaded: bytes,
            content_length: total,
            metadata: serde_json::from_str(&self.metadata)
                .unwrap_or(serde_json::Value::Null),
            last_error: self.last_error.clone(),
        }
    }
}

/// Durable job index handle
pub struct JobStore {
    pool: SqlitePool,
}
