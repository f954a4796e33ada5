//! Error types for offline-dl
//!
//! The taxonomy mirrors what callers can observe: `NotFound` and
//! `AlreadyExists` are ordinary control-facade results, transfer errors are
//! split into transient (absorbed by the engine's retry loop) and permanent
//! (surfaced as a Failed job), and store errors mean an effect could not be
//! durably recorded.

use crate::types::JobState;
use thiserror::Error;

/// Result type alias for offline-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for offline-dl
#[derive(Debug, Error)]
pub enum Error {
    /// Job store persistence failed
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Transfer failed (transient or permanent)
    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),

    /// Operation referenced a job id with no record
    #[error("job not found: {0}")]
    NotFound(String),

    /// Start was called while a live job with the same id exists
    #[error("job {id} already exists in state {state:?}")]
    AlreadyExists {
        /// The content id that already has a live record
        id: String,
        /// The state of the existing record
        state: JobState,
    },

    /// I/O error while touching on-disk content
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error (locator or metadata payload)
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Shutdown in progress - not accepting new jobs
    #[error("shutdown in progress: not accepting new jobs")]
    ShuttingDown,
}

/// Job store persistence errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// Failed to open the store
    #[error("failed to open job store: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),
}

/// Transfer errors reported by the injected transport
///
/// The transport tags each failure so the engine knows whether to retry:
/// transient errors (timeouts, connection resets) are retried against the
/// configured budget, permanent errors (missing content, auth failures) move
/// the job to Failed without consuming it.
#[derive(Debug, Clone, Error)]
pub enum TransferError {
    /// Failure expected to succeed on retry without user intervention
    #[error("transient transfer error: {0}")]
    Transient(String),

    /// Failure that cannot succeed on retry without external change
    #[error("permanent transfer error: {0}")]
    Permanent(String),
}

impl TransferError {
    /// Whether the engine should retry this failure
    pub fn is_transient(&self) -> bool {
        matches!(self, TransferError::Transient(_))
    }
}
