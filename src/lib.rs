//! # offline-dl
//!
//! Backend library for offline media downloads in streaming applications.
//!
//! ## Design Philosophy
//!
//! offline-dl is designed to be:
//! - **Library-first** - No CLI or UI, purely a Rust crate for embedding
//! - **Durable** - Every state transition is persisted before it is observable
//! - **Transport-agnostic** - Bring your own byte-range source; the engine
//!   handles queueing, retry, resume, and bookkeeping
//! - **Snapshot-driven** - Subscribers receive complete immutable snapshot
//!   lists, never live mutable state
//!
//! ## Quick Start
//!
//! ```no_run
//! use offline_dl::{Config, OfflineDownloader, SourceLocator, Transport};
//! use std::sync::Arc;
//!
//! # fn make_transport() -> Arc<dyn Transport> { unimplemented!() }
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let transport: Arc<dyn Transport> = make_transport();
//!     let downloader = OfflineDownloader::new(Config::default(), transport).await?;
//!     let scheduler = downloader.start_scheduler();
//!
//!     // Watch progress
//!     let mut sub = downloader.subscribe();
//!     tokio::spawn(async move {
//!         while let Some(snapshots) = sub.recv().await {
//!             for job in snapshots.iter() {
//!                 println!("{}: {:?} {:.0}%", job.id, job.state, job.percent);
//!             }
//!         }
//!     });
//!
//!     downloader
//!         .start_download(
//!             "episode-101",
//!             SourceLocator::new("https://cdn.example.com/episode-101/manifest.mpd"),
//!             serde_json::json!({"title": "Pilot"}),
//!         )
//!         .await?;
//!
//!     downloader.shutdown().await;
//!     scheduler.abort();
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// Core download manager (decomposed into focused submodules)
pub mod manager;
/// Progress accounting with percent deduplication
pub mod progress;
/// Retry logic with exponential backoff
pub mod retry;
/// Durable job store
pub mod store;
/// Injected byte-range transport seam
pub mod transport;
/// Core types
pub mod types;

// Re-export commonly used types
pub use config::{Config, DownloadConfig, RetryConfig, StorageConfig};
pub use error::{Error, Result, StoreError, TransferError};
pub use manager::{OfflineDownloader, Subscription};
pub use store::{JobRecord, JobStore, NewJob};
pub use transport::{TransferStream, Transport};
pub use types::{JobSnapshot, JobState, JobStats, SourceLocator, stop_reason};

/// Block until the process is asked to stop, then shut the downloader down.
///
/// Shutdown pauses in-flight transfers with a shutdown stop reason, so the
/// next session's restore pass requeues them.
///
/// On Unix this watches SIGTERM and SIGINT; elsewhere it watches Ctrl+C.
pub async fn run_with_shutdown(downloader: OfflineDownloader) {
    wait_for_stop_request().await;
    downloader.shutdown().await;
}

#[cfg(unix)]
async fn wait_for_stop_request() {
    use tokio::signal::unix::{SignalKind, signal};

    // Handler registration can fail in sandboxed or containerized processes
    match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(mut term), Ok(mut int)) => {
            tokio::select! {
                _ = term.recv() => tracing::info!("SIGTERM received, shutting down"),
                _ = int.recv() => tracing::info!("SIGINT received, shutting down"),
            }
        }
        (Ok(mut term), Err(e)) => {
            tracing::warn!(error = %e, "SIGINT unavailable, watching SIGTERM only");
            term.recv().await;
            tracing::info!("SIGTERM received, shutting down");
        }
        (Err(e), Ok(mut int)) => {
            tracing::warn!(error = %e, "SIGTERM unavailable, watching SIGINT only");
            int.recv().await;
            tracing::info!("SIGINT received, shutting down");
        }
        (Err(e), Err(_)) => {
            tracing::warn!(error = %e, "Unix signals unavailable, falling back to ctrl_c");
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_stop_request() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Ctrl+C listener failed");
    } else {
        tracing::info!("Ctrl+C received, shutting down");
    }
}
