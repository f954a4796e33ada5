//! Shared helpers for manager tests.
//!
//! `FakeTransport` plays back per-URI scripts (flaky opens, permanent
//! failures, mid-stream drops, slow chunks) so tests can drive the engine
//! through every outcome without a network.

use crate::config::{Config, DownloadConfig, RetryConfig, StorageConfig};
use crate::error::TransferError;
use crate::transport::{Transport, TransferStream};
use crate::types::SourceLocator;

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;

use super::OfflineDownloader;

/// Scripted behavior for one URI
#[derive(Clone)]
pub(crate) struct JobScript {
    pub(crate) content: Bytes,
    pub(crate) chunk_size: usize,
    /// Number of opens that fail transiently before one succeeds
    pub(crate) failures_before_success: u32,
    /// If set, every open fails permanently with this message
    pub(crate) permanent_failure: Option<String>,
    /// On the first open only, fail transiently after this many chunks
    pub(crate) fail_after_chunks: Option<usize>,
    /// Delay before each chunk (keeps transfers alive for cancellation tests)
    pub(crate) chunk_delay: Duration,
    /// Whether the source honors byte-range resume
    pub(crate) supports_range: bool,
    /// Whether the source reports a content length
    pub(crate) report_length: bool,
    /// Reported length override (defaults to the actual content length)
    pub(crate) declared_length: Option<u64>,
}

impl JobScript {
    pub(crate) fn new(content: impl Into<Bytes>) -> Self {
        Self {
            content: content.into(),
            chunk_size: 16,
            failures_before_success: 0,
            permanent_failure: None,
            fail_after_chunks: None,
            chunk_delay: Duration::ZERO,
            supports_range: true,
            report_length: true,
            declared_length: None,
        }
    }

    pub(crate) fn chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size;
        self
    }

    pub(crate) fn flaky_opens(mut self, failures: u32) -> Self {
        self.failures_before_success = failures;
        self
    }

    pub(crate) fn permanent(mut self, message: &str) -> Self {
        self.permanent_failure = Some(message.to_string());
        self
    }

    pub(crate) fn drop_after_chunks(mut self, chunks: usize) -> Self {
        self.fail_after_chunks = Some(chunks);
        self
    }

    pub(crate) fn slow(mut self, delay: Duration) -> Self {
        self.chunk_delay = delay;
        self
    }

    pub(crate) fn without_range_support(mut self) -> Self {
        self.supports_range = false;
        self
    }

    pub(crate) fn without_length(mut self) -> Self {
        self.report_length = false;
        self
    }

    /// Lie about the total so the stream ends before delivering it
    pub(crate) fn declaring_length(mut self, length: u64) -> Self {
        self.declared_length = Some(length);
        self
    }
}

/// Scripted transport playing back [`JobScript`]s by URI
#[derive(Default)]
pub(crate) struct FakeTransport {
    scripts: std::sync::Mutex<HashMap<String, JobScript>>,
    opens: std::sync::Mutex<HashMap<String, u32>>,
    range_requests: std::sync::Mutex<HashMap<String, Vec<u64>>>,
    live_streams: Arc<AtomicUsize>,
    max_live_streams: Arc<AtomicUsize>,
}

impl FakeTransport {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn script(&self, uri: &str, script: JobScript) {
        self.scripts
            .lock()
            .unwrap()
            .insert(uri.to_string(), script);
    }

    /// How many times `open` was called for this URI
    pub(crate) fn open_count(&self, uri: &str) -> u32 {
        self.opens.lock().unwrap().get(uri).copied().unwrap_or(0)
    }

    /// Highest number of simultaneously open streams observed
    pub(crate) fn max_concurrent_streams(&self) -> usize {
        self.max_live_streams.load(Ordering::SeqCst)
    }

    /// The `range_start` requested by each open for this URI, in order
    pub(crate) fn range_requests(&self, uri: &str) -> Vec<u64> {
        self.range_requests
            .lock()
            .unwrap()
            .get(uri)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn open(
        &self,
        locator: &SourceLocator,
        range_start: u64,
    ) -> Result<Box<dyn TransferStream>, TransferError> {
        let script = self
            .scripts
            .lock()
            .unwrap()
            .get(&locator.uri)
            .cloned()
            .ok_or_else(|| TransferError::Permanent(format!("no script for {}", locator.uri)))?;

        self.range_requests
            .lock()
            .unwrap()
            .entry(locator.uri.clone())
            .or_default()
            .push(range_start);

        let prior_opens = {
            let mut opens = self.opens.lock().unwrap();
            let count = opens.entry(locator.uri.clone()).or_insert(0);
            let prior = *count;
            *count += 1;
            prior
        };

        if let Some(message) = script.permanent_failure {
            return Err(TransferError::Permanent(message));
        }
        if prior_opens < script.failures_before_success {
            return Err(TransferError::Transient("scripted open failure".into()));
        }

        let granted = if script.supports_range { range_start } else { 0 };
        let total = if script.report_length {
            Some(
                script
                    .declared_length
                    .unwrap_or(script.content.len() as u64),
            )
        } else {
            None
        };

        let live = self.live_streams.clone();
        let current = live.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_live_streams.fetch_max(current, Ordering::SeqCst);

        Ok(Box::new(FakeStream {
            content: script.content,
            cursor: granted as usize,
            chunk_size: script.chunk_size.max(1),
            resume_offset: granted,
            total,
            chunks_emitted: 0,
            fail_after_chunks: if prior_opens == 0 {
                script.fail_after_chunks
            } else {
                None
            },
            chunk_delay: script.chunk_delay,
            live,
        }))
    }
}

struct FakeStream {
    content: Bytes,
    cursor: usize,
    chunk_size: usize,
    resume_offset: u64,
    total: Option<u64>,
    chunks_emitted: usize,
    fail_after_chunks: Option<usize>,
    chunk_delay: Duration,
    live: Arc<AtomicUsize>,
}

impl Drop for FakeStream {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl TransferStream for FakeStream {
    fn resume_offset(&self) -> u64 {
        self.resume_offset
    }

    fn content_length(&self) -> Option<u64> {
        self.total
    }

    async fn next_chunk(&mut self) -> Result<Option<Bytes>, TransferError> {
        if let Some(after) = self.fail_after_chunks {
            if self.chunks_emitted >= after {
                return Err(TransferError::Transient("scripted mid-stream drop".into()));
            }
        }
        if !self.chunk_delay.is_zero() {
            tokio::time::sleep(self.chunk_delay).await;
        }
        if self.cursor >= self.content.len() {
            return Ok(None);
        }

        let end = (self.cursor + self.chunk_size).min(self.content.len());
        let chunk = self.content.slice(self.cursor..end);
        self.cursor = end;
        self.chunks_emitted += 1;
        Ok(Some(chunk))
    }
}

/// Build a downloader over a tempdir with fast test-friendly retry timings
pub(crate) async fn test_downloader(
    transport: Arc<FakeTransport>,
    max_concurrent: usize,
) -> (OfflineDownloader, TempDir) {
    let dir = tempfile::tempdir().expect("Failed to create temp directory");
    let config = Config {
        storage: StorageConfig {
            content_dir: dir.path().join("content"),
            database_path: dir.path().join("jobs.db"),
        },
        download: DownloadConfig {
            max_concurrent_jobs: max_concurrent,
            shutdown_grace: Duration::from_secs(5),
        },
        retry: RetryConfig {
            max_attempts: 5,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            backoff_multiplier: 2.0,
            jitter: false,
        },
    };

    let downloader = OfflineDownloader::new(config, transport)
        .await
        .expect("Failed to create test downloader");
    (downloader, dir)
}

/// Poll `cond` every 10ms until it returns true or `timeout` elapses
pub(crate) async fn wait_until<F, Fut>(timeout: Duration, mut cond: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if cond().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Wait until a job reaches `state`; panics with the actual state on timeout
pub(crate) async fn wait_for_state(
    downloader: &OfflineDownloader,
    id: &str,
    state: crate::types::JobState,
) {
    let reached = wait_until(Duration::from_secs(5), || async {
        matches!(downloader.status(id).await, Ok(s) if s.state == state)
    })
    .await;

    if !reached {
        let actual = downloader.status(id).await.map(|s| s.state);
        panic!("job {id} never reached {state:?}, last seen {actual:?}");
    }
}
