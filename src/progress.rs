//! Per-job progress accounting with percent deduplication
//!
//! Workers report raw byte counts here; the tracker turns them into
//! whole-percent milestones and suppresses repeats, so a job emits at most
//! 101 progress notifications (0..=100) no matter how many chunks arrive.

use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Default, Clone, Copy)]
struct JobProgress {
    bytes: u64,
    total: u64,
    last_emitted_percent: Option<u32>,
}

/// Progress accountant shared by all workers
///
/// Interior mutability behind a plain mutex: updates are tiny and never
/// held across an await point.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    jobs: Mutex<HashMap<String, JobProgress>>,
}

impl ProgressTracker {
    /// Create an empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a job's counters, typically from a persisted record on resume
    ///
    /// Resets the dedup watermark so the first report after seeding emits.
    pub fn seed(&self, id: &str, bytes: u64, total: u64) {
        let mut jobs = lock(&self.jobs);
        jobs.insert(
            id.to_string(),
            JobProgress {
                bytes,
                total,
                last_emitted_percent: None,
            },
        );
    }

    /// Record a byte-count update for a job
    ///
    /// Returns `Some(percent)` only when the whole-percent value changed
    /// since the last emission; `None` means the update should stay silent.
    /// An unknown total (0) pins percent at 0, so at most one notification
    /// escapes until the total becomes known.
    pub fn on_bytes(&self, id: &str, bytes: u64, total: u64) -> Option<u32> {
        let mut jobs = lock(&self.jobs);
        let entry = jobs.entry(id.to_string()).or_default();
        entry.bytes = bytes;
        entry.total = total;

        let percent = whole_percent(bytes, total);
        if entry.last_emitted_percent == Some(percent) {
            return None;
        }
        entry.last_emitted_percent = Some(percent);
        Some(percent)
    }

    /// Current byte counters for a job, if tracked
    pub fn counters(&self, id: &str) -> Option<(u64, u64)> {
        let jobs = lock(&self.jobs);
        jobs.get(id).map(|p| (p.bytes, p.total))
    }

    /// Drop a job's tracking entry
    pub fn forget(&self, id: &str) {
        let mut jobs = lock(&self.jobs);
        jobs.remove(id);
    }
}

/// Rounded whole percent, clamped to 0..=100; unknown total reports 0
fn whole_percent(bytes: u64, total: u64) -> u32 {
    if total == 0 {
        return 0;
    }
    let pct = (bytes as f64 / total as f64) * 100.0;
    pct.round().clamp(0.0, 100.0) as u32
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    // Progress state is plain counters; a panic while holding the lock
    // leaves nothing torn, so poisoning is recoverable.
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
