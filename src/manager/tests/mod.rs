//! Manager behavior tests, organized by concern.

mod control;

use crate::manager::OfflineDownloader;
use crate::types::{JobState, stop_reason};

use crate::manager::content_file_name;

#[test]
fn content_file_name_is_stable_across_builds() {
    // Names are baked into on-disk content; this value must never change
    assert_eq!(content_file_name("abc"), "abc-ba7816bf8f01cfea.media");
}

#[test]
fn content_file_name_sanitizes_and_disambiguates() {
    let slashed = content_file_name("show/s01:e02");
    assert!(slashed.starts_with("show-s01-e02-"));
    assert!(slashed.ends_with(".media"));

    // Ids that collide after sanitizing still map to distinct files
    assert_ne!(content_file_name("show/s01:e02"), content_file_name("show-s01-e02"));

    // Fully non-filesystem-safe ids still get a readable prefix
    assert!(content_file_name("日本語").starts_with("---"));
    assert!(content_file_name("").starts_with("j-"));
}

/// Every stored job must satisfy `Paused ⇔ stop_reason != 0`
pub(crate) async fn assert_pause_reason_invariant(downloader: &OfflineDownloader) {
    let records = downloader.store.list_jobs().await.unwrap();
    for record in records {
        let paused = record.state() == JobState::Paused;
        let stopped = record.stop_reason != stop_reason::NONE;
        assert_eq!(
            paused, stopped,
            "job {} violates the pause/stop-reason invariant: state {:?}, stop_reason {}",
            record.id,
            record.state(),
            record.stop_reason
        );
    }
}
