//! Control facade tests
//!
//! These run without the scheduler unless dispatch behavior is the point,
//! so jobs stay exactly where the facade puts them.

use super::assert_pause_reason_invariant;
use crate::error::Error;
use crate::manager::test_helpers::{FakeTransport, JobScript, test_downloader, wait_for_state, wait_until};
use crate::types::{JobState, SourceLocator, stop_reason};
use std::time::Duration;

fn locator(uri: &str) -> SourceLocator {
    SourceLocator {
        uri: uri.to_string(),
        stream_keys: vec!["video-720p".into()],
    }
}

#[tokio::test]
async fn start_creates_queued_job_with_metadata() {
    let transport = FakeTransport::new();
    let (dl, _dir) = test_downloader(transport, 3).await;

    dl.start_download("ep-1", locator("hls://ep-1"), serde_json::json!({"title": "Pilot"}))
        .await
        .unwrap();

    let snapshot = dl.status("ep-1").await.unwrap();
    assert_eq!(snapshot.state, JobState::Queued);
    assert_eq!(snapshot.percent, 0.0);
    assert_eq!(snapshot.metadata["title"], "Pilot");
}

#[tokio::test]
async fn start_notifies_subscribers_with_full_snapshot_list() {
    let transport = FakeTransport::new();
    let (dl, _dir) = test_downloader(transport, 3).await;
    let mut sub = dl.subscribe();

    dl.start_download("ep-1", locator("hls://ep-1"), serde_json::Value::Null)
        .await
        .unwrap();
    dl.start_download("ep-2", locator("hls://ep-2"), serde_json::Value::Null)
        .await
        .unwrap();

    // First notification lists one job, second lists both
    let first = sub.recv().await.unwrap();
    assert_eq!(first.len(), 1);
    let second = sub.recv().await.unwrap();
    assert_eq!(second.len(), 2);
}

#[tokio::test]
async fn duplicate_start_fails_and_leaves_record_unmodified() {
    let transport = FakeTransport::new();
    let (dl, _dir) = test_downloader(transport, 3).await;

    dl.start_download("ep-1", locator("hls://ep-1"), serde_json::json!({"v": 1}))
        .await
        .unwrap();

    let err = dl
        .start_download("ep-1", locator("hls://other"), serde_json::json!({"v": 2}))
        .await;
    match err {
        Err(Error::AlreadyExists { id, state }) => {
            assert_eq!(id, "ep-1");
            assert_eq!(state, JobState::Queued);
        }
        other => panic!("expected AlreadyExists, got {other:?}"),
    }

    // The losing call must not have touched the winner's record
    let snapshot = dl.status("ep-1").await.unwrap();
    assert_eq!(snapshot.metadata["v"], 1);
    assert_eq!(snapshot.state, JobState::Queued);
}

#[tokio::test]
async fn start_replaces_a_failed_job() {
    let transport = FakeTransport::new();
    transport.script("hls://bad", JobScript::new("x").permanent("manifest 404"));
    transport.script("hls://good", JobScript::new("fresh content"));
    let (dl, _dir) = test_downloader(transport.clone(), 3).await;
    let scheduler = dl.start_scheduler();

    dl.start_download("ep-1", locator("hls://bad"), serde_json::Value::Null)
        .await
        .unwrap();
    wait_for_state(&dl, "ep-1", JobState::Failed).await;

    // Same id, new source: the failed attempt is discarded
    dl.start_download("ep-1", locator("hls://good"), serde_json::Value::Null)
        .await
        .unwrap();
    wait_for_state(&dl, "ep-1", JobState::Completed).await;

    let snapshot = dl.status("ep-1").await.unwrap();
    assert!(snapshot.last_error.is_none(), "fresh job must carry no stale error");

    dl.shutdown().await;
    scheduler.abort();
}

#[tokio::test]
async fn pause_and_resume_queued_job_round_trips_state() {
    let transport = FakeTransport::new();
    let (dl, _dir) = test_downloader(transport, 3).await;

    dl.start_download("ep-1", locator("hls://ep-1"), serde_json::Value::Null)
        .await
        .unwrap();

    dl.pause("ep-1").await.unwrap();
    let record = dl.store.get_job("ep-1").await.unwrap().unwrap();
    assert_eq!(record.state(), JobState::Paused);
    assert_eq!(record.stop_reason, stop_reason::USER);
    assert_pause_reason_invariant(&dl).await;

    dl.resume("ep-1").await.unwrap();
    let record = dl.store.get_job("ep-1").await.unwrap().unwrap();
    assert_eq!(record.state(), JobState::Queued);
    assert_eq!(record.stop_reason, stop_reason::NONE);
    assert_pause_reason_invariant(&dl).await;
}

#[tokio::test]
async fn pause_records_custom_application_reason() {
    let transport = FakeTransport::new();
    let (dl, _dir) = test_downloader(transport, 3).await;

    dl.start_download("ep-1", locator("hls://ep-1"), serde_json::Value::Null)
        .await
        .unwrap();

    const CELLULAR_DATA_CAP: i32 = 42;
    dl.pause_with_reason("ep-1", CELLULAR_DATA_CAP).await.unwrap();

    let record = dl.store.get_job("ep-1").await.unwrap().unwrap();
    assert_eq!(record.stop_reason, CELLULAR_DATA_CAP);
}

#[tokio::test]
async fn zero_pause_reason_is_coerced_to_user() {
    let transport = FakeTransport::new();
    let (dl, _dir) = test_downloader(transport, 3).await;

    dl.start_download("ep-1", locator("hls://ep-1"), serde_json::Value::Null)
        .await
        .unwrap();
    dl.pause_with_reason("ep-1", stop_reason::NONE).await.unwrap();

    let record = dl.store.get_job("ep-1").await.unwrap().unwrap();
    assert_eq!(record.state(), JobState::Paused);
    assert_eq!(record.stop_reason, stop_reason::USER);
    assert_pause_reason_invariant(&dl).await;
}

#[tokio::test]
async fn pause_and_resume_are_noops_in_inapplicable_states() {
    let transport = FakeTransport::new();
    transport.script("hls://ep-1", JobScript::new("tiny"));
    let (dl, _dir) = test_downloader(transport, 3).await;
    let scheduler = dl.start_scheduler();

    dl.start_download("ep-1", locator("hls://ep-1"), serde_json::Value::Null)
        .await
        .unwrap();
    wait_for_state(&dl, "ep-1", JobState::Completed).await;

    // Neither call may error or disturb the completed job
    dl.pause("ep-1").await.unwrap();
    dl.resume("ep-1").await.unwrap();
    assert_eq!(dl.status("ep-1").await.unwrap().state, JobState::Completed);

    dl.shutdown().await;
    scheduler.abort();
}

#[tokio::test]
async fn operations_on_unknown_ids_return_not_found() {
    let transport = FakeTransport::new();
    let (dl, _dir) = test_downloader(transport, 3).await;

    assert!(matches!(dl.pause("ghost").await, Err(Error::NotFound(_))));
    assert!(matches!(dl.resume("ghost").await, Err(Error::NotFound(_))));
    assert!(matches!(dl.status("ghost").await, Err(Error::NotFound(_))));
    assert!(matches!(dl.retry_failed("ghost").await, Err(Error::NotFound(_))));
}

#[tokio::test]
async fn remove_unknown_id_is_a_noop() {
    let transport = FakeTransport::new();
    let (dl, _dir) = test_downloader(transport, 3).await;

    dl.start_download("ep-1", locator("hls://ep-1"), serde_json::Value::Null)
        .await
        .unwrap();

    // Removing an untracked id succeeds without disturbing tracked jobs
    dl.remove("ghost").await.unwrap();
    dl.remove("ghost").await.unwrap();

    let snapshots = dl.list().await.unwrap();
    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0].id, "ep-1");
    assert_eq!(snapshots[0].state, JobState::Queued);
}

#[tokio::test]
async fn retry_failed_requeues_in_place() {
    let transport = FakeTransport::new();
    transport.script("hls://ep-1", JobScript::new("x").permanent("manifest 404"));
    let (dl, _dir) = test_downloader(transport.clone(), 3).await;
    let scheduler = dl.start_scheduler();

    dl.start_download("ep-1", locator("hls://ep-1"), serde_json::json!({"keep": true}))
        .await
        .unwrap();
    wait_for_state(&dl, "ep-1", JobState::Failed).await;
    assert!(dl.status("ep-1").await.unwrap().last_error.is_some());

    // Source recovers
    transport.script("hls://ep-1", JobScript::new("recovered content"));
    dl.retry_failed("ep-1").await.unwrap();
    wait_for_state(&dl, "ep-1", JobState::Completed).await;

    let snapshot = dl.status("ep-1").await.unwrap();
    assert!(snapshot.last_error.is_none(), "requeue must clear the recorded error");
    assert_eq!(snapshot.metadata["keep"], true, "record survives in place");

    dl.shutdown().await;
    scheduler.abort();
}

#[tokio::test]
async fn remove_queued_job_deletes_record() {
    let transport = FakeTransport::new();
    let (dl, _dir) = test_downloader(transport, 3).await;

    dl.start_download("ep-1", locator("hls://ep-1"), serde_json::Value::Null)
        .await
        .unwrap();
    dl.remove("ep-1").await.unwrap();

    let gone = wait_until(Duration::from_secs(5), || async {
        matches!(dl.status("ep-1").await, Err(Error::NotFound(_)))
    })
    .await;
    assert!(gone, "removed job must disappear from the index");
}

#[tokio::test]
async fn removed_id_can_be_reused() {
    let transport = FakeTransport::new();
    transport.script("hls://ep-1b", JobScript::new("second life"));
    let (dl, _dir) = test_downloader(transport, 3).await;

    dl.start_download("ep-1", locator("hls://ep-1"), serde_json::Value::Null)
        .await
        .unwrap();
    dl.remove("ep-1").await.unwrap();
    wait_until(Duration::from_secs(5), || async {
        matches!(dl.status("ep-1").await, Err(Error::NotFound(_)))
    })
    .await;

    let scheduler = dl.start_scheduler();
    dl.start_download("ep-1", locator("hls://ep-1b"), serde_json::Value::Null)
        .await
        .unwrap();
    wait_for_state(&dl, "ep-1", JobState::Completed).await;

    dl.shutdown().await;
    scheduler.abort();
}

#[tokio::test]
async fn stats_aggregate_counts_and_bytes() {
    let transport = FakeTransport::new();
    transport.script("hls://done", JobScript::new("0123456789"));
    // Slow, length-less script so pausing it racing the scheduler is benign
    transport.script(
        "hls://slow",
        JobScript::new(vec![0u8; 100])
            .slow(Duration::from_secs(60))
            .without_length(),
    );
    let (dl, _dir) = test_downloader(transport, 3).await;
    let scheduler = dl.start_scheduler();

    dl.start_download("done", locator("hls://done"), serde_json::Value::Null)
        .await
        .unwrap();
    wait_for_state(&dl, "done", JobState::Completed).await;

    dl.start_download("waiting", locator("hls://slow"), serde_json::Value::Null)
        .await
        .unwrap();
    dl.pause("waiting").await.unwrap();
    wait_for_state(&dl, "waiting", JobState::Paused).await;

    let stats = dl.stats().await.unwrap();
    assert_eq!(stats.total, 2);
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.paused, 1);
    assert_eq!(stats.bytes_downloaded, 10);
    assert_eq!(stats.content_length, 10);

    dl.shutdown().await;
    scheduler.abort();
}

#[tokio::test]
async fn pause_all_and_resume_all_sweep_eligible_jobs() {
    let transport = FakeTransport::new();
    let (dl, _dir) = test_downloader(transport, 3).await;

    for id in ["a", "b", "c"] {
        dl.start_download(id, locator(&format!("hls://{id}")), serde_json::Value::Null)
            .await
            .unwrap();
    }

    dl.pause_all(stop_reason::SHUTDOWN).await.unwrap();
    let stats = dl.stats().await.unwrap();
    assert_eq!(stats.paused, 3);
    assert_pause_reason_invariant(&dl).await;

    dl.resume_all().await.unwrap();
    let stats = dl.stats().await.unwrap();
    assert_eq!(stats.queued, 3);
    assert_pause_reason_invariant(&dl).await;
}
