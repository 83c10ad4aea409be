//! Tests for queueing, progress subscriptions, downloads and reclamation.

mod common;

use std::time::Duration;

use chrono::Utc;
use futures_util::StreamExt;

use common::{archive_entries, wait_until, TestHarness};
use mixtape::{JobEventKind, JobStatus, MixtapeError, QueueError, Reaper, ResolveError};

#[tokio::test]
async fn test_back_to_back_submission_is_queued() {
    let harness = TestHarness::new();
    let first = harness.add_playlist("https://music.test/a", "A", 2);
    harness.add_playlist("https://music.test/b", "B", 3);
    harness.transcoder.hold(&first[0]);
    let service = harness.service(harness.config().estimated_item_secs(45).build());

    let a = service.submit("https://music.test/a").await.unwrap();
    let b = service.submit("https://music.test/b").await.unwrap();
    assert_eq!(a.queue_position, 0);
    assert_eq!(a.status, JobStatus::Processing);
    assert_eq!(b.queue_position, 1);
    assert_eq!(b.status, JobStatus::Queued);

    let snapshot = service.status(&b.job_id).unwrap();
    assert_eq!(snapshot.queue_position, Some(1));
    assert_eq!(snapshot.estimated_wait_secs, Some(90));

    // Nothing changes while the active job is held, so polls agree
    assert_eq!(snapshot, service.status(&b.job_id).unwrap());

    service.cancel(&a.job_id).unwrap();
    let job_b = service.job(&b.job_id).unwrap();
    assert_eq!(job_b.wait_until_terminal().await, JobStatus::Completed);
    assert_eq!(service.status(&b.job_id).unwrap().completed, 3);

    let snapshot_a = service.status(&a.job_id).unwrap();
    assert_eq!(snapshot_a.status, JobStatus::Cancelled);
    assert!(!snapshot_a.zip_ready);
}

#[tokio::test]
async fn test_cancel_queued_job_never_runs() {
    let harness = TestHarness::new();
    let first = harness.add_playlist("https://music.test/a", "A", 1);
    let second = harness.add_playlist("https://music.test/b", "B", 2);
    harness.transcoder.hold(&first[0]);
    let service = harness.service(harness.config().build());

    let a = service.submit("https://music.test/a").await.unwrap();
    let b = service.submit("https://music.test/b").await.unwrap();

    let cancel = service.cancel(&b.job_id).unwrap();
    assert_eq!(cancel.status, JobStatus::Cancelled);
    let snapshot = service.status(&b.job_id).unwrap();
    assert_eq!(snapshot.status, JobStatus::Cancelled);
    assert_eq!(snapshot.queue_position, None);

    service.cancel(&a.job_id).unwrap();
    service
        .job(&a.job_id)
        .unwrap()
        .wait_until_terminal()
        .await;
    wait_until(|| service.queue().active_job().is_none()).await;

    let invoked = harness.transcoder.invocations();
    assert!(second.iter().all(|locator| !invoked.contains(locator)));
    assert!(!service.queue().layout().job_dir(&b.job_id).exists());
}

#[tokio::test]
async fn test_unknown_job_is_not_found() {
    let harness = TestHarness::new();
    let service = harness.service(harness.config().build());

    assert!(matches!(
        service.status("missing"),
        Err(QueueError::JobNotFound(_))
    ));
    assert!(matches!(
        service.cancel("missing"),
        Err(QueueError::JobNotFound(_))
    ));
    assert!(service.subscribe("missing").is_err());
}

#[tokio::test]
async fn test_unresolvable_playlist_becomes_error_job() {
    let harness = TestHarness::new();
    let service = harness.service(harness.config().build());

    let receipt = service.submit("https://music.test/unknown").await.unwrap();
    assert_eq!(receipt.status, JobStatus::Error);
    assert_eq!(receipt.total, 0);
    assert_eq!(receipt.queue_position, 0);

    let snapshot = service.status(&receipt.job_id).unwrap();
    assert_eq!(snapshot.status, JobStatus::Error);
    assert!(snapshot.error.unwrap().contains("no items"));
    assert!(!snapshot.zip_ready);
    assert_eq!(harness.transcoder.invocation_count(), 0);

    // Nothing was queued behind the rejected job
    assert!(service.queue().active_job().is_none());
    assert_eq!(service.queue().pending_len(), 0);
}

#[tokio::test]
async fn test_malformed_locator_creates_no_job() {
    let harness = TestHarness::new();
    let service = harness.service(harness.config().build());

    let err = service.submit("file:///etc/passwd").await.unwrap_err();
    assert!(matches!(
        err,
        MixtapeError::Resolve(ResolveError::UnsupportedLocator(_))
    ));
    assert!(service.queue().registry().is_empty());
}

#[tokio::test]
async fn test_download_checks_file_name() {
    let harness = TestHarness::new();
    harness.add_playlist("https://music.test/dl", "Summer: Hits?", 2);
    let service = harness.service(harness.config().build());

    let receipt = service.submit("https://music.test/dl").await.unwrap();
    service
        .job(&receipt.job_id)
        .unwrap()
        .wait_until_terminal()
        .await;

    let name = service.status(&receipt.job_id).unwrap().archive_name;
    assert_eq!(name, "Summer Hits.zip");

    let path = service.archive_for_download(&receipt.job_id, &name).unwrap();
    assert_eq!(archive_entries(&path).len(), 2);

    assert!(matches!(
        service.archive_for_download(&receipt.job_id, "other.zip"),
        Err(QueueError::ArchiveNotAvailable(_))
    ));
    assert!(matches!(
        service.archive_for_download("missing", &name),
        Err(QueueError::JobNotFound(_))
    ));
}

#[tokio::test]
async fn test_live_subscriber_sees_cancellation() {
    let harness = TestHarness::new();
    let locators = harness.add_playlist("https://music.test/live", "Live", 1);
    harness.transcoder.hold(&locators[0]);
    let service = harness.service(harness.config().build());

    let receipt = service.submit("https://music.test/live").await.unwrap();
    let (snapshot, events) = service.subscribe(&receipt.job_id).unwrap();
    assert_eq!(snapshot.status, JobStatus::Processing);

    wait_until(|| harness.transcoder.invocation_count() == 1).await;
    service.cancel(&receipt.job_id).unwrap();

    let events: Vec<_> = tokio::time::timeout(Duration::from_secs(5), events.collect::<Vec<_>>())
        .await
        .expect("stream did not end");
    let kinds: Vec<JobEventKind> = events.iter().map(|e| e.kind).collect();
    assert!(kinds.contains(&JobEventKind::ItemCancelled));
    assert_eq!(kinds.last(), Some(&JobEventKind::JobCancelled));
    assert!(events.iter().all(|e| e.job_id == receipt.job_id));
}

#[tokio::test]
async fn test_late_subscriber_gets_snapshot_and_empty_stream() {
    let harness = TestHarness::new();
    harness.add_playlist("https://music.test/late", "Late", 2);
    let service = harness.service(harness.config().build());

    let receipt = service.submit("https://music.test/late").await.unwrap();
    service
        .job(&receipt.job_id)
        .unwrap()
        .wait_until_terminal()
        .await;

    let (snapshot, mut events) = service.subscribe(&receipt.job_id).unwrap();
    assert_eq!(snapshot.status, JobStatus::Completed);
    assert!(snapshot.zip_ready);
    assert!(events.next().await.is_none());
}

#[tokio::test]
async fn test_reaper_removes_idle_jobs() {
    let harness = TestHarness::new();
    harness.add_playlist("https://music.test/a", "A", 1);
    let held = harness.add_playlist("https://music.test/b", "B", 1);
    let service = harness.service(harness.config().retention_secs(60).build());

    let done = service.submit("https://music.test/a").await.unwrap();
    service
        .job(&done.job_id)
        .unwrap()
        .wait_until_terminal()
        .await;
    wait_until(|| service.queue().active_job().is_none()).await;
    let job_dir = service.queue().layout().job_dir(&done.job_id);
    assert!(job_dir.exists());

    // Keep a second job active; the reaper must leave it alone
    harness.transcoder.hold(&held[0]);
    let active = service.submit("https://music.test/b").await.unwrap();

    let reaper = Reaper::new(
        service.queue().clone(),
        Duration::from_secs(60),
        Duration::from_secs(1),
    );
    assert_eq!(reaper.reap_once(Utc::now()).await, 0);

    let later = Utc::now() + chrono::Duration::seconds(120);
    assert_eq!(reaper.reap_once(later).await, 1);
    assert!(matches!(
        service.status(&done.job_id),
        Err(QueueError::JobNotFound(_))
    ));
    assert!(!job_dir.exists());
    assert!(service.status(&active.job_id).is_ok());

    service.cancel(&active.job_id).unwrap();
}

#[tokio::test]
async fn test_reaper_spares_watched_queued_job() {
    let harness = TestHarness::new();
    let first = harness.add_playlist("https://music.test/a", "A", 1);
    harness.add_playlist("https://music.test/b", "B", 1);
    harness.transcoder.hold(&first[0]);
    let service = harness.service(harness.config().retention_secs(60).build());

    let active = service.submit("https://music.test/a").await.unwrap();
    let queued = service.submit("https://music.test/b").await.unwrap();
    assert_eq!(queued.queue_position, 1);

    let (_, events) = service.subscribe(&queued.job_id).unwrap();
    let reaper = Reaper::new(
        service.queue().clone(),
        Duration::from_secs(60),
        Duration::from_secs(1),
    );

    let later = Utc::now() + chrono::Duration::seconds(120);
    assert_eq!(reaper.reap_once(later).await, 0);
    let snapshot = service.status(&queued.job_id).unwrap();
    assert_eq!(snapshot.status, JobStatus::Queued);

    // Once the subscriber goes away the job is idle again
    drop(events);
    let much_later = Utc::now() + chrono::Duration::seconds(240);
    assert_eq!(reaper.reap_once(much_later).await, 1);
    assert!(matches!(
        service.status(&queued.job_id),
        Err(QueueError::JobNotFound(_))
    ));

    service.cancel(&active.job_id).unwrap();
}
