//! Push pipeline: malformed diffs fail without touching the network,
//! good diffs dispatch and complete, retriable failures go back to
//! pending within the attempt budget.

mod common;

use common::{count_of, harness, StubUpstream};
use bms_schemas::{ChangeStatus, ChangeType, EntityKind};
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn malformed_diff_fails_without_upstream_call() {
    let h = harness(StubUpstream::default()).await;

    h.db.insert_pending_change(EntityKind::Account, 1, ChangeType::Update, "{not-json")
        .await
        .unwrap();

    let stats = h.engine.push(&CancellationToken::new(), "manual").await.unwrap();
    assert_eq!(stats.processed, 1);
    assert!(stats.error_count >= 1);

    assert_eq!(h.upstream.patch_calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.upstream.raw_calls.load(Ordering::SeqCst), 0);

    assert!(h.bus.wait_for_drain(Duration::from_secs(5)).await);
    let events = h.events.lock().unwrap().clone();
    assert_eq!(count_of(&events, "push.item.start"), 1);
    assert_eq!(count_of(&events, "push.item.error"), 1);
    assert_eq!(count_of(&events, "push.complete"), 1);

    // The row is terminally failed: a second scan claims nothing.
    let again = h.db.claim_pending_changes(EntityKind::Account).await.unwrap();
    assert!(again.is_empty());
}

#[tokio::test]
async fn update_change_dispatches_patch_and_completes() {
    let h = harness(StubUpstream::default()).await;

    h.db.insert_pending_change(
        EntityKind::Account,
        7,
        ChangeType::Update,
        r#"{"full_name":"Renamed"}"#,
    )
    .await
    .unwrap();

    let stats = h.engine.push(&CancellationToken::new(), "manual").await.unwrap();
    assert_eq!(stats.processed, 1);
    assert_eq!(stats.error_count, 0);
    assert_eq!(h.upstream.patch_calls.load(Ordering::SeqCst), 1);

    assert!(h.bus.wait_for_drain(Duration::from_secs(5)).await);
    let events = h.events.lock().unwrap().clone();
    assert_eq!(count_of(&events, "push.item.success"), 1);
}

#[tokio::test]
async fn transient_failure_returns_to_pending_then_succeeds() {
    let stub = StubUpstream::default();
    stub.patch_failures_remaining.store(1, Ordering::SeqCst);
    let h = harness(stub).await;

    h.db.insert_pending_change(
        EntityKind::Account,
        9,
        ChangeType::Update,
        r#"{"notes":"call back"}"#,
    )
    .await
    .unwrap();

    // First run: transient 503, row returns to pending with one attempt.
    let first = h.engine.push(&CancellationToken::new(), "manual").await.unwrap();
    assert_eq!(first.error_count, 1);

    // Second run claims it again and the patch now succeeds.
    let second = h.engine.push(&CancellationToken::new(), "manual").await.unwrap();
    assert_eq!(second.processed, 1);
    assert_eq!(second.error_count, 0);
    assert_eq!(h.upstream.patch_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn attempts_exhausted_marks_failed() {
    let stub = StubUpstream::default();
    stub.patch_failures_remaining.store(100, Ordering::SeqCst);
    let h = harness(stub).await;

    h.db.insert_pending_change(EntityKind::Account, 4, ChangeType::Update, r#"{"a":1}"#)
        .await
        .unwrap();

    // Budget is 3 attempts; after three runs the row must be failed.
    for _ in 0..3 {
        h.engine.push(&CancellationToken::new(), "manual").await.unwrap();
    }
    let claimed = h.db.claim_pending_changes(EntityKind::Account).await.unwrap();
    assert!(claimed.is_empty(), "row should be terminally failed");
    assert_eq!(h.upstream.patch_calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn delete_change_uses_raw_delete() {
    let h = harness(StubUpstream::default()).await;

    h.db.insert_pending_change(EntityKind::Route, 12, ChangeType::Delete, "{}")
        .await
        .unwrap();

    let stats = h.engine.push(&CancellationToken::new(), "manual").await.unwrap();
    assert_eq!(stats.error_count, 0);
    assert_eq!(h.upstream.raw_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.upstream.patch_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn status_after_completion_is_terminal() {
    let h = harness(StubUpstream::default()).await;

    h.db.insert_pending_change(EntityKind::CheckIn, 2, ChangeType::Update, r#"{"x":1}"#)
        .await
        .unwrap();
    h.engine.push(&CancellationToken::new(), "manual").await.unwrap();

    let err = h
        .db
        .update_change_status(EntityKind::CheckIn, 1, ChangeStatus::Failed, 0, None)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("illegal status transition"));
}
