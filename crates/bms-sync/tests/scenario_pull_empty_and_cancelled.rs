//! Boundary behaviors: an empty id list short-circuits straight to
//! pull.complete with no fetch calls; a cancelled token ends the group
//! with a "cancelled" group error.

mod common;

use common::{count_of, harness, StubUpstream};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn empty_id_list_short_circuits() {
    let h = harness(StubUpstream::default()).await;

    let stats = h
        .engine
        .pull(
            bms_sync::PullGroup::Accounts,
            None,
            &CancellationToken::new(),
            "manual",
        )
        .await
        .unwrap();

    assert_eq!(stats.count, 0);
    assert_eq!(stats.error_count, 0);
    assert!(h.bus.wait_for_drain(Duration::from_secs(5)).await);

    let events = h.events.lock().unwrap().clone();
    assert_eq!(
        events,
        vec![
            "pull.start".to_string(),
            "pull.ids_fetched".to_string(),
            "pull.complete".to_string()
        ]
    );
    assert_eq!(
        h.upstream
            .detail_calls
            .load(std::sync::atomic::Ordering::SeqCst),
        0
    );
}

#[tokio::test]
async fn cancelled_token_ends_with_cancelled_group_error() {
    let stub = StubUpstream {
        account_ids: vec![1, 2, 3],
        ..Default::default()
    };
    let h = harness(stub).await;

    let cancel = CancellationToken::new();
    cancel.cancel();

    let stats = h
        .engine
        .pull(bms_sync::PullGroup::Accounts, None, &cancel, "manual")
        .await
        .unwrap();

    assert!(stats.cancelled);
    assert_eq!(stats.count, 0);
    assert!(h.bus.wait_for_drain(Duration::from_secs(5)).await);

    let events = h.events.lock().unwrap().clone();
    assert_eq!(count_of(&events, "pull.group.error"), 1);
    // Workers saw the cancel before any network call.
    assert_eq!(
        h.upstream
            .detail_calls
            .load(std::sync::atomic::Ordering::SeqCst),
        0
    );
}
