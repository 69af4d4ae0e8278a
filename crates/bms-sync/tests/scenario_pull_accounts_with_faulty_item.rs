//! Pulling accounts where one detail fetch fails: the batch finishes,
//! the error is counted and reported per-item, and the store gains only
//! the healthy rows.

mod common;

use common::{count_of, harness, StubUpstream};
use std::collections::HashSet;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn faulty_item_is_counted_not_fatal() {
    let stub = StubUpstream {
        account_ids: vec![1, 2, 3],
        fail_accounts: HashSet::from([2]),
        ..Default::default()
    };
    let h = harness(stub).await;

    // The decoded detail must ride on fetch_detail.success.
    let details = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = std::sync::Arc::clone(&details);
    h.bus.subscribe(
        "pull.fetch_detail.success",
        std::sync::Arc::new(move |ev: bms_events::Event| {
            let sink = std::sync::Arc::clone(&sink);
            Box::pin(async move {
                sink.lock().unwrap().push(ev.payload);
            })
        }),
    );

    let stats = h
        .engine
        .pull(
            bms_sync::PullGroup::Accounts,
            None,
            &CancellationToken::new(),
            "manual",
        )
        .await
        .expect("batch itself succeeds");

    assert_eq!(stats.count, 2);
    assert_eq!(stats.error_count, 1);
    assert!(h.bus.wait_for_drain(Duration::from_secs(5)).await);

    let events = h.events.lock().unwrap().clone();
    assert_eq!(count_of(&events, "pull.start"), 1);
    assert_eq!(count_of(&events, "pull.ids_fetched"), 1);
    assert_eq!(count_of(&events, "pull.fetch_detail.start"), 3);
    assert_eq!(count_of(&events, "pull.fetch_detail.success"), 2);
    assert_eq!(count_of(&events, "pull.store.success"), 2);
    assert_eq!(count_of(&events, "pull.error"), 1);
    assert_eq!(count_of(&events, "pull.group.complete"), 1);
    assert_eq!(count_of(&events, "pull.group.error"), 0);

    // With a single worker the stage order is deterministic.
    assert_eq!(events[0], "pull.start");
    assert_eq!(events[1], "pull.ids_fetched");

    assert!(h.db.account_exists(1).await.unwrap());
    assert!(!h.db.account_exists(2).await.unwrap());
    assert!(h.db.account_exists(3).await.unwrap());

    let details = details.lock().unwrap();
    assert_eq!(details.len(), 2);
    for payload in details.iter() {
        assert!(payload["id"].is_i64());
        assert!(
            payload["data"]["full_name"].is_string(),
            "fetch_detail.success must carry the decoded record: {payload}"
        );
    }
}

#[tokio::test]
async fn all_items_failing_raises_group_error() {
    let stub = StubUpstream {
        account_ids: vec![1, 2],
        fail_accounts: HashSet::from([1, 2]),
        ..Default::default()
    };
    let h = harness(stub).await;

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
    assert_eq!(stats.error_count, 2);
    assert!(h.bus.wait_for_drain(Duration::from_secs(5)).await);

    let events = h.events.lock().unwrap().clone();
    assert_eq!(count_of(&events, "pull.group.error"), 1);
}

#[tokio::test]
async fn top_truncates_the_id_list() {
    let stub = StubUpstream {
        account_ids: vec![1, 2, 3, 4, 5],
        ..Default::default()
    };
    let h = harness(stub).await;

    let stats = h
        .engine
        .pull(
            bms_sync::PullGroup::Accounts,
            Some(2),
            &CancellationToken::new(),
            "manual",
        )
        .await
        .unwrap();

    assert_eq!(stats.count, 2);
    assert_eq!(
        h.upstream
            .detail_calls
            .load(std::sync::atomic::Ordering::SeqCst),
        2
    );
}
