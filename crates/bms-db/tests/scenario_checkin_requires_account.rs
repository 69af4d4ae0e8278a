//! Check-ins must reference an existing account; orphans surface as
//! integrity errors instead of being silently dropped.

mod common;

use bms_schemas::{Account, CheckIn};
use chrono::{TimeZone, Utc};

fn checkin(id: i64, account_id: i64) -> CheckIn {
    CheckIn {
        id,
        crm_id: Some(format!("CHK-{id:03}")),
        account_id,
        log_datetime: Utc.with_ymd_and_hms(2025, 1, 5, 9, 45, 0).unwrap(),
        kind: Some("Visit".to_string()),
        comments: Some("left brochure".to_string()),
        extra_fields: Some(serde_json::json!({"weather": "rain"})),
        created_by: Some("alice@example.com".to_string()),
    }
}

#[tokio::test]
async fn orphan_checkin_is_an_integrity_error() {
    let (_dir, db) = common::test_db().await;

    let err = db.merge_checkin(&checkin(1001, 999)).await.unwrap_err();
    assert!(err.to_string().contains("missing account 999"));
}

#[tokio::test]
async fn checkin_merges_once_parent_exists() {
    let (_dir, db) = common::test_db().await;

    let parent = Account {
        id: 1,
        full_name: "Acme".to_string(),
        first_name: None,
        last_name: None,
        phone_number: None,
        email: None,
        original_address: None,
        crm_id: None,
        account_owner: None,
        notes: None,
        last_modified_date: None,
        follow_up_date: None,
        custom_numeric: vec![],
        custom_text: vec![],
        locations: vec![],
    };
    db.merge_account_basic(&parent).await.unwrap();

    db.merge_checkin(&checkin(1001, 1)).await.expect("merge");
    // Merging the same id again updates in place.
    let mut updated = checkin(1001, 1);
    updated.comments = Some("follow-up call".to_string());
    db.merge_checkin(&updated).await.expect("re-merge");
}
