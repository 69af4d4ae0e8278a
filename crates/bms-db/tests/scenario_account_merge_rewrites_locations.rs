//! Re-pulling an account must leave exactly the locations of the last
//! pull — child rows are rewritten, never accumulated.

mod common;

use bms_schemas::{Account, AccountLocation};

fn location(addr: &str) -> AccountLocation {
    AccountLocation {
        account_id: 0,
        position: 0,
        name: None,
        address_line_1: addr.to_string(),
        city: Some("Springfield".to_string()),
        state: None,
        zipcode: None,
        lat: Some(44.05),
        long: Some(-123.09),
    }
}

fn account(id: i64, name: &str, locations: Vec<AccountLocation>) -> Account {
    Account {
        id,
        full_name: name.to_string(),
        first_name: None,
        last_name: None,
        phone_number: Some("555-0100".to_string()),
        email: None,
        original_address: Some("1 Main St".to_string()),
        crm_id: Some("CRM-1".to_string()),
        account_owner: None,
        notes: None,
        last_modified_date: None,
        follow_up_date: None,
        custom_numeric: vec![Some(1.5)],
        custom_text: vec![Some("alpha".to_string())],
        locations,
    }
}

#[tokio::test]
async fn second_merge_replaces_location_set() {
    let (_dir, db) = common::test_db().await;

    let first = account(1, "Acme Corp", vec![location("1 Main St"), location("2 Side St")]);
    db.merge_account(&first).await.expect("first merge");
    assert_eq!(db.list_account_locations(1).await.unwrap().len(), 2);

    let second = account(1, "Acme Corporation", vec![location("9 New Rd")]);
    db.merge_account(&second).await.expect("second merge");

    let rows = db.list_account_locations(1).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].str("address_line_1"), Some("9 New Rd"));

    // The parent row was updated in place, not duplicated.
    let found = db.search_accounts("%Acme%").await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].full_name, "Acme Corporation");
}

#[tokio::test]
async fn basic_then_detailed_merge_converge_on_one_row() {
    let (_dir, db) = common::test_db().await;

    let a = account(7, "Basic Name", vec![]);
    db.merge_account_basic(&a).await.expect("basic merge");
    db.merge_account(&account(7, "Detailed Name", vec![location("X")]))
        .await
        .expect("detailed merge");

    let found = db.search_accounts("%Name%").await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, 7);
    assert_eq!(found[0].full_name, "Detailed Name");
}
