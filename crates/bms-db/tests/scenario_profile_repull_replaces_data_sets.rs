//! A profile pulled twice keeps only the data sets of the last pull; the
//! delete + re-insert happens inside one transaction.

mod common;

use bms_schemas::{DataSet, DataSetValue, UserProfile};

fn data_set(name: &str, values: &[&str]) -> DataSet {
    DataSet {
        profile_id: 0,
        name: name.to_string(),
        label: Some(name.to_uppercase()),
        position: 0,
        has_data: !values.is_empty(),
        values: values
            .iter()
            .enumerate()
            .map(|(i, v)| DataSetValue {
                data_set_name: name.to_string(),
                value: v.to_string(),
                label: None,
                position: i as i32,
            })
            .collect(),
    }
}

fn profile(datas: Vec<DataSet>) -> UserProfile {
    UserProfile {
        id: 42,
        email: "rep@example.com".to_string(),
        first_name: Some("Ada".to_string()),
        last_name: None,
        is_manager: false,
        company: None,
        crm_type: None,
        datas,
    }
}

#[tokio::test]
async fn repull_replaces_data_sets_and_values() {
    let (_dir, db) = common::test_db().await;

    db.merge_profile(&profile(vec![
        data_set("account__custom_text_1", &["hot", "cold"]),
        data_set("account__custom_text_2", &["a"]),
    ]))
    .await
    .expect("first pull");

    assert_eq!(db.list_data_sets(42).await.unwrap().len(), 2);
    assert_eq!(db.list_data_set_values(42).await.unwrap().len(), 3);

    db.merge_profile(&profile(vec![data_set(
        "account__custom_text_3",
        &["only"],
    )]))
    .await
    .expect("second pull");

    let sets = db.list_data_sets(42).await.unwrap();
    assert_eq!(sets.len(), 1);
    assert_eq!(sets[0].str("name"), Some("account__custom_text_3"));

    let values = db.list_data_set_values(42).await.unwrap();
    assert_eq!(values.len(), 1);
    assert_eq!(values[0].str("value"), Some("only"));
}
