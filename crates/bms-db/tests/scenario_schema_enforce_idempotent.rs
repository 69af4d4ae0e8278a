//! Schema enforcement against an empty SQLite file must converge on the
//! first run and be a no-op (no errors, no duplicates) on every run after.

mod common;

use bms_db::{DbError, SchemaState};

#[tokio::test]
async fn enforce_twice_is_idempotent() {
    let (_dir, db) = common::test_db().await;

    // First enforcement happened in the helper; the schema must validate.
    db.validate_schema().await.expect("schema valid after first enforce");

    // Second run: no SQL errors, nothing missing afterwards.
    db.enforce_schema().await.expect("second enforce");
    let missing = db.schema_report().await.expect("report");
    assert!(missing.is_empty(), "unexpected missing pieces: {missing:?}");
}

#[tokio::test]
async fn validate_reports_missing_tables_on_bare_store() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = bms_config::AppConfig::default();
    cfg.db.name = dir.path().join("bare.db").to_string_lossy().into_owned();
    let db = bms_db::Db::connect(&cfg).await.unwrap();

    let err = db.validate_schema().await.unwrap_err();
    match err {
        DbError::Schema(missing) => {
            assert!(missing.iter().any(|m| m == "table:accounts"));
            assert!(missing.iter().any(|m| m == "table:sync_history"));
        }
        other => panic!("expected SchemaError, got {other}"),
    }
}

#[tokio::test]
async fn drop_requires_explicit_force() {
    let (_dir, db) = common::test_db().await;

    let refused = db.drop_all_tables(&SchemaState::default()).await;
    assert!(refused.is_err(), "drop must refuse without force_drop");
    db.validate_schema().await.expect("still intact");

    db.drop_all_tables(&SchemaState { force_drop: true })
        .await
        .expect("forced drop");
    assert!(db.validate_schema().await.is_err(), "tables should be gone");
}
