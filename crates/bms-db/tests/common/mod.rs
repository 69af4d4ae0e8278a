use bms_config::AppConfig;
use bms_db::Db;
use tempfile::TempDir;

/// Fresh file-backed SQLite store with the full schema enforced.
/// The TempDir must outlive the Db or the file vanishes under the pool.
pub async fn test_db() -> (TempDir, Db) {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut cfg = AppConfig::default();
    cfg.db.name = dir
        .path()
        .join("test.db")
        .to_string_lossy()
        .into_owned();
    let db = Db::connect(&cfg).await.expect("connect sqlite");
    db.enforce_schema().await.expect("enforce schema");
    (dir, db)
}
