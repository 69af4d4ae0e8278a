use crate::dialect::Dialect;
use crate::error::DbError;
use include_dir::{include_dir, Dir};
use std::collections::BTreeSet;

/// The per-dialect SQL bundle, embedded at compile time. One file per
/// named command under `sql/<dialect>/<command>.sql`.
static SQL_ASSETS: Dir<'static> = include_dir!("$CARGO_MANIFEST_DIR/sql");

/// Commands that must exist in every dialect's bundle. Checked at startup
/// by `Db::enforce_schema`; a missing entry is a packaging defect, not a
/// runtime condition.
pub const REQUIRED_COMMANDS: &[&str] = &[
    "check_table_exists",
    "check_column_exists",
    "check_index_exists",
    "create_accounts_table",
    "create_account_locations_table",
    "create_account_checkins_table",
    "create_routes_table",
    "create_route_waypoints_table",
    "create_user_profiles_table",
    "create_data_sets_table",
    "create_data_set_values_table",
    "create_pending_account_changes_table",
    "create_pending_checkin_changes_table",
    "create_pending_route_changes_table",
    "create_sync_history_table",
    "create_webhook_log_table",
    "create_indexes",
    "merge_accounts_basic",
    "merge_accounts_detailed",
    "merge_account_checkins",
    "merge_routes",
    "merge_user_profiles",
    "insert_data_sets",
    "insert_data_set_values",
    "insert_account_locations",
    "insert_route_waypoints",
    "delete_data_sets",
    "delete_data_set_values",
    "delete_account_locations",
    "delete_route_waypoints",
    "search_accounts",
    "search_routes",
];

/// Resolve a named command's SQL text for a dialect.
pub fn get_sql(dialect: Dialect, command: &str) -> Result<&'static str, DbError> {
    let path = format!("{}/{}.sql", dialect.as_str(), command);
    SQL_ASSETS
        .get_file(&path)
        .and_then(|f| f.contents_utf8())
        .map(str::trim)
        .ok_or_else(|| DbError::UnknownCommand {
            command: command.to_string(),
            dialect,
        })
}

/// Every command name present in a dialect's bundle.
pub fn list_commands(dialect: Dialect) -> BTreeSet<String> {
    SQL_ASSETS
        .get_dir(dialect.as_str())
        .map(|dir| {
            dir.files()
                .filter_map(|f| {
                    let p = f.path();
                    (p.extension().and_then(|e| e.to_str()) == Some("sql"))
                        .then(|| p.file_stem().unwrap().to_string_lossy().into_owned())
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Fail loudly if any required command is absent from the dialect bundle.
pub fn verify_required_commands(dialect: Dialect) -> Result<(), DbError> {
    let available = list_commands(dialect);
    for cmd in REQUIRED_COMMANDS {
        if !available.contains(*cmd) {
            return Err(DbError::UnknownCommand {
                command: cmd.to_string(),
                dialect,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_dialect_carries_the_required_set() {
        for dialect in [Dialect::Sqlite, Dialect::Postgres, Dialect::Mssql] {
            verify_required_commands(dialect).unwrap();
        }
    }

    #[test]
    fn dialect_bundles_are_uniform() {
        let sqlite = list_commands(Dialect::Sqlite);
        assert_eq!(sqlite, list_commands(Dialect::Postgres));
        assert_eq!(sqlite, list_commands(Dialect::Mssql));
    }

    #[test]
    fn unknown_command_is_a_loud_error() {
        let err = get_sql(Dialect::Sqlite, "no_such_command").unwrap_err();
        assert!(matches!(err, DbError::UnknownCommand { .. }));
    }

    #[test]
    fn catalog_probe_text_is_dialect_specific() {
        let sqlite = get_sql(Dialect::Sqlite, "check_table_exists").unwrap();
        let pg = get_sql(Dialect::Postgres, "check_table_exists").unwrap();
        assert!(sqlite.contains("sqlite_master"));
        assert!(pg.contains("information_schema"));
        assert_ne!(sqlite, pg);
    }
}
