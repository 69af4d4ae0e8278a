use crate::assets;
use crate::error::DbError;
use crate::store::Db;
use tracing::info;

/// Caller intent for destructive schema operations.
#[derive(Debug, Clone, Copy, Default)]
pub struct SchemaState {
    /// Must be set explicitly before `drop_all_tables` will act.
    pub force_drop: bool,
}

/// Every table the engine owns, paired with its create command.
const TABLES: &[(&str, &str)] = &[
    ("accounts", "create_accounts_table"),
    ("account_locations", "create_account_locations_table"),
    ("account_checkins", "create_account_checkins_table"),
    ("routes", "create_routes_table"),
    ("route_waypoints", "create_route_waypoints_table"),
    ("user_profiles", "create_user_profiles_table"),
    ("data_sets", "create_data_sets_table"),
    ("data_set_values", "create_data_set_values_table"),
    (
        "pending_account_changes",
        "create_pending_account_changes_table",
    ),
    (
        "pending_checkin_changes",
        "create_pending_checkin_changes_table",
    ),
    ("pending_route_changes", "create_pending_route_changes_table"),
    ("sync_history", "create_sync_history_table"),
    ("webhook_log", "create_webhook_log_table"),
];

/// Columns added after the first release; old stores get them via
/// check-then-alter so enforcement stays idempotent.
const LATE_COLUMNS: &[(&str, &str, &str)] = &[
    (
        "route_waypoints",
        "complete_address",
        "add_route_waypoint_complete_address",
    ),
    ("route_waypoints", "appt_time", "add_route_waypoint_appt_time"),
    ("route_waypoints", "place_id", "add_route_waypoint_place_id"),
];

impl Db {
    /// Bring the store up to the declared schema. Safe to run repeatedly:
    /// existing tables are left alone, indexes are created with IF-NOT-
    /// EXISTS guards, late-added columns are checked before ALTER.
    ///
    /// Starts with the required-commands check so a mispackaged bundle
    /// fails here, loudly, rather than mid-pipeline.
    pub async fn enforce_schema(&self) -> Result<(), DbError> {
        assets::verify_required_commands(self.dialect())?;

        for (table, create_cmd) in TABLES {
            let present = self
                .query("check_table_exists", &[(*table).into()])
                .await?;
            if present.is_empty() {
                info!(table, "creating missing table");
                self.exec_batch(create_cmd).await?;
            }
        }

        self.exec_batch("create_indexes").await?;

        for (table, column, add_cmd) in LATE_COLUMNS {
            let present = self
                .query("check_column_exists", &[(*table).into(), (*column).into()])
                .await?;
            if present.is_empty() {
                info!(table, column, "adding late column");
                self.exec(add_cmd, &[]).await?;
            }
        }

        Ok(())
    }

    /// Read-only check. Returns the missing pieces; callers that need a
    /// hard failure use `validate_schema`.
    pub async fn schema_report(&self) -> Result<Vec<String>, DbError> {
        let mut missing = Vec::new();
        for (table, _) in TABLES {
            let present = self
                .query("check_table_exists", &[(*table).into()])
                .await?;
            if present.is_empty() {
                missing.push(format!("table:{table}"));
                continue;
            }
        }
        for (table, column, _) in LATE_COLUMNS {
            if missing.iter().any(|m| m == &format!("table:{table}")) {
                continue;
            }
            let present = self
                .query("check_column_exists", &[(*table).into(), (*column).into()])
                .await?;
            if present.is_empty() {
                missing.push(format!("column:{table}.{column}"));
            }
        }
        Ok(missing)
    }

    /// `schema_report`, failing with `SchemaError` when anything is missing.
    pub async fn validate_schema(&self) -> Result<(), DbError> {
        let missing = self.schema_report().await?;
        if missing.is_empty() {
            Ok(())
        } else {
            Err(DbError::Schema(missing))
        }
    }

    /// Destructive: drops every owned table. Refuses without the explicit
    /// force flag.
    pub async fn drop_all_tables(&self, state: &SchemaState) -> Result<(), DbError> {
        if !state.force_drop {
            return Err(DbError::Config(
                "refusing to drop tables without force_drop".into(),
            ));
        }
        self.exec_batch("drop_all_tables").await
    }
}
