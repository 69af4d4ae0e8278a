use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::OnceLock;
use uuid::Uuid;

/// Upper bound on the parallel (custom_numeric_N, custom_text_N) column
/// pairs declared in the account schema. Detail payloads may carry fewer;
/// anything beyond this is ignored at merge time.
pub const CUSTOM_FIELD_SLOTS: usize = 30;

// ---------------------------------------------------------------------------
// Accounts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    pub full_name: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub original_address: Option<String>,
    #[serde(default)]
    pub crm_id: Option<String>,
    #[serde(default)]
    pub account_owner: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub last_modified_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub follow_up_date: Option<DateTime<Utc>>,
    /// Parallel custom columns, slot N maps to custom_numeric_{N+1}.
    #[serde(default)]
    pub custom_numeric: Vec<Option<f64>>,
    /// Parallel custom columns, slot N maps to custom_text_{N+1}.
    #[serde(default)]
    pub custom_text: Vec<Option<String>>,
    #[serde(default)]
    pub locations: Vec<AccountLocation>,
}

/// Child row of an account, identified by (account_id, position).
/// Re-pulling an account rewrites these rows wholesale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountLocation {
    #[serde(default)]
    pub account_id: i64,
    #[serde(default)]
    pub position: i32,
    #[serde(default)]
    pub name: Option<String>,
    pub address_line_1: String,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub zipcode: Option<String>,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub long: Option<f64>,
}

/// Trimmed row shape returned by the account search command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountSummary {
    pub id: i64,
    pub full_name: String,
    pub original_address: Option<String>,
    pub phone_number: Option<String>,
}

// ---------------------------------------------------------------------------
// Check-ins
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckIn {
    pub id: i64,
    #[serde(default)]
    pub crm_id: Option<String>,
    /// Must resolve to an existing account at merge time; orphans are
    /// recorded in the audit log, never silently dropped.
    #[serde(rename = "account_id", alias = "customer")]
    pub account_id: i64,
    pub log_datetime: DateTime<Utc>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub comments: Option<String>,
    /// Free-form extension map, persisted as serialized text.
    #[serde(default)]
    pub extra_fields: Option<Value>,
    #[serde(default)]
    pub created_by: Option<String>,
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Route {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub route_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration: Option<i64>,
    #[serde(default)]
    pub start_address: Option<String>,
    #[serde(default)]
    pub destination_address: Option<String>,
    #[serde(default)]
    pub waypoints: Vec<RouteWaypoint>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteWaypoint {
    #[serde(default)]
    pub route_id: i64,
    #[serde(default)]
    pub position: i32,
    #[serde(default)]
    pub name: Option<String>,
    pub address: String,
    #[serde(default)]
    pub suite: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub zipcode: Option<String>,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub long: Option<f64>,
    #[serde(default)]
    pub layover_minutes: Option<i64>,
    // Late-added columns; EnforceSchema back-fills these on old stores.
    #[serde(default)]
    pub complete_address: Option<String>,
    #[serde(default)]
    pub appt_time: Option<String>,
    #[serde(default)]
    pub place_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteSummary {
    pub id: i64,
    pub name: String,
    pub route_date: Option<String>,
}

// ---------------------------------------------------------------------------
// User profile + data sets
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: i64,
    pub email: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub is_manager: bool,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub crm_type: Option<String>,
    #[serde(default)]
    pub datas: Vec<DataSet>,
}

/// User-defined label/picklist definition scoped to one profile. Re-pull of
/// a profile deletes and re-inserts all of its data sets atomically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSet {
    #[serde(default)]
    pub profile_id: i64,
    pub name: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub position: i32,
    #[serde(default)]
    pub has_data: bool,
    #[serde(default)]
    pub values: Vec<DataSetValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSetValue {
    #[serde(default)]
    pub data_set_name: String,
    pub value: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub position: i32,
}

/// Static lookup from a data-set name to the account custom column it
/// projects onto. Stored as data so nothing holds a cyclic reference back
/// into the account schema.
pub fn account_column_for_data_set(name: &str) -> Option<&'static str> {
    static MAP: OnceLock<HashMap<&'static str, &'static str>> = OnceLock::new();
    let map = MAP.get_or_init(|| {
        let mut m = HashMap::new();
        macro_rules! slot {
            ($($n:literal),*) => {$(
                m.insert(
                    concat!("account__custom_numeric_", $n),
                    concat!("custom_numeric_", $n),
                );
                m.insert(
                    concat!("account__custom_text_", $n),
                    concat!("custom_text_", $n),
                );
            )*};
        }
        slot!(
            1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23,
            24, 25, 26, 27, 28, 29, 30
        );
        m
    });
    map.get(name).copied()
}

// ---------------------------------------------------------------------------
// Pending changes (push pipeline input)
// ---------------------------------------------------------------------------

/// Entity class a pending change targets. Each class has its own
/// pending-change table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Account,
    CheckIn,
    Route,
    Profile,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Account => "account",
            EntityKind::CheckIn => "checkin",
            EntityKind::Route => "route",
            EntityKind::Profile => "profile",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeType {
    Create,
    Update,
    Delete,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Create => "CREATE",
            ChangeType::Update => "UPDATE",
            ChangeType::Delete => "DELETE",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "CREATE" => Ok(ChangeType::Create),
            "UPDATE" => Ok(ChangeType::Update),
            "DELETE" => Ok(ChangeType::Delete),
            other => Err(anyhow!("invalid change type: {}", other)),
        }
    }
}

/// Lifecycle of a pending change. Transitions are monotone:
/// pending → in_flight → (completed | failed), with the single exception
/// that a retriable dispatch failure may return in_flight → pending while
/// the attempt budget lasts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeStatus {
    Pending,
    InFlight,
    Completed,
    Failed,
}

impl ChangeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeStatus::Pending => "pending",
            ChangeStatus::InFlight => "in_flight",
            ChangeStatus::Completed => "completed",
            ChangeStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(ChangeStatus::Pending),
            "in_flight" => Ok(ChangeStatus::InFlight),
            "completed" => Ok(ChangeStatus::Completed),
            "failed" => Ok(ChangeStatus::Failed),
            other => Err(anyhow!("invalid change status: {}", other)),
        }
    }

    /// Whether `self → next` is an allowed transition.
    pub fn can_transition_to(&self, next: ChangeStatus) -> bool {
        matches!(
            (self, next),
            (ChangeStatus::Pending, ChangeStatus::InFlight)
                | (ChangeStatus::InFlight, ChangeStatus::Completed)
                | (ChangeStatus::InFlight, ChangeStatus::Failed)
                | (ChangeStatus::InFlight, ChangeStatus::Pending)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingChange {
    pub change_id: i64,
    pub entity: EntityKind,
    pub entity_id: i64,
    pub change_type: ChangeType,
    /// JSON-encoded field diff. Parse failures mark the row failed without
    /// any upstream call.
    pub changes: String,
    pub status: ChangeStatus,
    pub attempts: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub error_detail: Option<String>,
}

// ---------------------------------------------------------------------------
// Run records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncType {
    Accounts,
    Checkins,
    Routes,
    Profile,
    Full,
    Push,
}

impl SyncType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncType::Accounts => "accounts",
            SyncType::Checkins => "checkins",
            SyncType::Routes => "routes",
            SyncType::Profile => "profile",
            SyncType::Full => "full",
            SyncType::Push => "push",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "accounts" => Ok(SyncType::Accounts),
            "checkins" => Ok(SyncType::Checkins),
            "routes" => Ok(SyncType::Routes),
            "profile" => Ok(SyncType::Profile),
            "full" => Ok(SyncType::Full),
            "push" => Ok(SyncType::Push),
            other => Err(anyhow!("invalid sync type: {}", other)),
        }
    }
}

/// Append-only record of one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncHistory {
    pub correlation_id: Uuid,
    pub run_type: String,
    /// "pull" | "push"
    pub direction: String,
    /// What initiated the run: "manual", "scheduler", "webhook".
    pub source: String,
    /// "completed" | "failed" | "cancelled"
    pub status: String,
    pub item_count: i64,
    pub error_count: i64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: i64,
    pub summary: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookLog {
    pub received_at: DateTime<Utc>,
    pub method: String,
    pub uri: String,
    /// Request headers captured as a JSON object.
    pub headers: Value,
    pub body: String,
    pub signature_valid: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn change_status_transitions_are_monotone() {
        use ChangeStatus::*;
        assert!(Pending.can_transition_to(InFlight));
        assert!(InFlight.can_transition_to(Completed));
        assert!(InFlight.can_transition_to(Failed));
        assert!(InFlight.can_transition_to(Pending)); // retriable release
        assert!(!Completed.can_transition_to(Pending));
        assert!(!Failed.can_transition_to(InFlight));
        assert!(!Pending.can_transition_to(Completed));
    }

    #[test]
    fn data_set_mapping_covers_all_slots() {
        assert_eq!(
            account_column_for_data_set("account__custom_numeric_1"),
            Some("custom_numeric_1")
        );
        assert_eq!(
            account_column_for_data_set("account__custom_text_30"),
            Some("custom_text_30")
        );
        assert_eq!(account_column_for_data_set("account__custom_text_31"), None);
        assert_eq!(account_column_for_data_set("unrelated"), None);
    }

    #[test]
    fn checkin_parses_upstream_shape() {
        let body = r#"{"id":1001,"crm_id":"CHK-001","account_id":1,
            "log_datetime":"2025-01-05T09:45:00Z","type":"Visit",
            "comments":"x","created_by":"alice@example.com"}"#;
        let c: CheckIn = serde_json::from_str(body).unwrap();
        assert_eq!(c.id, 1001);
        assert_eq!(c.kind.as_deref(), Some("Visit"));
        assert_eq!(c.account_id, 1);
    }
}
