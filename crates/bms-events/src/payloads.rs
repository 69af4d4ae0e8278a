//! Typed payload records, one per event type, plus the event-type string
//! constants the rest of the engine dispatches with.

use serde::{Deserialize, Serialize};

/// Event type strings. Dotted; the first segment names the emitting
/// component, the rest the step.
pub mod types {
    pub const PULL_START: &str = "pull.start";
    pub const PULL_IDS_FETCHED: &str = "pull.ids_fetched";
    pub const PULL_FETCH_DETAIL_START: &str = "pull.fetch_detail.start";
    pub const PULL_FETCH_DETAIL_SUCCESS: &str = "pull.fetch_detail.success";
    pub const PULL_STORE_SUCCESS: &str = "pull.store.success";
    pub const PULL_ERROR: &str = "pull.error";
    pub const PULL_GROUP_COMPLETE: &str = "pull.group.complete";
    pub const PULL_GROUP_ERROR: &str = "pull.group.error";
    pub const PULL_COMPLETE: &str = "pull.complete";

    pub const PUSH_SCAN_START: &str = "push.scan.start";
    pub const PUSH_SCAN_COMPLETE: &str = "push.scan.complete";
    pub const PUSH_ITEM_START: &str = "push.item.start";
    pub const PUSH_ITEM_SUCCESS: &str = "push.item.success";
    pub const PUSH_ITEM_ERROR: &str = "push.item.error";
    pub const PUSH_COMPLETE: &str = "push.complete";

    pub const WEBHOOK_RECEIVED: &str = "webhook.received";
    pub const WEBHOOK_REJECTED: &str = "webhook.rejected";

    pub const JOB_TRIGGERED: &str = "scheduler.job.triggered";
    pub const JOB_COMPLETED: &str = "scheduler.job.completed";
    pub const JOB_FAILED: &str = "scheduler.job.failed";
    pub const JOB_CHANGED: &str = "scheduler.job.changed";

    pub const ACTION_ERROR: &str = "action.error";
    pub const ACTION_CONFIG_CHANGED: &str = "action.config.changed";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdsFetched {
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemRef {
    /// Upstream entity id being fetched or stored.
    pub id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemStored {
    pub id: i64,
    /// Entity detail as decoded from upstream. Rides the fetch-success
    /// event after decode and the store-success event after commit.
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullError {
    /// Resource tag: "accounts", "checkins", "routes", "profile".
    pub resource: String,
    pub id: Option<i64>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupComplete {
    pub count: usize,
    pub error_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupError {
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanComplete {
    pub changes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushItem {
    pub change_id: i64,
    pub entity_id: i64,
    pub change_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushItemError {
    pub change_id: i64,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushComplete {
    pub error_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookReceived {
    pub route: String,
    pub entity_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookRejected {
    pub route: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEvent {
    pub job_id: String,
    pub name: String,
    pub sync_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobFailed {
    pub job_id: String,
    pub name: String,
    pub attempt: u32,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionError {
    pub entry: String,
    pub index: usize,
    pub message: String,
}
