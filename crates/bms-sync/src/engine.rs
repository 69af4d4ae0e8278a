use bms_api::{ApiError, Upstream};
use bms_audit::{AuditLog, MetricsCollector};
use bms_db::{Db, DbError};
use bms_events::EventBus;
use bms_schemas::SyncHistory;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

/// Pull fan-out width bounds; user config is clamped into this range.
pub const MIN_CONCURRENT_REQUESTS: usize = 1;
pub const MAX_CONCURRENT_REQUESTS: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Db(#[from] DbError),

    /// Not a failure for metrics purposes; recorded as its own outcome.
    #[error("run cancelled")]
    Cancelled,
}

/// Aggregate result of one pull group.
#[derive(Debug, Clone, Default)]
pub struct GroupStats {
    pub count: usize,
    pub error_count: usize,
    pub cancelled: bool,
}

/// Aggregate result of one push run.
#[derive(Debug, Clone, Default)]
pub struct PushStats {
    pub processed: usize,
    pub error_count: usize,
    pub cancelled: bool,
}

/// Shared plumbing for both pipelines. Construct once at daemon boot and
/// hand out clones.
#[derive(Clone)]
pub struct SyncEngine {
    pub(crate) db: Db,
    pub(crate) upstream: Arc<dyn Upstream>,
    pub(crate) bus: EventBus,
    pub(crate) audit: AuditLog,
    pub(crate) metrics: MetricsCollector,
    pub(crate) max_concurrent: usize,
    pub(crate) push_max_attempts: i32,
}

impl SyncEngine {
    pub fn new(
        db: Db,
        upstream: Arc<dyn Upstream>,
        bus: EventBus,
        audit: AuditLog,
        metrics: MetricsCollector,
        max_concurrent_requests: usize,
        push_max_attempts: i32,
    ) -> Self {
        Self {
            db,
            upstream,
            bus,
            audit,
            metrics,
            max_concurrent: max_concurrent_requests
                .clamp(MIN_CONCURRENT_REQUESTS, MAX_CONCURRENT_REQUESTS),
            push_max_attempts: push_max_attempts.max(1),
        }
    }

    /// Append one run record; failures to write history are logged by the
    /// audit path, never escalated over the run's own result.
    pub(crate) async fn record_history(
        &self,
        run_type: &str,
        direction: &str,
        source: &str,
        status: &str,
        item_count: usize,
        error_count: usize,
        started_at: DateTime<Utc>,
        summary: Option<String>,
    ) {
        let finished_at = Utc::now();
        let row = SyncHistory {
            correlation_id: Uuid::new_v4(),
            run_type: run_type.to_string(),
            direction: direction.to_string(),
            source: source.to_string(),
            status: status.to_string(),
            item_count: item_count as i64,
            error_count: error_count as i64,
            started_at,
            finished_at,
            duration_ms: (finished_at - started_at).num_milliseconds(),
            summary,
        };
        if let Err(e) = self.db.record_sync_history(&row).await {
            tracing::warn!(error = %e, "failed to record sync history");
        }
    }
}
