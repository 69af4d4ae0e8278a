use crate::engine::{PushStats, SyncEngine, SyncError};
use bms_audit::AuditEntry;
use bms_events::payloads::{types, PushComplete, PushItem, PushItemError, ScanComplete};
use bms_events::Event;
use bms_schemas::{ChangeStatus, ChangeType, EntityKind, PendingChange};
use chrono::Utc;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Entity classes the scanner walks, in a fixed order. Within one class
/// the claim preserves change_id order, so updates for a given entity id
/// dispatch oldest-first.
const SCAN_ORDER: &[EntityKind] = &[EntityKind::Account, EntityKind::CheckIn, EntityKind::Route];

impl SyncEngine {
    /// One push run: claim every pending change, dispatch each upstream,
    /// reconcile row status. Per-item failures never abort the batch.
    pub async fn push(
        &self,
        cancel: &CancellationToken,
        source: &str,
    ) -> Result<PushStats, SyncError> {
        let started_at = Utc::now();
        self.bus.dispatch(Event::signal(types::PUSH_SCAN_START, "push"));

        let mut batch: Vec<PendingChange> = Vec::new();
        for entity in SCAN_ORDER {
            batch.extend(self.db.claim_pending_changes(*entity).await?);
        }

        self.bus.dispatch(Event::new(
            types::PUSH_SCAN_COMPLETE,
            "push",
            ScanComplete {
                changes: batch.len(),
            },
        ));

        let mut stats = PushStats::default();
        for change in batch {
            if cancel.is_cancelled() {
                // Release unprocessed claims so the next run picks them up.
                self.release(&change).await;
                stats.cancelled = true;
                continue;
            }
            self.push_one(change, &mut stats).await;
        }

        self.bus.dispatch(Event::new(
            types::PUSH_COMPLETE,
            "push",
            PushComplete {
                error_count: stats.error_count,
            },
        ));

        let status = if stats.cancelled {
            "cancelled"
        } else if stats.processed > 0 && stats.error_count == stats.processed {
            "failed"
        } else {
            "completed"
        };
        self.metrics.sync_op(match status {
            "cancelled" => bms_audit::SyncOutcome::Cancelled,
            "failed" => bms_audit::SyncOutcome::Failed,
            _ => bms_audit::SyncOutcome::Success,
        });
        self.record_history(
            "push",
            "push",
            source,
            status,
            stats.processed,
            stats.error_count,
            started_at,
            None,
        )
        .await;

        info!(
            processed = stats.processed,
            error_count = stats.error_count,
            "push run finished"
        );
        Ok(stats)
    }

    async fn push_one(&self, change: PendingChange, stats: &mut PushStats) {
        stats.processed += 1;
        self.bus.dispatch(Event::new(
            types::PUSH_ITEM_START,
            "push",
            PushItem {
                change_id: change.change_id,
                entity_id: change.entity_id,
                change_type: change.change_type.as_str().to_string(),
            },
        ));

        // A malformed diff fails the row without any upstream call.
        let fields: Value = match serde_json::from_str(&change.changes) {
            Ok(v) => v,
            Err(e) => {
                let msg = format!("decode error: malformed change diff: {e}");
                self.fail_item(&change, &msg, stats).await;
                return;
            }
        };

        match self.dispatch_change(&change, &fields).await {
            Ok(()) => {
                if let Err(e) = self
                    .db
                    .update_change_status(
                        change.entity,
                        change.change_id,
                        ChangeStatus::Completed,
                        1,
                        None,
                    )
                    .await
                {
                    warn!(change_id = change.change_id, error = %e, "failed to mark change completed");
                }
                self.bus.dispatch(Event::new(
                    types::PUSH_ITEM_SUCCESS,
                    "push",
                    PushItem {
                        change_id: change.change_id,
                        entity_id: change.entity_id,
                        change_type: change.change_type.as_str().to_string(),
                    },
                ));
            }
            Err(e) if e.is_retriable() && change.attempts + 1 < self.push_max_attempts => {
                // Back to pending with the attempt recorded; a later run
                // retries it.
                if let Err(mark) = self
                    .db
                    .update_change_status(
                        change.entity,
                        change.change_id,
                        ChangeStatus::Pending,
                        1,
                        Some(&e.to_string()),
                    )
                    .await
                {
                    warn!(change_id = change.change_id, error = %mark, "failed to release change");
                }
                stats.error_count += 1;
                self.bus.dispatch(Event::new(
                    types::PUSH_ITEM_ERROR,
                    "push",
                    PushItemError {
                        change_id: change.change_id,
                        message: e.to_string(),
                    },
                ));
            }
            Err(e) => {
                self.fail_item(&change, &e.to_string(), stats).await;
            }
        }
    }

    async fn fail_item(&self, change: &PendingChange, msg: &str, stats: &mut PushStats) {
        stats.error_count += 1;
        if let Err(e) = self
            .db
            .update_change_status(
                change.entity,
                change.change_id,
                ChangeStatus::Failed,
                1,
                Some(msg),
            )
            .await
        {
            warn!(change_id = change.change_id, error = %e, "failed to mark change failed");
        }
        self.audit
            .record(
                AuditEntry::failure("sync", "push", "item_failed", change.entity.as_str(), msg)
                    .with_resource_id(change.entity_id),
            )
            .await;
        self.bus.dispatch(Event::new(
            types::PUSH_ITEM_ERROR,
            "push",
            PushItemError {
                change_id: change.change_id,
                message: msg.to_string(),
            },
        ));
    }

    async fn release(&self, change: &PendingChange) {
        if let Err(e) = self
            .db
            .update_change_status(
                change.entity,
                change.change_id,
                ChangeStatus::Pending,
                0,
                None,
            )
            .await
        {
            warn!(change_id = change.change_id, error = %e, "failed to release claimed change");
        }
    }

    /// Map one change to its upstream call.
    async fn dispatch_change(
        &self,
        change: &PendingChange,
        fields: &Value,
    ) -> Result<(), bms_api::ApiError> {
        let resource = match change.entity {
            EntityKind::Account => "customers",
            EntityKind::CheckIn => "appointments",
            EntityKind::Route => "routes",
            EntityKind::Profile => "profiles",
        };
        match change.change_type {
            ChangeType::Update => self.upstream.patch(resource, change.entity_id, fields).await,
            ChangeType::Create => {
                let form: Vec<(String, String)> = fields
                    .as_object()
                    .map(|m| {
                        m.iter()
                            .map(|(k, v)| {
                                let s = match v {
                                    Value::String(s) => s.clone(),
                                    other => other.to_string(),
                                };
                                (k.clone(), s)
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                self.upstream
                    .raw_request("POST", &format!("/{resource}/"), &form)
                    .await
                    .map(|_| ())
            }
            ChangeType::Delete => self
                .upstream
                .raw_request("DELETE", &format!("/{resource}/{}/", change.entity_id), &[])
                .await
                .map(|_| ()),
        }
    }
}
