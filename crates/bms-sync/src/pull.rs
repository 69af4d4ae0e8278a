use crate::engine::{GroupStats, SyncEngine, SyncError};
use bms_audit::AuditEntry;
use bms_events::payloads::{
    types, GroupComplete, GroupError, IdsFetched, ItemRef, ItemStored, PullError,
};
use bms_events::Event;
use chrono::Utc;
use futures_util::StreamExt;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// The four pull batches. `full` runs the first three then the profile,
/// sequentially, aborting the remainder on a fatal batch error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullGroup {
    Accounts,
    Checkins,
    Routes,
    Profile,
}

impl PullGroup {
    pub fn resource(&self) -> &'static str {
        match self {
            PullGroup::Accounts => "accounts",
            PullGroup::Checkins => "checkins",
            PullGroup::Routes => "routes",
            PullGroup::Profile => "profile",
        }
    }
}

impl SyncEngine {
    /// Pull everything: accounts → checkins → routes → profile. A fatal
    /// batch (auth, id-list failure) aborts the remainder; per-item
    /// errors never do.
    pub async fn pull_all(
        &self,
        top: Option<usize>,
        cancel: &CancellationToken,
        source: &str,
    ) -> Result<Vec<GroupStats>, SyncError> {
        let mut all = Vec::new();
        for group in [
            PullGroup::Accounts,
            PullGroup::Checkins,
            PullGroup::Routes,
            PullGroup::Profile,
        ] {
            let stats = self.pull(group, top, cancel, source).await?;
            let cancelled = stats.cancelled;
            all.push(stats);
            if cancelled {
                break;
            }
        }
        self.bus.dispatch(Event::signal(types::PULL_COMPLETE, source));
        Ok(all)
    }

    /// Run one pull group: enumerate ids, fan out detail fetches over the
    /// bounded worker pool, merge each inside its own transaction.
    pub async fn pull(
        &self,
        group: PullGroup,
        top: Option<usize>,
        cancel: &CancellationToken,
        source: &str,
    ) -> Result<GroupStats, SyncError> {
        let resource = group.resource();
        let started_at = Utc::now();
        self.bus.dispatch(Event::signal(types::PULL_START, resource));

        if group == PullGroup::Profile {
            return self.pull_profile(cancel, source, started_at).await;
        }

        // Stage 1 — enumerate.
        let mut ids = match self.enumerate(group).await {
            Ok(ids) => ids,
            Err(e) => {
                self.bus.dispatch(Event::new(
                    types::PULL_GROUP_ERROR,
                    resource,
                    GroupError {
                        reason: e.to_string(),
                    },
                ));
                self.metrics.sync_op(bms_audit::SyncOutcome::Failed);
                self.record_history(
                    resource,
                    "pull",
                    source,
                    "failed",
                    0,
                    0,
                    started_at,
                    Some(e.to_string()),
                )
                .await;
                return Err(e.into());
            }
        };
        if let Some(top) = top {
            ids.truncate(top);
        }

        self.bus.dispatch(Event::new(
            types::PULL_IDS_FETCHED,
            resource,
            IdsFetched { count: ids.len() },
        ));

        if ids.is_empty() {
            self.bus.dispatch(Event::signal(types::PULL_COMPLETE, resource));
            self.record_history(resource, "pull", source, "completed", 0, 0, started_at, None)
                .await;
            return Ok(GroupStats::default());
        }

        // Stage 2 — fan-out.
        let success = AtomicUsize::new(0);
        let errors = AtomicUsize::new(0);
        let total = ids.len();

        futures_util::stream::iter(ids)
            .for_each_concurrent(self.max_concurrent, |id| {
                let success = &success;
                let errors = &errors;
                async move {
                    if cancel.is_cancelled() {
                        return;
                    }
                    self.bus.dispatch(Event::new(
                        types::PULL_FETCH_DETAIL_START,
                        resource,
                        ItemRef { id },
                    ));
                    match self.fetch_and_store(group, id, cancel).await {
                        Ok(()) => {
                            success.fetch_add(1, Ordering::SeqCst);
                        }
                        Err(e) => {
                            errors.fetch_add(1, Ordering::SeqCst);
                            warn!(resource, id, error = %e, "pull item failed");
                            // Integrity errors (e.g. orphaned check-ins)
                            // land in the audit log, never dropped.
                            self.audit
                                .record(
                                    AuditEntry::failure(
                                        "sync",
                                        "pull",
                                        "item_failed",
                                        resource,
                                        &e.to_string(),
                                    )
                                    .with_resource_id(id)
                                    .with_level("warn"),
                                )
                                .await;
                            self.bus.dispatch(Event::new(
                                types::PULL_ERROR,
                                resource,
                                PullError {
                                    resource: resource.to_string(),
                                    id: Some(id),
                                    message: e.to_string(),
                                },
                            ));
                        }
                    }
                }
            })
            .await;

        // Stage 3 — aggregate.
        let stats = GroupStats {
            count: success.load(Ordering::SeqCst),
            error_count: errors.load(Ordering::SeqCst),
            cancelled: cancel.is_cancelled(),
        };

        self.bus.dispatch(Event::new(
            types::PULL_GROUP_COMPLETE,
            resource,
            GroupComplete {
                count: stats.count,
                error_count: stats.error_count,
            },
        ));

        if stats.cancelled {
            self.bus.dispatch(Event::new(
                types::PULL_GROUP_ERROR,
                resource,
                GroupError {
                    reason: "cancelled".to_string(),
                },
            ));
            self.metrics.sync_op(bms_audit::SyncOutcome::Cancelled);
            self.record_history(
                resource,
                "pull",
                source,
                "cancelled",
                stats.count,
                stats.error_count,
                started_at,
                None,
            )
            .await;
            return Ok(stats);
        }

        if stats.count == 0 && stats.error_count == total {
            self.bus.dispatch(Event::new(
                types::PULL_GROUP_ERROR,
                resource,
                GroupError {
                    reason: "all items failed".to_string(),
                },
            ));
        }

        info!(
            resource,
            count = stats.count,
            error_count = stats.error_count,
            "pull group finished"
        );
        self.metrics.sync_op(if stats.error_count == total {
            bms_audit::SyncOutcome::Failed
        } else {
            bms_audit::SyncOutcome::Success
        });
        self.audit
            .record(
                AuditEntry::success("sync", "pull", "group_complete", resource).with_metadata(
                    serde_json::json!({
                        "count": stats.count,
                        "error_count": stats.error_count,
                    }),
                ),
            )
            .await;
        self.record_history(
            resource,
            "pull",
            source,
            if stats.error_count == total {
                "failed"
            } else {
                "completed"
            },
            stats.count,
            stats.error_count,
            started_at,
            None,
        )
        .await;
        Ok(stats)
    }

    async fn enumerate(&self, group: PullGroup) -> Result<Vec<i64>, bms_api::ApiError> {
        match group {
            // Check-ins are enumerated per parent account.
            PullGroup::Accounts | PullGroup::Checkins => self.upstream.get_account_ids().await,
            PullGroup::Routes => Ok(self
                .upstream
                .get_routes()
                .await?
                .into_iter()
                .map(|r| r.id)
                .collect()),
            PullGroup::Profile => unreachable!("profile is a single fetch"),
        }
    }

    /// Fetch one item's detail and persist it. The merge commands rewrite
    /// child collections inside the same transaction.
    async fn fetch_and_store(
        &self,
        group: PullGroup,
        id: i64,
        cancel: &CancellationToken,
    ) -> Result<(), SyncError> {
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        // Both success events carry the decoded detail: fetch_detail after
        // decode, store after commit.
        match group {
            PullGroup::Accounts => {
                let account = self.upstream.get_account(id).await?;
                let item = ItemStored {
                    id,
                    data: serde_json::to_value(&account).unwrap_or_default(),
                };
                self.bus.dispatch(Event::new(
                    types::PULL_FETCH_DETAIL_SUCCESS,
                    group.resource(),
                    item.clone(),
                ));
                self.db.merge_account(&account).await?;
                self.bus
                    .dispatch(Event::new(types::PULL_STORE_SUCCESS, group.resource(), item));
            }
            PullGroup::Checkins => {
                let checkins = self.upstream.get_checkins_for_account(id).await?;
                let item = ItemStored {
                    id,
                    data: serde_json::to_value(&checkins).unwrap_or_default(),
                };
                self.bus.dispatch(Event::new(
                    types::PULL_FETCH_DETAIL_SUCCESS,
                    group.resource(),
                    item.clone(),
                ));
                for checkin in &checkins {
                    self.db.merge_checkin(checkin).await?;
                }
                self.bus
                    .dispatch(Event::new(types::PULL_STORE_SUCCESS, group.resource(), item));
            }
            PullGroup::Routes => {
                let route = self.upstream.get_route(id).await?;
                let item = ItemStored {
                    id,
                    data: serde_json::to_value(&route).unwrap_or_default(),
                };
                self.bus.dispatch(Event::new(
                    types::PULL_FETCH_DETAIL_SUCCESS,
                    group.resource(),
                    item.clone(),
                ));
                self.db.merge_route(&route).await?;
                self.bus
                    .dispatch(Event::new(types::PULL_STORE_SUCCESS, group.resource(), item));
            }
            PullGroup::Profile => unreachable!(),
        }
        Ok(())
    }

    /// Profile is a single fetch: merge the row, then replace its data
    /// sets and values atomically.
    async fn pull_profile(
        &self,
        cancel: &CancellationToken,
        source: &str,
        started_at: chrono::DateTime<Utc>,
    ) -> Result<GroupStats, SyncError> {
        let resource = PullGroup::Profile.resource();
        if cancel.is_cancelled() {
            self.bus.dispatch(Event::new(
                types::PULL_GROUP_ERROR,
                resource,
                GroupError {
                    reason: "cancelled".to_string(),
                },
            ));
            return Ok(GroupStats {
                cancelled: true,
                ..Default::default()
            });
        }

        match self.pull_profile_inner().await {
            Ok(id) => {
                self.bus.dispatch(Event::new(
                    types::PULL_GROUP_COMPLETE,
                    resource,
                    GroupComplete {
                        count: 1,
                        error_count: 0,
                    },
                ));
                self.metrics.sync_op(bms_audit::SyncOutcome::Success);
                self.record_history(resource, "pull", source, "completed", 1, 0, started_at, None)
                    .await;
                self.audit
                    .record(
                        AuditEntry::success("sync", "pull", "profile_merged", resource)
                            .with_resource_id(id),
                    )
                    .await;
                Ok(GroupStats {
                    count: 1,
                    ..Default::default()
                })
            }
            Err(e) => {
                self.bus.dispatch(Event::new(
                    types::PULL_ERROR,
                    resource,
                    PullError {
                        resource: resource.to_string(),
                        id: None,
                        message: e.to_string(),
                    },
                ));
                self.bus.dispatch(Event::new(
                    types::PULL_GROUP_ERROR,
                    resource,
                    GroupError {
                        reason: e.to_string(),
                    },
                ));
                self.metrics.sync_op(bms_audit::SyncOutcome::Failed);
                self.record_history(
                    resource,
                    "pull",
                    source,
                    "failed",
                    0,
                    1,
                    started_at,
                    Some(e.to_string()),
                )
                .await;
                Err(e)
            }
        }
    }

    async fn pull_profile_inner(&self) -> Result<i64, SyncError> {
        let profile = self.upstream.get_user_profile().await?;
        let item = ItemStored {
            id: profile.id,
            data: serde_json::to_value(&profile).unwrap_or_default(),
        };
        self.bus.dispatch(Event::new(
            types::PULL_FETCH_DETAIL_SUCCESS,
            PullGroup::Profile.resource(),
            item.clone(),
        ));
        self.db.merge_profile(&profile).await?;
        self.bus.dispatch(Event::new(
            types::PULL_STORE_SUCCESS,
            PullGroup::Profile.resource(),
            item,
        ));
        Ok(profile.id)
    }
}
