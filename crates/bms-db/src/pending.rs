use crate::error::DbError;
use crate::store::{Db, DbTx};
use crate::value::SqlValue;
use bms_schemas::{ChangeStatus, ChangeType, EntityKind, PendingChange};
use chrono::Utc;

/// Per-entity command names. Profile has no pending-change table.
struct PendingCommands {
    claim: &'static str,
    select_claimed: &'static str,
    update_status: &'static str,
    insert: &'static str,
}

fn commands_for(entity: EntityKind) -> Result<PendingCommands, DbError> {
    match entity {
        EntityKind::Account => Ok(PendingCommands {
            claim: "claim_pending_account_changes",
            select_claimed: "select_claimed_account_changes",
            update_status: "update_account_change_status",
            insert: "insert_pending_account_change",
        }),
        EntityKind::CheckIn => Ok(PendingCommands {
            claim: "claim_pending_checkin_changes",
            select_claimed: "select_claimed_checkin_changes",
            update_status: "update_checkin_change_status",
            insert: "insert_pending_checkin_change",
        }),
        EntityKind::Route => Ok(PendingCommands {
            claim: "claim_pending_route_changes",
            select_claimed: "select_claimed_route_changes",
            update_status: "update_route_change_status",
            insert: "insert_pending_route_change",
        }),
        EntityKind::Profile => Err(DbError::Config(
            "profile has no pending-change table".into(),
        )),
    }
}

impl Db {
    /// Flip every pending row to in_flight and return the claimed batch in
    /// change_id order. One transaction, so a concurrent scanner either
    /// sees the rows already claimed or none at all.
    ///
    /// Rows left in_flight by a crashed run are re-scanned here; the push
    /// pipeline is the single dispatcher, so re-claiming them is recovery,
    /// not double ownership.
    pub async fn claim_pending_changes(
        &self,
        entity: EntityKind,
    ) -> Result<Vec<PendingChange>, DbError> {
        let cmds = commands_for(entity)?;
        let now = Utc::now();
        let rows = self
            .run_in_tx(move |tx: &mut DbTx| {
                Box::pin(async move {
                    tx.exec(cmds.claim, &[now.into()]).await?;
                    tx.query(cmds.select_claimed, &[]).await
                })
            })
            .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let change_type_raw = row.string("change_type").unwrap_or_default();
            let status_raw = row.string("status").unwrap_or_default();
            out.push(PendingChange {
                change_id: row
                    .i64("change_id")
                    .ok_or_else(|| DbError::Integrity("pending row without change_id".into()))?,
                entity,
                entity_id: row.i64("entity_id").unwrap_or_default(),
                change_type: ChangeType::parse(&change_type_raw)
                    .map_err(|e| DbError::Integrity(e.to_string()))?,
                changes: row.string("changes").unwrap_or_default(),
                status: ChangeStatus::parse(&status_raw)
                    .map_err(|e| DbError::Integrity(e.to_string()))?,
                attempts: row.i64("attempts").unwrap_or(0) as i32,
                created_at: row.timestamp("created_at").unwrap_or(now),
                updated_at: row.timestamp("updated_at").unwrap_or(now),
                error_detail: row.string("error_detail"),
            });
        }
        Ok(out)
    }

    /// Move an in_flight row to `status`. The WHERE clause carries the
    /// monotonicity guard: zero rows affected means the row was not
    /// in_flight, which is an integrity violation, not a no-op.
    pub async fn update_change_status(
        &self,
        entity: EntityKind,
        change_id: i64,
        status: ChangeStatus,
        attempt_delta: i32,
        error_detail: Option<&str>,
    ) -> Result<(), DbError> {
        if status == ChangeStatus::InFlight {
            return Err(DbError::Integrity(
                "in_flight is entered via claim, not update".into(),
            ));
        }
        let cmds = commands_for(entity)?;
        let affected = self
            .exec(
                cmds.update_status,
                &[
                    status.as_str().into(),
                    attempt_delta.into(),
                    error_detail.map(str::to_string).into(),
                    Utc::now().into(),
                    change_id.into(),
                ],
            )
            .await?;
        if affected == 0 {
            return Err(DbError::Integrity(format!(
                "illegal status transition for {} change {change_id}: row not in_flight",
                entity.as_str()
            )));
        }
        Ok(())
    }

    /// Stage a new pending change. Used by the user-edit collaborator and
    /// by tests; the push pipeline only consumes.
    pub async fn insert_pending_change(
        &self,
        entity: EntityKind,
        entity_id: i64,
        change_type: ChangeType,
        changes_json: &str,
    ) -> Result<(), DbError> {
        let cmds = commands_for(entity)?;
        self.exec(
            cmds.insert,
            &[
                entity_id.into(),
                change_type.as_str().into(),
                changes_json.into(),
            ],
        )
        .await?;
        Ok(())
    }
}
