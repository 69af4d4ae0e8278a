use crate::error::DbError;
use crate::store::{Db, DbTx};
use crate::value::{SqlRow, SqlValue};
use bms_schemas::{
    Account, AccountLocation, AccountSummary, CheckIn, DataSet, DataSetValue, Route,
    RouteSummary, RouteWaypoint, SyncHistory, UserProfile, WebhookLog, CUSTOM_FIELD_SLOTS,
};
use chrono::Utc;

impl Db {
    /// Upsert the basic account row (id-list / webhook-create shape).
    pub async fn merge_account_basic(&self, a: &Account) -> Result<(), DbError> {
        self.exec(
            "merge_accounts_basic",
            &[
                a.id.into(),
                a.full_name.clone().into(),
                a.phone_number.clone().into(),
                a.email.clone().into(),
                a.original_address.clone().into(),
                a.crm_id.clone().into(),
                Utc::now().into(),
            ],
        )
        .await?;
        Ok(())
    }

    /// Upsert the full account detail and rewrite its locations, keyed by
    /// (account_id, position), inside one transaction.
    pub async fn merge_account(&self, account: &Account) -> Result<(), DbError> {
        let a = account.clone();
        self.run_in_tx(move |tx: &mut DbTx| {
            Box::pin(async move {
                tx.exec("merge_accounts_detailed", &account_detail_params(&a))
                    .await?;
                tx.exec("delete_account_locations", &[a.id.into()]).await?;
                for (i, loc) in a.locations.iter().enumerate() {
                    tx.exec(
                        "insert_account_locations",
                        &location_params(a.id, i as i32, loc),
                    )
                    .await?;
                }
                Ok(())
            })
        })
        .await
    }

    /// Upsert one check-in. The account must already exist; an orphan is
    /// an integrity error the caller records in the audit log.
    pub async fn merge_checkin(&self, checkin: &CheckIn) -> Result<(), DbError> {
        let c = checkin.clone();
        self.run_in_tx(move |tx: &mut DbTx| {
            Box::pin(async move {
                let parent = tx
                    .query("check_account_exists", &[c.account_id.into()])
                    .await?;
                if parent.is_empty() {
                    return Err(DbError::Integrity(format!(
                        "check-in {} references missing account {}",
                        c.id, c.account_id
                    )));
                }
                let extra = c.extra_fields.as_ref().map(|v| v.to_string());
                tx.exec(
                    "merge_account_checkins",
                    &[
                        c.id.into(),
                        c.crm_id.clone().into(),
                        c.account_id.into(),
                        c.log_datetime.into(),
                        c.kind.clone().into(),
                        c.comments.clone().into(),
                        extra.into(),
                        c.created_by.clone().into(),
                    ],
                )
                .await?;
                Ok(())
            })
        })
        .await
    }

    /// Upsert a route and rewrite its waypoints in one transaction.
    pub async fn merge_route(&self, route: &Route) -> Result<(), DbError> {
        let r = route.clone();
        self.run_in_tx(move |tx: &mut DbTx| {
            Box::pin(async move {
                tx.exec(
                    "merge_routes",
                    &[
                        r.id.into(),
                        r.name.clone().into(),
                        r.route_date.into(),
                        r.duration.into(),
                        r.start_address.clone().into(),
                        r.destination_address.clone().into(),
                    ],
                )
                .await?;
                tx.exec("delete_route_waypoints", &[r.id.into()]).await?;
                for (i, wp) in r.waypoints.iter().enumerate() {
                    tx.exec(
                        "insert_route_waypoints",
                        &waypoint_params(r.id, i as i32, wp),
                    )
                    .await?;
                }
                Ok(())
            })
        })
        .await
    }

    /// Upsert the profile row, then delete and re-insert its data sets and
    /// their picklist values — atomically, so a re-pull can never leave a
    /// mixed generation behind.
    pub async fn merge_profile(&self, profile: &UserProfile) -> Result<(), DbError> {
        let p = profile.clone();
        self.run_in_tx(move |tx: &mut DbTx| {
            Box::pin(async move {
                tx.exec(
                    "merge_user_profiles",
                    &[
                        p.id.into(),
                        p.email.clone().into(),
                        p.first_name.clone().into(),
                        p.last_name.clone().into(),
                        p.is_manager.into(),
                        p.company.clone().into(),
                        p.crm_type.clone().into(),
                    ],
                )
                .await?;
                tx.exec("delete_data_set_values", &[p.id.into()]).await?;
                tx.exec("delete_data_sets", &[p.id.into()]).await?;
                for ds in &p.datas {
                    tx.exec("insert_data_sets", &data_set_params(p.id, ds)).await?;
                    for dsv in &ds.values {
                        tx.exec(
                            "insert_data_set_values",
                            &data_set_value_params(p.id, &ds.name, dsv),
                        )
                        .await?;
                    }
                }
                Ok(())
            })
        })
        .await
    }

    pub async fn account_exists(&self, id: i64) -> Result<bool, DbError> {
        Ok(!self
            .query("check_account_exists", &[id.into()])
            .await?
            .is_empty())
    }

    pub async fn search_accounts(&self, pattern: &str) -> Result<Vec<AccountSummary>, DbError> {
        let rows = self.query("search_accounts", &[pattern.into()]).await?;
        Ok(rows
            .into_iter()
            .map(|r| AccountSummary {
                id: r.i64("id").unwrap_or_default(),
                full_name: r.string("full_name").unwrap_or_default(),
                original_address: r.string("original_address"),
                phone_number: r.string("phone_number"),
            })
            .collect())
    }

    pub async fn search_routes(&self, pattern: &str) -> Result<Vec<RouteSummary>, DbError> {
        let rows = self.query("search_routes", &[pattern.into()]).await?;
        Ok(rows
            .into_iter()
            .map(|r| RouteSummary {
                id: r.i64("id").unwrap_or_default(),
                name: r.string("name").unwrap_or_default(),
                route_date: r.string("route_date"),
            })
            .collect())
    }

    pub async fn list_account_checkins(&self, account_id: i64) -> Result<Vec<SqlRow>, DbError> {
        self.query("select_account_checkins", &[account_id.into()])
            .await
    }

    pub async fn list_webhook_log(&self) -> Result<Vec<SqlRow>, DbError> {
        self.query("select_webhook_log", &[]).await
    }

    pub async fn list_account_locations(&self, account_id: i64) -> Result<Vec<SqlRow>, DbError> {
        self.query("select_account_locations", &[account_id.into()])
            .await
    }

    pub async fn list_route_waypoints(&self, route_id: i64) -> Result<Vec<SqlRow>, DbError> {
        self.query("select_route_waypoints", &[route_id.into()])
            .await
    }

    pub async fn list_data_sets(&self, profile_id: i64) -> Result<Vec<SqlRow>, DbError> {
        self.query("select_data_sets", &[profile_id.into()]).await
    }

    pub async fn list_data_set_values(&self, profile_id: i64) -> Result<Vec<SqlRow>, DbError> {
        self.query("select_data_set_values", &[profile_id.into()])
            .await
    }

    pub async fn record_sync_history(&self, h: &SyncHistory) -> Result<(), DbError> {
        self.exec(
            "insert_sync_history",
            &[
                h.correlation_id.to_string().into(),
                h.run_type.clone().into(),
                h.direction.clone().into(),
                h.source.clone().into(),
                h.status.clone().into(),
                h.item_count.into(),
                h.error_count.into(),
                h.started_at.into(),
                h.finished_at.into(),
                h.duration_ms.into(),
                h.summary.clone().into(),
            ],
        )
        .await?;
        Ok(())
    }

    pub async fn record_webhook_log(&self, w: &WebhookLog) -> Result<(), DbError> {
        self.exec(
            "insert_webhook_log",
            &[
                w.received_at.into(),
                w.method.clone().into(),
                w.uri.clone().into(),
                w.headers.to_string().into(),
                w.body.clone().into(),
                w.signature_valid.into(),
            ],
        )
        .await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Param builders
// ---------------------------------------------------------------------------

fn account_detail_params(a: &Account) -> Vec<SqlValue> {
    let mut params: Vec<SqlValue> = vec![
        a.id.into(),
        a.full_name.clone().into(),
        a.first_name.clone().into(),
        a.last_name.clone().into(),
        a.phone_number.clone().into(),
        a.email.clone().into(),
        a.original_address.clone().into(),
        a.crm_id.clone().into(),
        a.account_owner.clone().into(),
        a.notes.clone().into(),
        a.last_modified_date.into(),
        a.follow_up_date.into(),
    ];
    // Pad the parallel custom vectors to the declared slot count; anything
    // past the limit is dropped.
    for i in 0..CUSTOM_FIELD_SLOTS {
        params.push(a.custom_numeric.get(i).copied().flatten().into());
    }
    for i in 0..CUSTOM_FIELD_SLOTS {
        params.push(a.custom_text.get(i).cloned().flatten().into());
    }
    params.push(Utc::now().into());
    params
}

fn location_params(account_id: i64, position: i32, loc: &AccountLocation) -> Vec<SqlValue> {
    vec![
        account_id.into(),
        position.into(),
        loc.name.clone().into(),
        loc.address_line_1.clone().into(),
        loc.city.clone().into(),
        loc.state.clone().into(),
        loc.zipcode.clone().into(),
        loc.lat.into(),
        loc.long.into(),
    ]
}

fn waypoint_params(route_id: i64, position: i32, wp: &RouteWaypoint) -> Vec<SqlValue> {
    vec![
        route_id.into(),
        position.into(),
        wp.name.clone().into(),
        wp.address.clone().into(),
        wp.suite.clone().into(),
        wp.city.clone().into(),
        wp.state.clone().into(),
        wp.zipcode.clone().into(),
        wp.lat.into(),
        wp.long.into(),
        wp.layover_minutes.into(),
        wp.complete_address.clone().into(),
        wp.appt_time.clone().into(),
        wp.place_id.clone().into(),
    ]
}

fn data_set_params(profile_id: i64, ds: &DataSet) -> Vec<SqlValue> {
    vec![
        profile_id.into(),
        ds.name.clone().into(),
        ds.label.clone().into(),
        ds.position.into(),
        ds.has_data.into(),
    ]
}

fn data_set_value_params(profile_id: i64, ds_name: &str, dsv: &DataSetValue) -> Vec<SqlValue> {
    vec![
        profile_id.into(),
        ds_name.into(),
        dsv.position.into(),
        dsv.value.clone().into(),
        dsv.label.clone().into(),
    ]
}
