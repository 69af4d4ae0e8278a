use async_trait::async_trait;
use bms_api::{ApiError, Upstream};
use bms_audit::{AuditLog, MetricsCollector, RotationPolicy};
use bms_db::Db;
use bms_events::{Event, EventBus, Listener};
use bms_schemas::{Account, CheckIn, Route, UserProfile};
use bms_sync::SyncEngine;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Scripted upstream double. Failure knobs cover the scenarios; call
/// counters let tests assert what was (not) sent.
#[derive(Default)]
pub struct StubUpstream {
    pub account_ids: Vec<i64>,
    /// Accounts whose detail fetch fails with a transient 500.
    pub fail_accounts: HashSet<i64>,
    pub routes: Vec<Route>,
    pub checkins: HashMap<i64, Vec<CheckIn>>,
    pub profile: Option<UserProfile>,
    /// First N patch calls fail with a transient 503.
    pub patch_failures_remaining: AtomicI32,
    pub patch_calls: AtomicUsize,
    pub raw_calls: AtomicUsize,
    pub detail_calls: AtomicUsize,
}

pub fn account(id: i64, name: &str) -> Account {
    Account {
        id,
        full_name: name.to_string(),
        first_name: None,
        last_name: None,
        phone_number: None,
        email: None,
        original_address: None,
        crm_id: None,
        account_owner: None,
        notes: None,
        last_modified_date: None,
        follow_up_date: None,
        custom_numeric: vec![],
        custom_text: vec![],
        locations: vec![],
    }
}

#[async_trait]
impl Upstream for StubUpstream {
    async fn get_account_ids(&self) -> Result<Vec<i64>, ApiError> {
        Ok(self.account_ids.clone())
    }

    async fn get_account(&self, id: i64) -> Result<Account, ApiError> {
        self.detail_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_accounts.contains(&id) {
            return Err(ApiError::Transient { status: 500 });
        }
        Ok(account(id, &format!("Account {id}")))
    }

    async fn get_checkins_for_account(&self, id: i64) -> Result<Vec<CheckIn>, ApiError> {
        Ok(self.checkins.get(&id).cloned().unwrap_or_default())
    }

    async fn get_routes(&self) -> Result<Vec<Route>, ApiError> {
        Ok(self.routes.clone())
    }

    async fn get_route(&self, id: i64) -> Result<Route, ApiError> {
        self.detail_calls.fetch_add(1, Ordering::SeqCst);
        self.routes
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or(ApiError::NotFound {
                resource: format!("/routes/{id}/"),
            })
    }

    async fn get_user_profile(&self) -> Result<UserProfile, ApiError> {
        self.profile.clone().ok_or(ApiError::NotFound {
            resource: "/profiles/".to_string(),
        })
    }

    async fn patch(&self, _resource: &str, _id: i64, _fields: &Value) -> Result<(), ApiError> {
        self.patch_calls.fetch_add(1, Ordering::SeqCst);
        if self.patch_failures_remaining.fetch_sub(1, Ordering::SeqCst) > 0 {
            return Err(ApiError::Transient { status: 503 });
        }
        Ok(())
    }

    async fn raw_request(
        &self,
        _method: &str,
        _path: &str,
        _form: &[(String, String)],
    ) -> Result<Vec<u8>, ApiError> {
        self.raw_calls.fetch_add(1, Ordering::SeqCst);
        Ok(Vec::new())
    }

    async fn ping(&self) -> Result<(), ApiError> {
        Ok(())
    }
}

pub struct Harness {
    pub _dir: TempDir,
    pub db: Db,
    pub bus: EventBus,
    pub engine: SyncEngine,
    pub upstream: Arc<StubUpstream>,
    pub events: Arc<Mutex<Vec<String>>>,
}

/// SQLite-backed engine with a recorder subscribed to every event.
/// `max_concurrent = 1` keeps event order deterministic for assertions.
pub async fn harness(upstream: StubUpstream) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = bms_config::AppConfig::default();
    cfg.db.name = dir.path().join("sync.db").to_string_lossy().into_owned();
    let db = Db::connect(&cfg).await.unwrap();
    db.enforce_schema().await.unwrap();

    let bus = EventBus::new();
    let events: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let listener: Listener = Arc::new(move |ev: Event| {
        let sink = Arc::clone(&sink);
        Box::pin(async move {
            sink.lock().unwrap().push(ev.event_type);
        })
    });
    bus.subscribe("*", listener);

    let (audit, _worker) = AuditLog::start(dir.path().join("audit.log"), RotationPolicy::default());
    let upstream = Arc::new(upstream);
    let engine = SyncEngine::new(
        db.clone(),
        Arc::clone(&upstream) as Arc<dyn Upstream>,
        bus.clone(),
        audit,
        MetricsCollector::new(),
        1,
        3,
    );

    Harness {
        _dir: dir,
        db,
        bus,
        engine,
        upstream,
        events,
    }
}

pub fn count_of(events: &[String], event_type: &str) -> usize {
    events.iter().filter(|e| *e == event_type).count()
}
