use crate::job::{JobStore, ScheduleError, ScheduledJob};
use async_trait::async_trait;
use bms_actions::ActionEngine;
use bms_audit::{AuditEntry, AuditLog, MetricsCollector};
use bms_events::payloads::{types, JobEvent, JobFailed};
use bms_events::{Event, EventBus};
use bms_schemas::SyncType;
use chrono::Utc;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Seam to the sync engine: the scheduler decides *when*, the executor
/// does the work for a `sync_type`.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn execute(&self, sync_type: SyncType) -> Result<(), String>;
}

/// Persisted cron scheduler. Reads (`get_jobs`, the tick) take the read
/// side of the job map lock; mutations take the write side.
pub struct Scheduler {
    inner: Arc<Inner>,
}

struct Inner {
    jobs: RwLock<BTreeMap<String, ScheduledJob>>,
    /// Job ids currently executing; concurrent runs of one id are skipped.
    running: Mutex<HashSet<String>>,
    store: JobStore,
    bus: EventBus,
    audit: AuditLog,
    metrics: MetricsCollector,
    executor: Arc<dyn JobExecutor>,
    actions: Option<Arc<ActionEngine>>,
    cancel: CancellationToken,
}

impl Scheduler {
    pub fn new(
        store: JobStore,
        bus: EventBus,
        audit: AuditLog,
        metrics: MetricsCollector,
        executor: Arc<dyn JobExecutor>,
        actions: Option<Arc<ActionEngine>>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                jobs: RwLock::new(BTreeMap::new()),
                running: Mutex::new(HashSet::new()),
                store,
                bus,
                audit,
                metrics,
                executor,
                actions,
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// Load the persisted jobs, validate them, compute next runs, and
    /// start the tick loop. A corrupt file fails here; an invalid cron
    /// expression only disables its own job.
    pub async fn start(&self) -> Result<(), ScheduleError> {
        let mut jobs = self.inner.store.load()?;

        let now = Utc::now();
        for job in jobs.values_mut() {
            if !job.enabled {
                continue;
            }
            match job.compute_next_run(now) {
                Ok(next) => job.next_run = next,
                Err(e) => {
                    warn!(job_id = %job.id, error = %e, "disabling job with invalid schedule");
                    job.enabled = false;
                    job.last_error = Some(e.to_string());
                    self.inner
                        .audit
                        .record(
                            AuditEntry::failure(
                                "scheduler",
                                "scheduler",
                                "validate",
                                "job",
                                &e.to_string(),
                            )
                            .with_resource_id(&job.id),
                        )
                        .await;
                    self.inner.bus.dispatch(Event::new(
                        types::JOB_FAILED,
                        "scheduler",
                        JobFailed {
                            job_id: job.id.clone(),
                            name: job.name.clone(),
                            attempt: 0,
                            message: e.to_string(),
                        },
                    ));
                }
            }
            self.inner.metrics.inc_counter("jobs_scheduled", &[]);
        }

        *self.inner.jobs.write().await = jobs;
        self.persist().await?;

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            tick_loop(inner).await;
        });
        info!("scheduler started");
        Ok(())
    }

    /// Stop the tick loop. In-flight job executions finish on their own
    /// tasks; new triggers stop immediately.
    pub async fn stop(&self) {
        self.inner.cancel.cancel();
        info!("scheduler stopped");
    }

    pub async fn get_jobs(&self) -> Vec<ScheduledJob> {
        self.inner.jobs.read().await.values().cloned().collect()
    }

    pub async fn get_job(&self, id: &str) -> Option<ScheduledJob> {
        self.inner.jobs.read().await.get(id).cloned()
    }

    /// Add (or replace) a job. The change event fires before this
    /// returns.
    pub async fn add_job(&self, mut job: ScheduledJob) -> Result<(), ScheduleError> {
        job.parse_schedule()?;
        job.next_run = job.compute_next_run(Utc::now())?;
        let id = job.id.clone();
        self.inner.jobs.write().await.insert(id.clone(), job);
        self.persist().await?;
        self.inner.metrics.inc_counter("jobs_scheduled", &[]);
        self.dispatch_changed(&id, "added").await;
        Ok(())
    }

    pub async fn update_job(&self, job: ScheduledJob) -> Result<(), ScheduleError> {
        job.parse_schedule()?;
        let id = job.id.clone();
        {
            let mut jobs = self.inner.jobs.write().await;
            let mut job = job;
            job.next_run = job.compute_next_run(Utc::now())?;
            jobs.insert(id.clone(), job);
        }
        self.persist().await?;
        self.dispatch_changed(&id, "updated").await;
        Ok(())
    }

    pub async fn remove_job(&self, id: &str) -> Result<bool, ScheduleError> {
        let removed = self.inner.jobs.write().await.remove(id).is_some();
        if removed {
            self.persist().await?;
            self.dispatch_changed(id, "removed").await;
        }
        Ok(removed)
    }

    /// Trigger a job immediately, outside its schedule. Still serialized
    /// against scheduled runs of the same id.
    pub async fn run_job_now(&self, id: &str) -> Result<(), ScheduleError> {
        let job = self.inner.jobs.read().await.get(id).cloned();
        match job {
            Some(job) => {
                execute_job(Arc::clone(&self.inner), job).await;
                Ok(())
            }
            None => Err(ScheduleError::NotFound(id.to_string())),
        }
    }

    async fn dispatch_changed(&self, id: &str, what: &str) {
        self.inner.bus.dispatch(Event::new(
            types::JOB_CHANGED,
            "scheduler",
            serde_json::json!({ "job_id": id, "change": what }),
        ));
    }

    async fn persist(&self) -> Result<(), ScheduleError> {
        let jobs = self.inner.jobs.read().await;
        self.inner.store.save(&jobs)
    }
}

/// 1-second due check; every 60th tick also recomputes next_run across
/// the map so UIs observe clock drift corrections.
async fn tick_loop(inner: Arc<Inner>) {
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut ticks: u64 = 0;

    loop {
        tokio::select! {
            _ = inner.cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }
        ticks += 1;

        let now = Utc::now();
        let due: Vec<ScheduledJob> = {
            let jobs = inner.jobs.read().await;
            jobs.values()
                .filter(|j| j.enabled && j.next_run.map_or(false, |t| t <= now))
                .cloned()
                .collect()
        };

        for job in due {
            let inner = Arc::clone(&inner);
            tokio::spawn(async move {
                execute_job(inner, job).await;
            });
        }

        if ticks % 60 == 0 {
            let mut jobs = inner.jobs.write().await;
            for job in jobs.values_mut().filter(|j| j.enabled) {
                if let Ok(next) = job.compute_next_run(now) {
                    // Only move forward; an imminent fire keeps its slot.
                    if job.next_run.map_or(true, |t| t < now) {
                        job.next_run = next;
                    }
                }
            }
        }
    }
}

/// One trigger: count the run once, retry inside with square backoff,
/// recompute next_run and persist at the end.
async fn execute_job(inner: Arc<Inner>, job: ScheduledJob) {
    {
        let mut running = inner.running.lock().await;
        if !running.insert(job.id.clone()) {
            warn!(job_id = %job.id, "skipping concurrent execution");
            return;
        }
    }

    let now = Utc::now();
    {
        let mut jobs = inner.jobs.write().await;
        if let Some(j) = jobs.get_mut(&job.id) {
            j.last_run = Some(now);
            j.run_count += 1;
            // Recompute immediately so the due check does not re-trigger
            // while this run is in flight.
            if let Ok(next) = j.compute_next_run(now) {
                j.next_run = next;
            }
        }
    }

    inner.metrics.inc_counter("jobs_executed", &[]);
    inner
        .audit
        .record(
            AuditEntry::success("scheduler", "scheduler", "trigger", "job")
                .with_resource_id(&job.id),
        )
        .await;
    inner.bus.dispatch(Event::new(
        types::JOB_TRIGGERED,
        "scheduler",
        JobEvent {
            job_id: job.id.clone(),
            name: job.name.clone(),
            sync_type: job.sync_type.as_str().to_string(),
        },
    ));

    let mut attempt: u32 = 0;
    let outcome = loop {
        match inner.executor.execute(job.sync_type).await {
            Ok(()) => break Ok(()),
            Err(e) => {
                attempt += 1;
                if job.retry_on_error && attempt <= job.max_retries {
                    let delay = Duration::from_secs(u64::from(attempt * attempt));
                    warn!(
                        job_id = %job.id,
                        attempt,
                        delay_secs = delay.as_secs(),
                        error = %e,
                        "job failed, retrying"
                    );
                    inner
                        .audit
                        .record(
                            AuditEntry::failure("scheduler", "scheduler", "retry", "job", &e)
                                .with_resource_id(&job.id)
                                .with_level("warn")
                                .with_metadata(serde_json::json!({
                                    "attempt": attempt,
                                    "delay_secs": delay.as_secs(),
                                })),
                        )
                        .await;
                    tokio::time::sleep(delay).await;
                    continue;
                }
                break Err(e);
            }
        }
    };

    let finished = Utc::now();
    match outcome {
        Ok(()) => {
            inner.metrics.inc_counter("jobs_success", &[]);
            {
                let mut jobs = inner.jobs.write().await;
                if let Some(j) = jobs.get_mut(&job.id) {
                    j.last_success = Some(finished);
                    j.last_error = None;
                }
            }
            let event = Event::new(
                types::JOB_COMPLETED,
                "scheduler",
                JobEvent {
                    job_id: job.id.clone(),
                    name: job.name.clone(),
                    sync_type: job.sync_type.as_str().to_string(),
                },
            );
            inner.bus.dispatch(event.clone());
            inner
                .audit
                .record(
                    AuditEntry::success("scheduler", "scheduler", "complete", "job")
                        .with_resource_id(&job.id),
                )
                .await;
            // Post-run actions fire only on success.
            if let (Some(engine), Some(actions)) = (&inner.actions, &job.actions) {
                engine.run_actions(actions, &event, &job.id).await;
            }
        }
        Err(e) => {
            error!(job_id = %job.id, error = %e, "job failed");
            inner.metrics.inc_counter("jobs_failed", &[]);
            {
                let mut jobs = inner.jobs.write().await;
                if let Some(j) = jobs.get_mut(&job.id) {
                    j.error_count += 1;
                    j.last_error = Some(e.clone());
                }
            }
            inner.bus.dispatch(Event::new(
                types::JOB_FAILED,
                "scheduler",
                JobFailed {
                    job_id: job.id.clone(),
                    name: job.name.clone(),
                    attempt,
                    message: e,
                },
            ));
        }
    }

    {
        let jobs = inner.jobs.read().await;
        if let Err(e) = inner.store.save(&jobs) {
            error!(error = %e, "failed to persist jobs after run");
        }
    }

    inner.running.lock().await.remove(&job.id);
}
