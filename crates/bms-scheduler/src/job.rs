use bms_actions::Action;
use bms_schemas::SyncType;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    #[error("invalid cron expression `{expr}`: {reason}")]
    Parse { expr: String, reason: String },

    #[error("unknown timezone `{0}`")]
    Timezone(String),

    #[error("jobs file {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("no such job: {0}")]
    NotFound(String),

    #[error("jobs file io: {0}")]
    Io(#[from] std::io::Error),
}

/// One persisted job. The wire shape of `scheduled_jobs.json` entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledJob {
    pub id: String,
    pub name: String,
    /// 5- or 6-field cron expression, or a descriptor like `@hourly`.
    pub schedule: String,
    pub sync_type: SyncType,
    pub enabled: bool,
    #[serde(default)]
    pub last_run: Option<DateTime<Utc>>,
    #[serde(default)]
    pub next_run: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_success: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub run_count: u64,
    #[serde(default)]
    pub error_count: u64,
    /// Post-run actions, executed only after a successful run.
    #[serde(default)]
    pub actions: Option<Vec<Action>>,
    /// IANA zone name; absent means UTC.
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub retry_on_error: bool,
    #[serde(default)]
    pub max_retries: u32,
}

impl ScheduledJob {
    pub fn new(id: &str, name: &str, schedule: &str, sync_type: SyncType) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            schedule: schedule.to_string(),
            sync_type,
            enabled: true,
            last_run: None,
            next_run: None,
            last_success: None,
            last_error: None,
            run_count: 0,
            error_count: 0,
            actions: None,
            timezone: None,
            retry_on_error: false,
            max_retries: 0,
        }
    }

    /// Parse this job's cron expression (normalized) and timezone.
    pub fn parse_schedule(&self) -> Result<(Schedule, Tz), ScheduleError> {
        let normalized = normalize_cron(&self.schedule);
        let schedule = Schedule::from_str(&normalized).map_err(|e| ScheduleError::Parse {
            expr: self.schedule.clone(),
            reason: e.to_string(),
        })?;
        let tz = match self.timezone.as_deref() {
            None | Some("") => chrono_tz::UTC,
            Some(name) => name
                .parse::<Tz>()
                .map_err(|_| ScheduleError::Timezone(name.to_string()))?,
        };
        Ok((schedule, tz))
    }

    /// Next fire time after `now`, evaluated in the job's timezone,
    /// reported in UTC.
    pub fn compute_next_run(&self, now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>, ScheduleError> {
        let (schedule, tz) = self.parse_schedule()?;
        Ok(schedule
            .after(&now.with_timezone(&tz))
            .next()
            .map(|t| t.with_timezone(&Utc)))
    }
}

/// Normalize user cron input for the parser, which wants a seconds field:
/// 5-field expressions get `0` seconds prepended, 6-field and descriptor
/// forms pass through.
pub fn normalize_cron(expr: &str) -> String {
    let expr = expr.trim();
    if expr.starts_with('@') {
        return expr.to_string();
    }
    match expr.split_whitespace().count() {
        5 => format!("0 {expr}"),
        _ => expr.to_string(),
    }
}

/// On-disk job map with atomic writes.
pub struct JobStore {
    path: PathBuf,
}

impl JobStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted map. A missing file is an empty map; a file
    /// that exists but does not parse is an error — never silently
    /// zeroed.
    pub fn load(&self) -> Result<BTreeMap<String, ScheduledJob>, ScheduleError> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let raw = fs::read_to_string(&self.path)?;
        if raw.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&raw).map_err(|e| ScheduleError::Corrupt {
            path: self.path.clone(),
            reason: e.to_string(),
        })
    }

    /// Write-temp-then-rename so a crash mid-write never corrupts the
    /// live file.
    pub fn save(&self, jobs: &BTreeMap<String, ScheduledJob>) -> Result<(), ScheduleError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        let body = serde_json::to_string_pretty(jobs).map_err(|e| ScheduleError::Corrupt {
            path: tmp.clone(),
            reason: e.to_string(),
        })?;
        fs::write(&tmp, body)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
