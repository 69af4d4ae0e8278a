use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::error;

/// One audit record. Written as a single canonical JSON line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Operation class: "sync", "scheduler", "webhook", "action", "system".
    pub op_type: String,
    /// Component that produced the entry.
    pub source: String,
    pub action: String,
    pub resource: String,
    pub resource_id: Option<String>,
    pub success: bool,
    /// "debug" | "info" | "warn" | "error"
    pub level: String,
    pub metadata: Value,
    pub timestamp: DateTime<Utc>,
}

impl AuditEntry {
    pub fn success(op_type: &str, source: &str, action: &str, resource: &str) -> Self {
        Self {
            op_type: op_type.to_string(),
            source: source.to_string(),
            action: action.to_string(),
            resource: resource.to_string(),
            resource_id: None,
            success: true,
            level: "info".to_string(),
            metadata: Value::Null,
            timestamp: Utc::now(),
        }
    }

    pub fn failure(op_type: &str, source: &str, action: &str, resource: &str, msg: &str) -> Self {
        Self {
            op_type: op_type.to_string(),
            source: source.to_string(),
            action: action.to_string(),
            resource: resource.to_string(),
            resource_id: None,
            success: false,
            level: "error".to_string(),
            metadata: serde_json::json!({ "error": msg }),
            timestamp: Utc::now(),
        }
    }

    pub fn with_resource_id(mut self, id: impl ToString) -> Self {
        self.resource_id = Some(id.to_string());
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_level(mut self, level: &str) -> Self {
        self.level = level.to_string();
        self
    }
}

/// Size/age rotation limits for the on-disk log.
#[derive(Debug, Clone)]
pub struct RotationPolicy {
    pub max_bytes: u64,
    pub max_age: Duration,
}

impl Default for RotationPolicy {
    fn default() -> Self {
        Self {
            max_bytes: 32 * 1024 * 1024,
            max_age: Duration::from_secs(30 * 24 * 3600),
        }
    }
}

/// Cloneable producer handle. `record` awaits the enqueue; a full queue
/// blocks the caller rather than dropping the entry.
#[derive(Clone)]
pub struct AuditLog {
    tx: mpsc::Sender<AuditEntry>,
}

/// Owns the writer task. Stop it last, after every producer is done.
pub struct AuditWorker {
    handle: JoinHandle<()>,
}

impl AuditLog {
    /// Spawn the writer task and return the producer handle + worker.
    pub fn start(path: impl Into<PathBuf>, policy: RotationPolicy) -> (AuditLog, AuditWorker) {
        let path = path.into();
        let (tx, mut rx) = mpsc::channel::<AuditEntry>(1024);

        let handle = tokio::spawn(async move {
            let mut writer = FileWriter::new(path, policy);
            while let Some(entry) = rx.recv().await {
                if let Err(e) = writer.append(&entry) {
                    error!(error = %e, "audit write failed");
                }
            }
        });

        (AuditLog { tx }, AuditWorker { handle })
    }

    pub async fn record(&self, entry: AuditEntry) {
        // Receiver gone means shutdown is already past the audit stage;
        // nothing useful left to do with the entry.
        let _ = self.tx.send(entry).await;
    }
}

impl AuditWorker {
    /// Wait for the writer to drain and exit. The caller must drop every
    /// `AuditLog` clone first or this will ride out the full timeout.
    pub async fn stop(self, timeout: Duration) {
        if tokio::time::timeout(timeout, self.handle).await.is_err() {
            error!("audit worker did not drain within timeout");
        }
    }
}

// ---------------------------------------------------------------------------
// File writer (runs on the worker task only)
// ---------------------------------------------------------------------------

struct FileWriter {
    path: PathBuf,
    policy: RotationPolicy,
    opened_at: DateTime<Utc>,
}

impl FileWriter {
    fn new(path: PathBuf, policy: RotationPolicy) -> Self {
        Self {
            path,
            policy,
            opened_at: Utc::now(),
        }
    }

    fn append(&mut self, entry: &AuditEntry) -> Result<()> {
        self.rotate_if_needed()?;
        let line = canonical_json_line(entry)?;
        append_line(&self.path, &line)
    }

    fn rotate_if_needed(&mut self) -> Result<()> {
        let size = fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0);
        let age = Utc::now()
            .signed_duration_since(self.opened_at)
            .to_std()
            .unwrap_or_default();
        if size < self.policy.max_bytes && age < self.policy.max_age {
            return Ok(());
        }
        if size == 0 {
            self.opened_at = Utc::now();
            return Ok(());
        }
        let rotated = self.path.with_extension(format!(
            "log.{}",
            Utc::now().format("%Y%m%dT%H%M%S")
        ));
        fs::rename(&self.path, &rotated)
            .with_context(|| format!("rotate audit log to {rotated:?}"))?;
        self.opened_at = Utc::now();
        Ok(())
    }
}

/// Write a single line to file (with trailing newline).
fn append_line(path: &Path, line: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create_dir_all {parent:?}"))?;
    }
    let mut f = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open audit log {path:?}"))?;
    f.write_all(line.as_bytes())
        .context("write audit line failed")?;
    f.write_all(b"\n").context("write newline failed")?;
    Ok(())
}

/// Canonicalize by sorting keys recursively and emitting compact JSON.
/// One entry == one JSON line.
fn canonical_json_line<T: Serialize>(v: &T) -> Result<String> {
    let raw = serde_json::to_value(v).context("serialize audit entry failed")?;
    let sorted = sort_keys(&raw);
    serde_json::to_string(&sorted).context("json stringify failed")
}

fn sort_keys(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().cloned().collect();
            keys.sort();
            let mut new = serde_json::Map::new();
            for k in keys {
                new.insert(k.clone(), sort_keys(&map[&k]));
            }
            Value::Object(new)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_keys).collect()),
        _ => v.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn entries_land_as_sorted_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        let (log, worker) = AuditLog::start(&path, RotationPolicy::default());

        log.record(AuditEntry::success("sync", "pull", "merge", "accounts")).await;
        log.record(
            AuditEntry::failure("webhook", "server", "verify", "signature", "bad hmac")
                .with_resource_id(17),
        )
        .await;

        drop(log);
        worker.stop(Duration::from_secs(5)).await;

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["op_type"], "sync");
        assert_eq!(first["success"], true);
        let second: Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["resource_id"], "17");
        assert_eq!(second["metadata"]["error"], "bad hmac");
    }

    #[tokio::test]
    async fn size_rotation_moves_the_old_file_aside() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        let policy = RotationPolicy {
            max_bytes: 256,
            max_age: Duration::from_secs(3600),
        };
        let (log, worker) = AuditLog::start(&path, policy);

        for i in 0..20 {
            log.record(
                AuditEntry::success("system", "test", "fill", "rotation").with_resource_id(i),
            )
            .await;
        }
        drop(log);
        worker.stop(Duration::from_secs(5)).await;

        let rotated = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains("log.2"))
            .count();
        assert!(rotated >= 1, "expected at least one rotated file");
        assert!(path.exists(), "active log should still exist");
    }
}
