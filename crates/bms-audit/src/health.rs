use crate::metrics::{resident_memory_bytes, uptime_secs};
use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

const GIB: u64 = 1024 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    fn worst(a: HealthStatus, b: HealthStatus) -> HealthStatus {
        use HealthStatus::*;
        match (a, b) {
            (Unhealthy, _) | (_, Unhealthy) => Unhealthy,
            (Degraded, _) | (_, Degraded) => Degraded,
            _ => Healthy,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub status: HealthStatus,
    pub last_checked: DateTime<Utc>,
    pub latency_ms: u64,
    pub message: String,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub status: HealthStatus,
    pub timestamp: DateTime<Utc>,
    pub components: BTreeMap<String, ComponentHealth>,
    pub version: String,
    pub uptime_seconds: u64,
}

/// Async probe for an external dependency. Err carries a human message.
pub type ProbeFn = Arc<dyn Fn() -> BoxFuture<'static, Result<(), String>> + Send + Sync>;

/// Component health checks: injected probes for database and api, built-in
/// disk and memory threshold checks.
pub struct HealthChecker {
    probes: Vec<(String, ProbeFn)>,
    disk_path: PathBuf,
    version: String,
}

impl HealthChecker {
    pub fn new(version: impl Into<String>, disk_path: impl Into<PathBuf>) -> Self {
        Self {
            probes: Vec::new(),
            disk_path: disk_path.into(),
            version: version.into(),
        }
    }

    /// Register a named probe ("database", "api").
    pub fn with_probe(mut self, name: &str, probe: ProbeFn) -> Self {
        self.probes.push((name.to_string(), probe));
        self
    }

    /// Run every check. Overall status is the worst component status.
    pub async fn check(&self) -> HealthSnapshot {
        let mut components = BTreeMap::new();

        for (name, probe) in &self.probes {
            let start = Instant::now();
            let result = probe().await;
            let latency_ms = start.elapsed().as_millis() as u64;
            let (status, message) = match result {
                Ok(()) => (HealthStatus::Healthy, "ok".to_string()),
                Err(msg) => (HealthStatus::Unhealthy, msg),
            };
            components.insert(
                name.clone(),
                ComponentHealth {
                    status,
                    last_checked: Utc::now(),
                    latency_ms,
                    message,
                    metadata: serde_json::Value::Null,
                },
            );
        }

        components.insert("disk".to_string(), self.check_disk());
        components.insert("memory".to_string(), check_memory());

        let status = components
            .values()
            .map(|c| c.status)
            .fold(HealthStatus::Healthy, HealthStatus::worst);

        HealthSnapshot {
            status,
            timestamp: Utc::now(),
            components,
            version: self.version.clone(),
            uptime_seconds: uptime_secs(),
        }
    }

    /// Disk pressure on the data directory: >95% used is unhealthy,
    /// >85% degraded.
    fn check_disk(&self) -> ComponentHealth {
        let (status, message, metadata) = match disk_used_fraction(&self.disk_path) {
            Some(used) => {
                let pct = used * 100.0;
                let status = if used > 0.95 {
                    HealthStatus::Unhealthy
                } else if used > 0.85 {
                    HealthStatus::Degraded
                } else {
                    HealthStatus::Healthy
                };
                (
                    status,
                    format!("{pct:.1}% used"),
                    serde_json::json!({ "used_percent": pct }),
                )
            }
            None => (
                HealthStatus::Healthy,
                "disk usage unavailable on this platform".to_string(),
                serde_json::Value::Null,
            ),
        };
        ComponentHealth {
            status,
            last_checked: Utc::now(),
            latency_ms: 0,
            message,
            metadata,
        }
    }
}

/// Resident memory thresholds: >2 GiB unhealthy, >1 GiB degraded.
fn check_memory() -> ComponentHealth {
    let rss = resident_memory_bytes();
    let status = if rss > 2 * GIB {
        HealthStatus::Unhealthy
    } else if rss > GIB {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    };
    ComponentHealth {
        status,
        last_checked: Utc::now(),
        latency_ms: 0,
        message: format!("{} MiB resident", rss / (1024 * 1024)),
        metadata: serde_json::json!({ "resident_bytes": rss }),
    }
}

#[cfg(unix)]
fn disk_used_fraction(path: &std::path::Path) -> Option<f64> {
    let stat = nix::sys::statvfs::statvfs(path).ok()?;
    let total = stat.blocks() as f64;
    if total == 0.0 {
        return None;
    }
    let avail = stat.blocks_available() as f64;
    Some(1.0 - avail / total)
}

#[cfg(not(unix))]
fn disk_used_fraction(_path: &std::path::Path) -> Option<f64> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn failing_probe_makes_overall_unhealthy() {
        let failing: ProbeFn = Arc::new(|| Box::pin(async { Err("connection refused".into()) }));
        let checker = HealthChecker::new("0.0.0-test", "/tmp").with_probe("database", failing);

        let snap = checker.check().await;
        assert_eq!(snap.status, HealthStatus::Unhealthy);
        assert_eq!(
            snap.components["database"].message,
            "connection refused"
        );
        assert!(snap.components.contains_key("disk"));
        assert!(snap.components.contains_key("memory"));
    }

    #[tokio::test]
    async fn healthy_probes_yield_healthy_overall() {
        let ok: ProbeFn = Arc::new(|| Box::pin(async { Ok(()) }));
        let checker = HealthChecker::new("0.0.0-test", "/tmp")
            .with_probe("database", Arc::clone(&ok))
            .with_probe("api", ok);

        let snap = checker.check().await;
        // Disk/memory on a test box are expected to be under thresholds.
        assert_ne!(snap.status, HealthStatus::Unhealthy);
        assert_eq!(snap.components.len(), 4);
    }

    #[test]
    fn worst_status_ordering() {
        use HealthStatus::*;
        assert_eq!(HealthStatus::worst(Healthy, Degraded), Degraded);
        assert_eq!(HealthStatus::worst(Degraded, Unhealthy), Unhealthy);
        assert_eq!(HealthStatus::worst(Healthy, Healthy), Healthy);
    }
}
