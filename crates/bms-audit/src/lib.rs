//! Audit log, metrics registry, and component health checks.
//!
//! The audit log is append-only JSON Lines behind an async worker: callers
//! enqueue and the worker writes. The queue is bounded and the send is
//! awaited, so under backpressure callers block — entries are never
//! dropped.

mod audit;
mod health;
mod metrics;

pub use audit::{AuditEntry, AuditLog, AuditWorker, RotationPolicy};
pub use health::{ComponentHealth, HealthChecker, HealthSnapshot, HealthStatus, ProbeFn};
pub use metrics::{uptime_secs, MetricsCollector, MetricsSnapshot, SyncOutcome, RING_CAPACITY};
