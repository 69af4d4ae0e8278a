//! Shared server state. Handlers receive `State<Arc<AppState>>`; this
//! module owns nothing async itself.

use bms_audit::{AuditLog, HealthChecker, MetricsCollector};
use bms_db::Db;
use bms_events::EventBus;

/// Webhook signing policy. `enabled` normally tracks "a secret is
/// configured"; constructing it enabled with an empty secret makes every
/// signed route answer 500, which is the documented misconfiguration
/// behavior.
#[derive(Debug, Clone)]
pub struct SigningConfig {
    pub enabled: bool,
    pub secret: String,
    pub timestamp_window_secs: i64,
}

impl SigningConfig {
    pub fn from_config(cfg: &bms_config::WebhookConfig) -> Self {
        Self {
            enabled: !cfg.secret.is_empty(),
            secret: cfg.secret.clone(),
            timestamp_window_secs: cfg.timestamp_window_seconds,
        }
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            secret: String::new(),
            timestamp_window_secs: 300,
        }
    }
}

/// Handle shared across all handlers.
pub struct AppState {
    pub db: Db,
    pub bus: EventBus,
    pub audit: AuditLog,
    pub metrics: MetricsCollector,
    pub health: HealthChecker,
    pub signing: SigningConfig,
    pub version: &'static str,
}
