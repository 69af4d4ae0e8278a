use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

mod layered;

pub use layered::{canonicalize_json, deep_merge, load_layered_yaml, LoadedConfig};

/// Raised for unusable configuration: unknown dialect, missing required
/// keys, malformed numbers. Fatal to the hosting operation.
#[derive(Debug, thiserror::Error)]
#[error("config error: {0}")]
pub struct ConfigError(pub String);

/// Storage dialect selector. SQLite is the default and must be
/// file-creatable without any server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DbType {
    Sqlite,
    Postgres,
    Mssql,
}

impl DbType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DbType::Sqlite => "sqlite",
            DbType::Postgres => "postgres",
            DbType::Mssql => "mssql",
        }
    }

    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        match s.to_ascii_lowercase().as_str() {
            "sqlite" => Ok(DbType::Sqlite),
            "postgres" | "postgresql" => Ok(DbType::Postgres),
            "mssql" | "sqlserver" => Ok(DbType::Mssql),
            other => Err(ConfigError(format!("unknown DB_TYPE: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DbConfig {
    #[serde(rename = "type")]
    pub db_type: DbType,
    pub host: String,
    pub port: u16,
    pub name: String,
    pub user: String,
    pub password: String,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            db_type: DbType::Sqlite,
            host: "localhost".to_string(),
            port: 5432,
            name: "badgermaps.db".to_string(),
            user: String::new(),
            password: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub url: String,
    pub key: String,
    pub rate_limit_requests: u32,
    /// Window for `rate_limit_requests`, in seconds.
    pub rate_limit_period: u64,
    pub max_concurrent_requests: usize,
    pub request_timeout_secs: u64,
    /// Attempts per logical request before a retriable failure surfaces.
    pub retry_max_attempts: u32,
    /// Backoff ceiling between attempts, in seconds.
    pub retry_backoff_cap_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            url: "https://api.badgermapping.com/v2".to_string(),
            key: String::new(),
            rate_limit_requests: 60,
            rate_limit_period: 60,
            max_concurrent_requests: 5,
            request_timeout_secs: 30,
            retry_max_attempts: 5,
            retry_backoff_cap_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub tls_enabled: bool,
    pub tls_cert: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            tls_enabled: false,
            tls_cert: None,
            tls_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    /// Shared HMAC secret. Empty disables signature verification.
    pub secret: String,
    /// Accepted skew around `X-Webhook-Timestamp`, in seconds.
    pub timestamp_window_seconds: i64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            timestamp_window_seconds: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// debug | info | warn | error
    pub level: String,
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PathsConfig {
    pub pid_file: Option<PathBuf>,
    pub jobs_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub db: DbConfig,
    pub api: ApiConfig,
    pub server: ServerConfig,
    pub webhook: WebhookConfig,
    pub log: LogConfig,
    pub paths: PathsConfig,
    /// Declarative event→action bindings, parsed by the action engine.
    pub actions: Value,
}

impl AppConfig {
    /// Load with the documented precedence: defaults ← config file ← env.
    /// CLI flag overrides are applied by the caller after this returns.
    ///
    /// `explicit_file` wins over the conventional location; a missing
    /// explicit file is an error, a missing conventional file is not.
    pub fn load(explicit_file: Option<&Path>) -> Result<Self> {
        let mut merged = serde_json::to_value(AppConfig::default())
            .context("serialize default config")?;

        let file = match explicit_file {
            Some(p) => {
                if !p.exists() {
                    return Err(ConfigError(format!("config file not found: {}", p.display()))
                        .into());
                }
                Some(p.to_path_buf())
            }
            None => {
                let conventional = config_dir().join("config.yaml");
                conventional.exists().then_some(conventional)
            }
        };

        if let Some(path) = file {
            let loaded = load_layered_yaml(&[path.as_path()])?;
            deep_merge(&mut merged, loaded.config_json);
        }

        let mut cfg: AppConfig =
            serde_json::from_value(merged).context("config file has wrong shape")?;
        cfg.apply_env();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Overlay recognized environment variables onto the current values.
    pub fn apply_env(&mut self) {
        if let Some(v) = env_str("DB_TYPE") {
            if let Ok(t) = DbType::parse(&v) {
                self.db.db_type = t;
            }
        }
        if let Some(v) = env_str("DB_HOST") {
            self.db.host = v;
        }
        if let Some(v) = env_parse::<u16>("DB_PORT") {
            self.db.port = v;
        }
        if let Some(v) = env_str("DB_NAME") {
            self.db.name = v;
        }
        if let Some(v) = env_str("DB_USER") {
            self.db.user = v;
        }
        if let Some(v) = env_str("DB_PASSWORD") {
            self.db.password = v;
        }

        if let Some(v) = env_str("API_URL") {
            self.api.url = v;
        }
        if let Some(v) = env_str("API_KEY") {
            self.api.key = v;
        }
        if let Some(v) = env_parse::<u32>("RATE_LIMIT_REQUESTS") {
            self.api.rate_limit_requests = v;
        }
        if let Some(v) = env_parse::<u64>("RATE_LIMIT_PERIOD") {
            self.api.rate_limit_period = v;
        }
        if let Some(v) = env_parse::<usize>("MAX_CONCURRENT_REQUESTS") {
            self.api.max_concurrent_requests = v;
        }

        if let Some(v) = env_str("SERVER_HOST") {
            self.server.host = v;
        }
        if let Some(v) = env_parse::<u16>("SERVER_PORT") {
            self.server.port = v;
        }
        if let Some(v) = env_parse::<bool>("SERVER_TLS_ENABLED") {
            self.server.tls_enabled = v;
        }
        if let Some(v) = env_str("SERVER_TLS_CERT") {
            self.server.tls_cert = Some(PathBuf::from(v));
        }
        if let Some(v) = env_str("SERVER_TLS_KEY") {
            self.server.tls_key = Some(PathBuf::from(v));
        }

        if let Some(v) = env_str("WEBHOOK_SECRET") {
            self.webhook.secret = v;
        }
        if let Some(v) = env_parse::<i64>("WEBHOOK_TIMESTAMP_WINDOW_SECONDS") {
            self.webhook.timestamp_window_seconds = v;
        }

        if let Some(v) = env_str("LOG_LEVEL") {
            self.log.level = v;
        }
        if let Some(v) = env_str("LOG_FILE") {
            self.log.file = Some(PathBuf::from(v));
        }
        if let Some(v) = env_str("PID_FILE") {
            self.paths.pid_file = Some(PathBuf::from(v));
        }
        if let Some(v) = env_str("JOBS_FILE") {
            self.paths.jobs_file = Some(PathBuf::from(v));
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.log.level.as_str() {
            "debug" | "info" | "warn" | "error" => {}
            other => return Err(ConfigError(format!("unknown LOG_LEVEL: {other}"))),
        }
        if self.server.tls_enabled && (self.server.tls_cert.is_none() || self.server.tls_key.is_none())
        {
            return Err(ConfigError(
                "SERVER_TLS_ENABLED requires SERVER_TLS_CERT and SERVER_TLS_KEY".to_string(),
            ));
        }
        if self.api.rate_limit_requests == 0 || self.api.rate_limit_period == 0 {
            return Err(ConfigError(
                "rate limit requests and period must be > 0".to_string(),
            ));
        }
        if self.webhook.timestamp_window_seconds < 0 {
            return Err(ConfigError(
                "WEBHOOK_TIMESTAMP_WINDOW_SECONDS must be >= 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Copy with secrets masked, safe to log at startup.
    pub fn redacted(&self) -> AppConfig {
        let mut c = self.clone();
        if !c.api.key.is_empty() {
            c.api.key = "********".to_string();
        }
        if !c.db.password.is_empty() {
            c.db.password = "********".to_string();
        }
        if !c.webhook.secret.is_empty() {
            c.webhook.secret = "********".to_string();
        }
        c
    }

    /// Resolved pid file path (configured or alongside the config dir).
    pub fn pid_file(&self) -> PathBuf {
        self.paths
            .pid_file
            .clone()
            .unwrap_or_else(|| config_dir().join("badgermaps.pid"))
    }

    /// Resolved scheduled-jobs file path.
    pub fn jobs_file(&self) -> PathBuf {
        self.paths
            .jobs_file
            .clone()
            .unwrap_or_else(|| config_dir().join("scheduled_jobs.json"))
    }

    /// Default on-disk SQLite location when `DB_NAME` is a bare file name.
    pub fn sqlite_path(&self) -> PathBuf {
        let name = Path::new(&self.db.name);
        if name.is_absolute() {
            name.to_path_buf()
        } else {
            config_dir().join(name)
        }
    }
}

/// Per-OS configuration directory; created on first use.
pub fn config_dir() -> PathBuf {
    let dir = dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("badgermaps");
    let _ = fs::create_dir_all(&dir);
    dir
}

fn env_str(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_str(key)?.parse().ok()
}

/// Stable fingerprint of the effective config, for audit records.
pub fn config_hash(cfg: &AppConfig) -> Result<String> {
    let v: Value = serde_json::to_value(cfg).context("serialize config for hashing")?;
    let canonical = canonicalize_json(&v);
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_point_at_sqlite() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.db.db_type, DbType::Sqlite);
        assert_eq!(cfg.api.url, "https://api.badgermapping.com/v2");
        assert_eq!(cfg.webhook.timestamp_window_seconds, 300);
    }

    #[test]
    fn db_type_parse_accepts_aliases() {
        assert_eq!(DbType::parse("postgresql").unwrap(), DbType::Postgres);
        assert_eq!(DbType::parse("SQLSERVER").unwrap(), DbType::Mssql);
        assert!(DbType::parse("oracle").is_err());
    }

    #[test]
    fn tls_requires_cert_and_key() {
        let mut cfg = AppConfig::default();
        cfg.server.tls_enabled = true;
        assert!(cfg.validate().is_err());
        cfg.server.tls_cert = Some(PathBuf::from("cert.pem"));
        cfg.server.tls_key = Some(PathBuf::from("key.pem"));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn redacted_masks_secrets() {
        let mut cfg = AppConfig::default();
        cfg.api.key = "sekrit".to_string();
        cfg.webhook.secret = "topsecret".to_string();
        let red = cfg.redacted();
        assert_eq!(red.api.key, "********");
        assert_eq!(red.webhook.secret, "********");
        // Original untouched.
        assert_eq!(cfg.api.key, "sekrit");
    }
}
