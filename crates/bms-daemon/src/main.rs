//! bms-daemon entry point.
//!
//! Sets up config and tracing, writes the pid file, constructs the four
//! process singletons (event bus, scheduler, audit queue, metrics), wires
//! the pipelines, and runs the webhook server until a signal arrives.
//! Shutdown order: HTTP graceful (5 s) → scheduler → event bus drain
//! (5 s) → audit worker → pid file removal.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use bms_actions::ActionEngine;
use bms_api::{BadgerClient, Upstream};
use bms_audit::{AuditLog, HealthChecker, MetricsCollector, ProbeFn, RotationPolicy};
use bms_config::AppConfig;
use bms_daemon::executor::SyncExecutor;
use bms_daemon::exit::exit_code_for;
use bms_daemon::pidfile::PidFile;
use bms_db::Db;
use bms_events::EventBus;
use bms_scheduler::{JobStore, Scheduler};
use bms_server::{AppState, SigningConfig};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

#[derive(Debug, Parser)]
#[command(name = "bms-daemon", about = "BadgerMaps sync daemon")]
struct Args {
    /// Explicit config file (otherwise the per-OS config dir is used).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the pid file location.
    #[arg(long)]
    pid_file: Option<PathBuf>,

    /// Override the scheduled-jobs file location.
    #[arg(long)]
    jobs_file: Option<PathBuf>,

    /// Override the log level: debug | info | warn | error.
    #[arg(long)]
    log_level: Option<String>,

    /// Override the webhook server bind host.
    #[arg(long)]
    server_host: Option<String>,

    /// Override the webhook server bind port.
    #[arg(long)]
    server_port: Option<u16>,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env.local if present (dev convenience). Silent when absent —
    // production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("bms-daemon: {e:#}");
            ExitCode::from(exit_code_for(&e))
        }
    }
}

async fn run() -> Result<()> {
    let args = Args::parse();

    // Precedence: flags > env > file > defaults. `load` covers the last
    // three; flags overlay here.
    let config_path = args
        .config
        .or_else(|| std::env::var("CONFIG_FILE").ok().map(PathBuf::from));
    let mut cfg = AppConfig::load(config_path.as_deref())?;
    if let Some(v) = args.pid_file {
        cfg.paths.pid_file = Some(v);
    }
    if let Some(v) = args.jobs_file {
        cfg.paths.jobs_file = Some(v);
    }
    if let Some(v) = args.log_level {
        cfg.log.level = v;
    }
    if let Some(v) = args.server_host {
        cfg.server.host = v;
    }
    if let Some(v) = args.server_port {
        cfg.server.port = v;
    }
    cfg.validate()?;

    init_tracing(&cfg)?;
    debug!(config = ?cfg.redacted(), "effective configuration");

    let _pidfile = PidFile::create(cfg.pid_file())?;

    // Storage first: connect, then bring the schema up to date. Both are
    // fatal here.
    let db = Db::connect(&cfg).await.context("storage unavailable")?;
    db.enforce_schema().await.context("schema enforcement failed")?;

    let upstream: Arc<dyn Upstream> =
        Arc::new(BadgerClient::new(&cfg.api).context("bad api configuration")?);

    // The four process-wide singletons.
    let bus = EventBus::new();
    let metrics = MetricsCollector::new();
    let (audit, audit_worker) = AuditLog::start(
        bms_config::config_dir().join("audit.log"),
        RotationPolicy::default(),
    );

    let bindings = if cfg.actions.is_null() {
        Vec::new()
    } else {
        bms_actions::parse_bindings(&cfg.actions)
            .map_err(bms_config::ConfigError)
            .context("invalid action bindings")?
    };
    let actions = ActionEngine::new(bus.clone(), Some(db.clone()), bindings);
    actions.attach();

    let shutdown = CancellationToken::new();
    let engine = bms_sync::SyncEngine::new(
        db.clone(),
        Arc::clone(&upstream),
        bus.clone(),
        audit.clone(),
        metrics.clone(),
        cfg.api.max_concurrent_requests,
        3,
    );

    let scheduler = Scheduler::new(
        JobStore::new(cfg.jobs_file()),
        bus.clone(),
        audit.clone(),
        metrics.clone(),
        Arc::new(SyncExecutor::new(engine.clone(), shutdown.clone())),
        Some(Arc::clone(&actions)),
    );
    scheduler
        .start()
        .await
        .context("scheduler failed to start")?;

    let state = Arc::new(AppState {
        db: db.clone(),
        bus: bus.clone(),
        audit: audit.clone(),
        metrics: metrics.clone(),
        health: health_checker(&db, &upstream),
        signing: SigningConfig::from_config(&cfg.webhook),
        version: env!("CARGO_PKG_VERSION"),
    });

    // Run the server until a signal cancels it.
    let server = {
        let cfg = cfg.server.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { bms_server::serve(&cfg, state, shutdown).await })
    };

    wait_for_signal().await;
    info!("shutdown signal received");

    // The ladder: HTTP drains first so no new work arrives, then the
    // scheduler stops triggering, then listeners finish their queues.
    shutdown.cancel();
    match server.await {
        Ok(result) => result?,
        Err(e) => error!(error = %e, "server task panicked"),
    }
    scheduler.stop().await;
    if !bus.wait_for_drain(Duration::from_secs(5)).await {
        error!(pending = bus.pending_events(), "event bus did not drain");
    }
    // Audit producers must be gone before the worker can drain to empty.
    drop(scheduler);
    drop(engine);
    drop(audit);
    audit_worker.stop(Duration::from_secs(5)).await;

    info!("bms-daemon stopped");
    Ok(())
}

fn init_tracing(cfg: &AppConfig) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cfg.log.level));
    match &cfg.log.file {
        Some(path) => {
            let file = Arc::new(
                std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .with_context(|| format!("open log file {}", path.display()))?,
            );
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(move || Arc::clone(&file))
                .init();
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
    Ok(())
}

fn health_checker(db: &Db, upstream: &Arc<dyn Upstream>) -> HealthChecker {
    let db_probe: ProbeFn = {
        let db = db.clone();
        Arc::new(move || {
            let db = db.clone();
            Box::pin(async move { db.test_connection().await.map_err(|e| e.to_string()) })
        })
    };
    let api_probe: ProbeFn = {
        let upstream = Arc::clone(upstream);
        Arc::new(move || {
            let upstream = Arc::clone(&upstream);
            Box::pin(async move { upstream.ping().await.map_err(|e| e.to_string()) })
        })
    };
    HealthChecker::new(env!("CARGO_PKG_VERSION"), bms_config::config_dir())
        .with_probe("database", db_probe)
        .with_probe("api", api_probe)
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
