use crate::routes::build_router;
use crate::state::AppState;
use anyhow::{Context, Result};
use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use bms_config::ServerConfig;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{info, Level};

/// Bind and run the server until `shutdown` fires; in-flight requests get
/// a 5-second grace period. TLS is optional and file-configured.
pub async fn serve(
    cfg: &ServerConfig,
    state: Arc<AppState>,
    shutdown: CancellationToken,
) -> Result<()> {
    let app = build_router(state).layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    );

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .with_context(|| format!("bad server address {}:{}", cfg.host, cfg.port))?;

    let handle = Handle::new();
    {
        let handle = handle.clone();
        tokio::spawn(async move {
            shutdown.cancelled().await;
            handle.graceful_shutdown(Some(Duration::from_secs(5)));
        });
    }

    if cfg.tls_enabled {
        let (cert, key) = match (&cfg.tls_cert, &cfg.tls_key) {
            (Some(c), Some(k)) => (c.clone(), k.clone()),
            _ => anyhow::bail!("tls enabled but cert/key paths are missing"),
        };
        let tls = RustlsConfig::from_pem_file(&cert, &key)
            .await
            .with_context(|| format!("load tls material from {cert:?} / {key:?}"))?;
        info!("listening on https://{addr}");
        axum_server::bind_rustls(addr, tls)
            .handle(handle)
            .serve(app.into_make_service())
            .await
            .context("server crashed")?;
    } else {
        info!("listening on http://{addr}");
        axum_server::bind(addr)
            .handle(handle)
            .serve(app.into_make_service())
            .await
            .context("server crashed")?;
    }

    Ok(())
}
