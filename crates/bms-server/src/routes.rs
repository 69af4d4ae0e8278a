//! Axum router and HTTP handlers.
//!
//! `build_router` wires the webhook POST routes behind the signature
//! middleware plus the read-only `/health` and `/metrics` endpoints.
//! Middleware layers (tracing) are attached by `serve`, not here, so
//! tests can drive the bare router.

use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bms_audit::{AuditEntry, HealthStatus};
use bms_events::payloads::{types, WebhookReceived, WebhookRejected};
use bms_events::Event;
use bms_schemas::{Account, CheckIn, Route, UserProfile, WebhookLog};
use chrono::Utc;
use serde_json::json;
use tracing::warn;

use crate::signature::{
    self, SignatureError, LEGACY_SIGNATURE_HEADER, SIGNATURE_HEADER, TIMESTAMP_HEADER,
};
use crate::state::AppState;

const MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the complete application router wired to the given shared state.
pub fn build_router(state: Arc<AppState>) -> Router {
    let webhooks = Router::new()
        .route("/webhook/account/create", post(webhook_account_create))
        .route("/webhook/account/update", post(webhook_account_update))
        .route("/webhook/checkin", post(webhook_checkin))
        .route("/webhook/route", post(webhook_route))
        .route("/webhook/profile", post(webhook_profile))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            signature_middleware,
        ));

    // The same routes answer under the legacy `/api` prefix.
    Router::new()
        .merge(webhooks.clone())
        .nest("/api", webhooks)
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Signature middleware
// ---------------------------------------------------------------------------

/// Runs before any body parsing on `/webhook/*`. The raw body bytes are
/// captured once, verified, and restored onto the request untouched, so
/// the MAC input is exactly what arrived on the wire.
pub(crate) async fn signature_middleware(
    State(st): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    st.metrics.inc_counter("webhooks_received", &[]);

    let (parts, body) = req.into_parts();
    let bytes = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(b) => b,
        Err(_) => return StatusCode::PAYLOAD_TOO_LARGE.into_response(),
    };

    if st.signing.enabled {
        let sig_header = header_str(&parts.headers, SIGNATURE_HEADER)
            .or_else(|| header_str(&parts.headers, LEGACY_SIGNATURE_HEADER));
        let ts_header = header_str(&parts.headers, TIMESTAMP_HEADER);

        if let Err(e) = signature::verify(
            &st.signing.secret,
            &bytes,
            sig_header.as_deref(),
            ts_header.as_deref(),
            st.signing.timestamp_window_secs,
            Utc::now(),
        ) {
            return reject_delivery(&st, &parts, &bytes, e).await;
        }
    }

    let req = Request::from_parts(parts, Body::from(bytes));
    next.run(req).await
}

/// 401 for signature/timestamp trouble, 500 for a missing secret.
/// Rejections log a webhook row with `signature_valid=false` and a
/// structured security event; they never reach the entity tables.
async fn reject_delivery(
    st: &AppState,
    parts: &axum::http::request::Parts,
    body: &Bytes,
    err: SignatureError,
) -> Response {
    let uri = parts.uri.to_string();
    warn!(uri = %uri, error = %err, "rejected webhook delivery");

    let log = WebhookLog {
        received_at: Utc::now(),
        method: parts.method.to_string(),
        uri: uri.clone(),
        headers: headers_json(&parts.headers),
        body: String::from_utf8_lossy(body).into_owned(),
        signature_valid: false,
    };
    if let Err(e) = st.db.record_webhook_log(&log).await {
        warn!(error = %e, "failed to record rejected webhook");
    }

    st.audit
        .record(
            AuditEntry::failure("webhook", "server", "verify_signature", &uri, &err.to_string())
                .with_level("warn"),
        )
        .await;
    st.bus.dispatch(Event::new(
        types::WEBHOOK_REJECTED,
        "webhook",
        WebhookRejected {
            route: uri,
            reason: err.to_string(),
        },
    ));

    let status = if err.is_config_error() {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::UNAUTHORIZED
    };
    (status, Json(json!({ "error": err.to_string() }))).into_response()
}

// ---------------------------------------------------------------------------
// Webhook handlers — one per route, all converging on the pull-side merge
// ---------------------------------------------------------------------------

pub(crate) async fn webhook_account_create(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let account: Account = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => return bad_payload(&st, "/webhook/account/create", e).await,
    };
    match st.db.merge_account_basic(&account).await {
        Ok(()) => {
            accept_delivery(&st, "/webhook/account/create", &headers, &body, Some(account.id)).await
        }
        Err(e) => persist_failed(&st, "/webhook/account/create", e).await,
    }
}

pub(crate) async fn webhook_account_update(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let account: Account = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => return bad_payload(&st, "/webhook/account/update", e).await,
    };
    match st.db.merge_account(&account).await {
        Ok(()) => {
            accept_delivery(&st, "/webhook/account/update", &headers, &body, Some(account.id)).await
        }
        Err(e) => persist_failed(&st, "/webhook/account/update", e).await,
    }
}

pub(crate) async fn webhook_checkin(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let checkin: CheckIn = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => return bad_payload(&st, "/webhook/checkin", e).await,
    };
    match st.db.merge_checkin(&checkin).await {
        Ok(()) => accept_delivery(&st, "/webhook/checkin", &headers, &body, Some(checkin.id)).await,
        Err(e) => persist_failed(&st, "/webhook/checkin", e).await,
    }
}

pub(crate) async fn webhook_route(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let route: Route = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => return bad_payload(&st, "/webhook/route", e).await,
    };
    match st.db.merge_route(&route).await {
        Ok(()) => accept_delivery(&st, "/webhook/route", &headers, &body, Some(route.id)).await,
        Err(e) => persist_failed(&st, "/webhook/route", e).await,
    }
}

pub(crate) async fn webhook_profile(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let profile: UserProfile = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => return bad_payload(&st, "/webhook/profile", e).await,
    };
    match st.db.merge_profile(&profile).await {
        Ok(()) => accept_delivery(&st, "/webhook/profile", &headers, &body, Some(profile.id)).await,
        Err(e) => persist_failed(&st, "/webhook/profile", e).await,
    }
}

async fn accept_delivery(
    st: &AppState,
    route: &str,
    headers: &HeaderMap,
    body: &Bytes,
    entity_id: Option<i64>,
) -> Response {
    let log = WebhookLog {
        received_at: Utc::now(),
        method: "POST".to_string(),
        uri: route.to_string(),
        headers: headers_json(headers),
        body: String::from_utf8_lossy(body).into_owned(),
        signature_valid: true,
    };
    if let Err(e) = st.db.record_webhook_log(&log).await {
        warn!(error = %e, "failed to record webhook log");
    }

    st.metrics.inc_counter("webhooks_processed", &[]);
    st.bus.dispatch(Event::new(
        types::WEBHOOK_RECEIVED,
        "webhook",
        WebhookReceived {
            route: route.to_string(),
            entity_id,
        },
    ));
    (StatusCode::OK, Json(json!({ "status": "ok" }))).into_response()
}

async fn bad_payload(st: &AppState, route: &str, err: serde_json::Error) -> Response {
    warn!(route, error = %err, "webhook payload failed to parse");
    st.audit
        .record(
            AuditEntry::failure("webhook", "server", "parse", route, &err.to_string())
                .with_level("warn"),
        )
        .await;
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": format!("invalid payload: {err}") })),
    )
        .into_response()
}

async fn persist_failed(st: &AppState, route: &str, err: bms_db::DbError) -> Response {
    warn!(route, error = %err, "webhook persist failed");
    st.audit
        .record(AuditEntry::failure("webhook", "server", "persist", route, &err.to_string()))
        .await;
    st.bus.dispatch(Event::new(
        types::WEBHOOK_REJECTED,
        "webhook",
        WebhookRejected {
            route: route.to_string(),
            reason: err.to_string(),
        },
    ));
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": err.to_string() })),
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// GET /health and GET /metrics
// ---------------------------------------------------------------------------

pub(crate) async fn health(State(st): State<Arc<AppState>>) -> Response {
    let snapshot = st.health.check().await;
    let status = match snapshot.status {
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::OK,
    };
    (status, Json(snapshot)).into_response()
}

pub(crate) async fn metrics(State(st): State<Arc<AppState>>) -> Response {
    (StatusCode::OK, Json(st.metrics.snapshot())).into_response()
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn headers_json(headers: &HeaderMap) -> serde_json::Value {
    let map: serde_json::Map<String, serde_json::Value> = headers
        .iter()
        .map(|(k, v)| {
            (
                k.as_str().to_string(),
                serde_json::Value::String(String::from_utf8_lossy(v.as_bytes()).into_owned()),
            )
        })
        .collect();
    serde_json::Value::Object(map)
}
