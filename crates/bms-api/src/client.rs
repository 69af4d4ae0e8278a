use crate::error::ApiError;
use async_trait::async_trait;
use bms_config::ApiConfig;
use bms_schemas::{Account, CheckIn, Route, UserProfile};
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use rand::Rng;
use reqwest::{Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::num::NonZeroU32;
use std::time::Duration;
use tracing::{debug, warn};

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// The seam pipelines and tests inject against. `BadgerClient` is the
/// live adapter; stubs implement this directly.
#[async_trait]
pub trait Upstream: Send + Sync {
    async fn get_account_ids(&self) -> Result<Vec<i64>, ApiError>;
    async fn get_account(&self, id: i64) -> Result<Account, ApiError>;
    async fn get_checkins_for_account(&self, id: i64) -> Result<Vec<CheckIn>, ApiError>;
    async fn get_routes(&self) -> Result<Vec<Route>, ApiError>;
    async fn get_route(&self, id: i64) -> Result<Route, ApiError>;
    async fn get_user_profile(&self) -> Result<UserProfile, ApiError>;
    /// Partial update of one upstream resource. `fields` is a flat object.
    async fn patch(&self, resource: &str, id: i64, fields: &Value) -> Result<(), ApiError>;
    /// Escape hatch for endpoints without a typed wrapper.
    async fn raw_request(
        &self,
        method: &str,
        path: &str,
        form: &[(String, String)],
    ) -> Result<Vec<u8>, ApiError>;
    /// Cheap reachability probe for health checks.
    async fn ping(&self) -> Result<(), ApiError>;
}

/// Live HTTP adapter. Owns the reqwest client, the auth header, the
/// token-bucket rate limiter, and the retry loop.
pub struct BadgerClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    limiter: DirectLimiter,
    retry_max_attempts: u32,
    retry_cap: Duration,
}

impl BadgerClient {
    pub fn new(cfg: &ApiConfig) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.request_timeout_secs))
            .build()?;

        let burst = NonZeroU32::new(cfg.rate_limit_requests.max(1)).unwrap();
        let per_request =
            Duration::from_secs(cfg.rate_limit_period.max(1)).div_f64(f64::from(burst.get()));
        let quota = Quota::with_period(per_request)
            .expect("non-zero rate limit period")
            .allow_burst(burst);

        Ok(Self {
            http,
            base_url: cfg.url.trim_end_matches('/').to_string(),
            api_key: cfg.key.clone(),
            limiter: RateLimiter::direct(quota),
            retry_max_attempts: cfg.retry_max_attempts.max(1),
            retry_cap: Duration::from_secs(cfg.retry_backoff_cap_secs.max(1)),
        })
    }

    /// One classified attempt, no retries.
    async fn send_once(
        &self,
        method: Method,
        path: &str,
        json_body: Option<&Value>,
        form: Option<&[(String, String)]>,
    ) -> Result<Response, ApiError> {
        let url = format!("{}{}", self.base_url, path);
        let mut req = self
            .http
            .request(method, &url)
            .header("Authorization", format!("Token {}", self.api_key));
        if let Some(body) = json_body {
            req = req.json(body);
        }
        if let Some(form) = form {
            req = req.form(form);
        }

        let resp = req.send().await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let retry_after = resp
            .headers()
            .get("Retry-After")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        let body = resp.text().await.unwrap_or_default();
        Err(classify_status(status, retry_after, path, body))
    }

    /// Full request with the retry budget applied. Rate-limit responses
    /// sleep the server's recommendation; transient and network errors
    /// back off exponentially with jitter, capped.
    async fn request(
        &self,
        method: Method,
        path: &str,
        json_body: Option<&Value>,
        form: Option<&[(String, String)]>,
    ) -> Result<Response, ApiError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            self.limiter.until_ready().await;

            match self.send_once(method.clone(), path, json_body, form).await {
                Ok(resp) => return Ok(resp),
                Err(e) if e.is_retriable() && attempt < self.retry_max_attempts => {
                    let delay = match &e {
                        ApiError::RateLimited {
                            retry_after_secs: Some(s),
                        } => Duration::from_secs(*s).min(self.retry_cap),
                        _ => backoff_delay(attempt, self.retry_cap),
                    };
                    warn!(
                        path,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying upstream request"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let resp = self.request(Method::GET, path, None, None).await?;
        let text = resp.text().await?;
        serde_json::from_str(&text)
            .map_err(|e| ApiError::Decode(format!("{path}: {e}")))
    }
}

#[async_trait]
impl Upstream for BadgerClient {
    async fn get_account_ids(&self) -> Result<Vec<i64>, ApiError> {
        let rows: Vec<Value> = self.get_json("/customers/").await?;
        debug!(count = rows.len(), "fetched account id list");
        Ok(rows
            .iter()
            .filter_map(|v| v.get("id").and_then(Value::as_i64))
            .collect())
    }

    async fn get_account(&self, id: i64) -> Result<Account, ApiError> {
        self.get_json(&format!("/customers/{id}/")).await
    }

    async fn get_checkins_for_account(&self, id: i64) -> Result<Vec<CheckIn>, ApiError> {
        self.get_json(&format!("/appointments/?customer_id={id}"))
            .await
    }

    async fn get_routes(&self) -> Result<Vec<Route>, ApiError> {
        self.get_json("/routes/").await
    }

    async fn get_route(&self, id: i64) -> Result<Route, ApiError> {
        self.get_json(&format!("/routes/{id}/")).await
    }

    async fn get_user_profile(&self) -> Result<UserProfile, ApiError> {
        self.get_json("/profiles/").await
    }

    async fn patch(&self, resource: &str, id: i64, fields: &Value) -> Result<(), ApiError> {
        let form: Vec<(String, String)> = fields
            .as_object()
            .map(|m| {
                m.iter()
                    .map(|(k, v)| {
                        let s = match v {
                            Value::String(s) => s.clone(),
                            other => other.to_string(),
                        };
                        (k.clone(), s)
                    })
                    .collect()
            })
            .unwrap_or_default();
        self.request(
            Method::PATCH,
            &format!("/{resource}/{id}/"),
            None,
            Some(form.as_slice()),
        )
        .await?;
        Ok(())
    }

    async fn raw_request(
        &self,
        method: &str,
        path: &str,
        form: &[(String, String)],
    ) -> Result<Vec<u8>, ApiError> {
        let method = Method::from_bytes(method.as_bytes())
            .map_err(|_| ApiError::Decode(format!("invalid method {method}")))?;
        let form_opt = (!form.is_empty()).then_some(form);
        let resp = self.request(method, path, None, form_opt).await?;
        Ok(resp.bytes().await?.to_vec())
    }

    async fn ping(&self) -> Result<(), ApiError> {
        self.request(Method::GET, "/profiles/", None, None).await?;
        Ok(())
    }
}

/// Map a non-2xx status to the taxonomy.
fn classify_status(
    status: StatusCode,
    retry_after: Option<u64>,
    path: &str,
    body: String,
) -> ApiError {
    match status.as_u16() {
        401 | 403 => ApiError::Auth {
            status: status.as_u16(),
        },
        404 => ApiError::NotFound {
            resource: path.to_string(),
        },
        429 => ApiError::RateLimited {
            retry_after_secs: retry_after,
        },
        s if (500..600).contains(&s) => ApiError::Transient { status: s },
        s => ApiError::Request { status: s, body },
    }
}

/// Exponential backoff with jitter: 2^(attempt-1) seconds scaled by a
/// factor in [0.5, 1.5), capped.
fn backoff_delay(attempt: u32, cap: Duration) -> Duration {
    let base = Duration::from_secs(1u64 << (attempt - 1).min(10));
    let jitter = rand::thread_rng().gen_range(0.5..1.5);
    base.mul_f64(jitter).min(cap)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_matches_contract() {
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, None, "/x", String::new()),
            ApiError::Auth { status: 401 }
        ));
        assert!(matches!(
            classify_status(StatusCode::NOT_FOUND, None, "/x", String::new()),
            ApiError::NotFound { .. }
        ));
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, Some(7), "/x", String::new()),
            ApiError::RateLimited {
                retry_after_secs: Some(7)
            }
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY, None, "/x", String::new()),
            ApiError::Transient { status: 502 }
        ));
        assert!(matches!(
            classify_status(StatusCode::UNPROCESSABLE_ENTITY, None, "/x", String::new()),
            ApiError::Request { status: 422, .. }
        ));
    }

    #[test]
    fn retriability_follows_variant() {
        assert!(ApiError::Transient { status: 500 }.is_retriable());
        assert!(ApiError::RateLimited {
            retry_after_secs: None
        }
        .is_retriable());
        assert!(!ApiError::Auth { status: 401 }.is_retriable());
        assert!(ApiError::Auth { status: 403 }.is_fatal());
        assert!(!ApiError::Request {
            status: 400,
            body: String::new()
        }
        .is_retriable());
    }

    #[test]
    fn backoff_grows_and_respects_cap() {
        let cap = Duration::from_secs(60);
        for attempt in 1..=8 {
            let d = backoff_delay(attempt, cap);
            let base = 1u64 << (attempt - 1).min(10);
            assert!(d <= cap);
            assert!(d >= Duration::from_secs(base).mul_f64(0.5).min(cap));
        }
    }
}
