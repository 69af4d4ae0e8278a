/// Upstream failure taxonomy. Retriability is a property of the variant;
/// the client's retry loop consumes it, callers see only the final error.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// 401/403. Fatal: retrying cannot help a bad credential.
    #[error("auth error: upstream returned {status}")]
    Auth { status: u16 },

    #[error("not found: {resource}")]
    NotFound { resource: String },

    /// 429. Carries the server's backoff hint when present.
    #[error("rate limited (retry after {retry_after_secs:?}s)")]
    RateLimited { retry_after_secs: Option<u64> },

    /// 5xx. Retriable with exponential backoff.
    #[error("transient upstream error: {status}")]
    Transient { status: u16 },

    /// Remaining 4xx. Non-retriable.
    #[error("request rejected: {status} {body}")]
    Request { status: u16, body: String },

    #[error("decode error: {0}")]
    Decode(String),

    /// Connection-level trouble (DNS, TLS, timeout). Retriable.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
}

impl ApiError {
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            ApiError::RateLimited { .. } | ApiError::Transient { .. } | ApiError::Network(_)
        )
    }

    /// Fatal for the whole batch, not just the item (bad credentials).
    pub fn is_fatal(&self) -> bool {
        matches!(self, ApiError::Auth { .. })
    }
}
