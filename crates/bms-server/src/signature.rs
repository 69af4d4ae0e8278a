use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-webhook-signature";
pub const LEGACY_SIGNATURE_HEADER: &str = "x-badgermaps-signature";
pub const TIMESTAMP_HEADER: &str = "x-webhook-timestamp";

/// Why a delivery was refused. Signature and timestamp failures both
/// answer 401; a missing secret with signing on is a 500-class
/// configuration error.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    #[error("missing signature header")]
    MissingSignature,

    #[error("malformed signature header")]
    MalformedSignature,

    #[error("signature mismatch")]
    BadSignature,

    #[error("malformed timestamp header")]
    MalformedTimestamp,

    #[error("timestamp outside the accepted window")]
    TimestampSkew,

    #[error("signing enabled but no secret configured")]
    MissingSecret,
}

impl SignatureError {
    pub fn is_config_error(&self) -> bool {
        matches!(self, SignatureError::MissingSecret)
    }
}

/// Verify a webhook delivery against the shared secret.
///
/// The MAC input is the raw body bytes — exactly as received, never
/// re-encoded — prefixed with `"<timestamp>."` when the timestamp header
/// is present. Comparison is constant-time. A timestamp exactly at the
/// window edge is accepted; strictly beyond is rejected.
pub fn verify(
    secret: &str,
    body: &[u8],
    signature_header: Option<&str>,
    timestamp_header: Option<&str>,
    window_secs: i64,
    now: DateTime<Utc>,
) -> Result<(), SignatureError> {
    if secret.is_empty() {
        return Err(SignatureError::MissingSecret);
    }

    let header = signature_header.ok_or(SignatureError::MissingSignature)?;
    let hex_sig = header
        .strip_prefix("sha256=")
        .ok_or(SignatureError::MalformedSignature)?;
    let expected = hex::decode(hex_sig).map_err(|_| SignatureError::MalformedSignature)?;

    if let Some(ts_raw) = timestamp_header {
        let ts = parse_timestamp(ts_raw).ok_or(SignatureError::MalformedTimestamp)?;
        let skew = (now - ts).num_seconds().abs();
        if skew > window_secs {
            return Err(SignatureError::TimestampSkew);
        }
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|_| SignatureError::MissingSecret)?;
        mac.update(ts_raw.as_bytes());
        mac.update(b".");
        mac.update(body);
        mac.verify_slice(&expected)
            .map_err(|_| SignatureError::BadSignature)
    } else {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|_| SignatureError::MissingSecret)?;
        mac.update(body);
        mac.verify_slice(&expected)
            .map_err(|_| SignatureError::BadSignature)
    }
}

/// Accepts unix seconds or RFC3339.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(secs) = raw.parse::<i64>() {
        return DateTime::<Utc>::from_timestamp(secs, 0);
    }
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Produce the signature header value for a body, as senders (and tests)
/// compute it.
pub fn sign(secret: &str, body: &[u8], timestamp: Option<&str>) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key size");
    if let Some(ts) = timestamp {
        mac.update(ts.as_bytes());
        mac.update(b".");
    }
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}
