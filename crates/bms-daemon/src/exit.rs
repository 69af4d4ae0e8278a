use bms_api::ApiError;
use bms_config::ConfigError;
use bms_db::DbError;

pub const EXIT_OK: u8 = 0;
pub const EXIT_GENERIC: u8 = 1;
pub const EXIT_USAGE: u8 = 2;
pub const EXIT_AUTH: u8 = 4;
pub const EXIT_UPSTREAM: u8 = 5;
pub const EXIT_STORAGE: u8 = 6;
pub const EXIT_NETWORK: u8 = 7;
pub const EXIT_RATE_LIMIT: u8 = 8;
pub const EXIT_TIMEOUT: u8 = 9;

/// Map a failure to the documented process exit code by walking the
/// error chain for the first recognizable cause.
pub fn exit_code_for(err: &anyhow::Error) -> u8 {
    for cause in err.chain() {
        if cause.downcast_ref::<ConfigError>().is_some() {
            return EXIT_USAGE;
        }
        if let Some(api) = cause.downcast_ref::<ApiError>() {
            return match api {
                ApiError::Auth { .. } => EXIT_AUTH,
                ApiError::RateLimited { .. } => EXIT_RATE_LIMIT,
                ApiError::Network(e) if e.is_timeout() => EXIT_TIMEOUT,
                ApiError::Network(_) => EXIT_NETWORK,
                _ => EXIT_UPSTREAM,
            };
        }
        if let Some(db) = cause.downcast_ref::<DbError>() {
            return match db {
                DbError::Config(_) => EXIT_USAGE,
                DbError::Timeout { .. } => EXIT_TIMEOUT,
                _ => EXIT_STORAGE,
            };
        }
    }
    EXIT_GENERIC
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn taxonomy_maps_to_documented_codes() {
        assert_eq!(
            exit_code_for(&anyhow::Error::new(ApiError::Auth { status: 401 })),
            EXIT_AUTH
        );
        assert_eq!(
            exit_code_for(&anyhow::Error::new(ApiError::RateLimited {
                retry_after_secs: Some(30)
            })),
            EXIT_RATE_LIMIT
        );
        assert_eq!(
            exit_code_for(&anyhow::Error::new(ApiError::Transient { status: 502 })),
            EXIT_UPSTREAM
        );
        assert_eq!(
            exit_code_for(&anyhow::Error::new(DbError::Config("bad".into()))),
            EXIT_USAGE
        );
        assert_eq!(
            exit_code_for(&anyhow::Error::new(ConfigError("nope".into()))),
            EXIT_USAGE
        );
        assert_eq!(exit_code_for(&anyhow!("something else")), EXIT_GENERIC);
    }

    #[test]
    fn wrapped_causes_are_found() {
        let err = anyhow::Error::new(ApiError::Auth { status: 403 }).context("while pulling");
        assert_eq!(exit_code_for(&err), EXIT_AUTH);
    }
}
