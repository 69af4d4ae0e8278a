use crate::dialect::Dialect;

/// Store-boundary error taxonomy. Every driver error is wrapped with the
/// command name and dialect before it leaves this crate.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("config error: {0}")]
    Config(String),

    #[error("connect error: {0}")]
    Connect(#[source] sqlx::Error),

    /// Read-only validation found missing tables or columns.
    #[error("schema error: missing {0:?}")]
    Schema(Vec<String>),

    /// Programmer error: a command name not present in the asset bundle.
    /// Surfaced at startup by the required-commands check.
    #[error("unknown SQL command `{command}` for dialect {dialect}")]
    UnknownCommand { command: String, dialect: Dialect },

    #[error("`{command}` failed on {dialect}: {source}")]
    Storage {
        command: String,
        dialect: Dialect,
        #[source]
        source: sqlx::Error,
    },

    /// Per-command deadline elapsed.
    #[error("`{command}` timed out after {seconds}s on {dialect}")]
    Timeout {
        command: String,
        dialect: Dialect,
        seconds: u64,
    },

    /// Referential or state-machine violation (orphaned check-in, illegal
    /// pending-change transition).
    #[error("integrity error: {0}")]
    Integrity(String),
}

impl DbError {
    /// Connection-class failures are retriable with backoff by the
    /// pull/push pipelines; everything else surfaces to the caller.
    pub fn is_retriable(&self) -> bool {
        match self {
            DbError::Connect(_) | DbError::Timeout { .. } => true,
            DbError::Storage { source, .. } => {
                matches!(source, sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut)
            }
            _ => false,
        }
    }

    pub(crate) fn storage(command: &str, dialect: Dialect, source: sqlx::Error) -> Self {
        DbError::Storage {
            command: command.to_string(),
            dialect,
            source,
        }
    }
}
