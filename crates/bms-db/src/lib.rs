//! Multi-dialect storage layer.
//!
//! All SQL lives in the embedded per-dialect bundle (`sql/<dialect>/`);
//! this crate resolves named commands, rewrites positional placeholders to
//! the dialect-native form, and executes them against a pooled connection.
//! Nothing here builds SQL strings at runtime.

mod assets;
mod dialect;
mod error;
mod merge;
mod pending;
mod schema;
mod store;
mod value;

pub use assets::{get_sql, list_commands, verify_required_commands, REQUIRED_COMMANDS};
pub use dialect::Dialect;
pub use error::DbError;
pub use schema::SchemaState;
pub use store::{Db, DbTx};
pub use value::{parse_db_timestamp, SqlRow, SqlValue};
