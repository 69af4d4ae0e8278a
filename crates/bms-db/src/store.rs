use crate::assets;
use crate::dialect::Dialect;
use crate::error::DbError;
use crate::value::{SqlRow, SqlValue};
use bms_config::{AppConfig, DbType};
use futures_util::future::BoxFuture;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgRow};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use sqlx::{Column, Row, TypeInfo};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Per-command execution deadline.
const COMMAND_DEADLINE: Duration = Duration::from_secs(60);

async fn with_deadline<T, F>(command: &str, dialect: Dialect, fut: F) -> Result<T, DbError>
where
    F: Future<Output = Result<T, sqlx::Error>>,
{
    match tokio::time::timeout(COMMAND_DEADLINE, fut).await {
        Ok(result) => result.map_err(|e| DbError::storage(command, dialect, e)),
        Err(_) => Err(DbError::Timeout {
            command: command.to_string(),
            dialect,
            seconds: COMMAND_DEADLINE.as_secs(),
        }),
    }
}

/// Pooled handle over the configured dialect. Cheap to clone; all SQL is
/// resolved through the embedded bundle, never built at runtime.
#[derive(Clone)]
pub struct Db {
    pool: DbPool,
    dialect: Dialect,
}

#[derive(Clone)]
enum DbPool {
    Sqlite(SqlitePool),
    Postgres(PgPool),
}

impl Db {
    /// Open a pooled connection for the configured dialect. Idempotent at
    /// the pool level; bad configuration surfaces as `DbError::Config`,
    /// network/auth trouble as `DbError::Connect`.
    pub async fn connect(cfg: &AppConfig) -> Result<Self, DbError> {
        let dialect = Dialect::from(cfg.db.db_type);
        let pool = match cfg.db.db_type {
            DbType::Sqlite => {
                let opts = SqliteConnectOptions::new()
                    .filename(cfg.sqlite_path())
                    .create_if_missing(true)
                    .journal_mode(SqliteJournalMode::Wal);
                let pool = SqlitePoolOptions::new()
                    .max_connections(10)
                    .connect_with(opts)
                    .await
                    .map_err(DbError::Connect)?;
                DbPool::Sqlite(pool)
            }
            DbType::Postgres => {
                if cfg.db.user.is_empty() {
                    return Err(DbError::Config("DB_USER is required for postgres".into()));
                }
                let opts = PgConnectOptions::new()
                    .host(&cfg.db.host)
                    .port(cfg.db.port)
                    .username(&cfg.db.user)
                    .password(&cfg.db.password)
                    .database(&cfg.db.name);
                let pool = PgPoolOptions::new()
                    .max_connections(10)
                    .connect_with(opts)
                    .await
                    .map_err(DbError::Connect)?;
                DbPool::Postgres(pool)
            }
            DbType::Mssql => {
                // The bundle carries full mssql SQL, but no maintained
                // driver exists in this dependency set.
                return Err(DbError::Config(
                    "mssql is recognized but no driver is bundled; use sqlite or postgres"
                        .into(),
                ));
            }
        };
        Ok(Db { pool, dialect })
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Round-trip a ping on the pool.
    pub async fn test_connection(&self) -> Result<(), DbError> {
        match &self.pool {
            DbPool::Sqlite(p) => {
                sqlx::query_scalar::<_, i64>("select 1")
                    .fetch_one(p)
                    .await
                    .map_err(DbError::Connect)?;
            }
            DbPool::Postgres(p) => {
                sqlx::query_scalar::<_, i32>("select 1")
                    .fetch_one(p)
                    .await
                    .map_err(DbError::Connect)?;
            }
        }
        Ok(())
    }

    /// Execute a named command with positional binds; returns rows affected.
    pub async fn exec(&self, command: &str, params: &[SqlValue]) -> Result<u64, DbError> {
        let sql = self.load(command)?;
        debug!(command, dialect = %self.dialect, "db exec");
        match &self.pool {
            DbPool::Sqlite(p) => with_deadline(
                command,
                self.dialect,
                bind_sqlite(sqlx::query(&sql), params).execute(p),
            )
            .await
            .map(|r| r.rows_affected()),
            DbPool::Postgres(p) => with_deadline(
                command,
                self.dialect,
                bind_pg(sqlx::query(&sql), params).execute(p),
            )
            .await
            .map(|r| r.rows_affected()),
        }
    }

    /// Execute a multi-statement DDL command (statements separated by `;`).
    pub async fn exec_batch(&self, command: &str) -> Result<(), DbError> {
        let sql = self.load(command)?;
        for stmt in sql.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            match &self.pool {
                DbPool::Sqlite(p) => {
                    with_deadline(command, self.dialect, sqlx::query(stmt).execute(p)).await?;
                }
                DbPool::Postgres(p) => {
                    with_deadline(command, self.dialect, sqlx::query(stmt).execute(p)).await?;
                }
            }
        }
        Ok(())
    }

    /// Run a named command and decode all rows.
    pub async fn query(&self, command: &str, params: &[SqlValue]) -> Result<Vec<SqlRow>, DbError> {
        let sql = self.load(command)?;
        debug!(command, dialect = %self.dialect, "db query");
        match &self.pool {
            DbPool::Sqlite(p) => {
                let rows = with_deadline(
                    command,
                    self.dialect,
                    bind_sqlite(sqlx::query(&sql), params).fetch_all(p),
                )
                .await?;
                Ok(rows.iter().map(decode_sqlite_row).collect())
            }
            DbPool::Postgres(p) => {
                let rows = with_deadline(
                    command,
                    self.dialect,
                    bind_pg(sqlx::query(&sql), params).fetch_all(p),
                )
                .await?;
                Ok(rows.iter().map(decode_pg_row).collect())
            }
        }
    }

    /// Serialize a unit of work: commit on Ok, roll back on Err.
    pub async fn run_in_tx<T, F>(&self, f: F) -> Result<T, DbError>
    where
        T: Send,
        F: for<'t> FnOnce(&'t mut DbTx) -> BoxFuture<'t, Result<T, DbError>> + Send,
    {
        let mut tx = self.begin().await?;
        match f(&mut tx).await {
            Ok(v) => {
                tx.commit().await?;
                Ok(v)
            }
            Err(e) => {
                // Rollback failure is secondary to the original error.
                let _ = tx.rollback().await;
                Err(e)
            }
        }
    }

    async fn begin(&self) -> Result<DbTx, DbError> {
        let inner = match &self.pool {
            DbPool::Sqlite(p) => TxInner::Sqlite(p.begin().await.map_err(DbError::Connect)?),
            DbPool::Postgres(p) => TxInner::Postgres(p.begin().await.map_err(DbError::Connect)?),
        };
        Ok(DbTx {
            inner,
            dialect: self.dialect,
        })
    }

    fn load(&self, command: &str) -> Result<String, DbError> {
        let raw = assets::get_sql(self.dialect, command)?;
        Ok(self.dialect.rewrite_placeholders(raw))
    }
}

/// In-flight transaction handle passed to `run_in_tx` closures. Exposes
/// the same named-command surface as `Db`.
pub struct DbTx {
    inner: TxInner,
    dialect: Dialect,
}

enum TxInner {
    Sqlite(sqlx::Transaction<'static, sqlx::Sqlite>),
    Postgres(sqlx::Transaction<'static, sqlx::Postgres>),
}

impl DbTx {
    pub async fn exec(&mut self, command: &str, params: &[SqlValue]) -> Result<u64, DbError> {
        let raw = assets::get_sql(self.dialect, command)?;
        let sql = self.dialect.rewrite_placeholders(raw);
        match &mut self.inner {
            TxInner::Sqlite(tx) => with_deadline(
                command,
                self.dialect,
                bind_sqlite(sqlx::query(&sql), params).execute(&mut **tx),
            )
            .await
            .map(|r| r.rows_affected()),
            TxInner::Postgres(tx) => with_deadline(
                command,
                self.dialect,
                bind_pg(sqlx::query(&sql), params).execute(&mut **tx),
            )
            .await
            .map(|r| r.rows_affected()),
        }
    }

    pub async fn query(
        &mut self,
        command: &str,
        params: &[SqlValue],
    ) -> Result<Vec<SqlRow>, DbError> {
        let raw = assets::get_sql(self.dialect, command)?;
        let sql = self.dialect.rewrite_placeholders(raw);
        match &mut self.inner {
            TxInner::Sqlite(tx) => {
                let rows = with_deadline(
                    command,
                    self.dialect,
                    bind_sqlite(sqlx::query(&sql), params).fetch_all(&mut **tx),
                )
                .await?;
                Ok(rows.iter().map(decode_sqlite_row).collect())
            }
            TxInner::Postgres(tx) => {
                let rows = with_deadline(
                    command,
                    self.dialect,
                    bind_pg(sqlx::query(&sql), params).fetch_all(&mut **tx),
                )
                .await?;
                Ok(rows.iter().map(decode_pg_row).collect())
            }
        }
    }

    async fn commit(self) -> Result<(), DbError> {
        match self.inner {
            TxInner::Sqlite(tx) => tx.commit().await.map_err(DbError::Connect),
            TxInner::Postgres(tx) => tx.commit().await.map_err(DbError::Connect),
        }
    }

    async fn rollback(self) -> Result<(), DbError> {
        match self.inner {
            TxInner::Sqlite(tx) => tx.rollback().await.map_err(DbError::Connect),
            TxInner::Postgres(tx) => tx.rollback().await.map_err(DbError::Connect),
        }
    }
}

// ---------------------------------------------------------------------------
// Bind + decode per driver
// ---------------------------------------------------------------------------

fn bind_sqlite<'q>(
    mut q: sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    params: &[SqlValue],
) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    for p in params {
        q = match p {
            SqlValue::Int(v) => q.bind(*v),
            SqlValue::Float(v) => q.bind(*v),
            SqlValue::Text(v) => q.bind(v.clone()),
            SqlValue::Bool(v) => q.bind(*v),
        };
    }
    q
}

fn bind_pg<'q>(
    mut q: sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>,
    params: &[SqlValue],
) -> sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments> {
    for p in params {
        q = match p {
            SqlValue::Int(v) => q.bind(*v),
            SqlValue::Float(v) => q.bind(*v),
            SqlValue::Text(v) => q.bind(v.clone()),
            SqlValue::Bool(v) => q.bind(*v),
        };
    }
    q
}

fn decode_sqlite_row(row: &SqliteRow) -> SqlRow {
    let mut columns = Vec::with_capacity(row.columns().len());
    let mut values = Vec::with_capacity(row.columns().len());
    for (i, col) in row.columns().iter().enumerate() {
        columns.push(col.name().to_string());
        let ty = col.type_info().name().to_ascii_uppercase();
        let v = match ty.as_str() {
            "INTEGER" | "INT" | "BIGINT" | "BOOLEAN" => {
                SqlValue::Int(row.try_get::<Option<i64>, _>(i).unwrap_or(None))
            }
            "REAL" | "NUMERIC" => SqlValue::Float(row.try_get::<Option<f64>, _>(i).unwrap_or(None)),
            _ => SqlValue::Text(row.try_get::<Option<String>, _>(i).unwrap_or(None)),
        };
        values.push(v);
    }
    SqlRow { columns, values }
}

fn decode_pg_row(row: &PgRow) -> SqlRow {
    let mut columns = Vec::with_capacity(row.columns().len());
    let mut values = Vec::with_capacity(row.columns().len());
    for (i, col) in row.columns().iter().enumerate() {
        columns.push(col.name().to_string());
        let ty = col.type_info().name().to_ascii_uppercase();
        let v = match ty.as_str() {
            "INT2" => SqlValue::Int(
                row.try_get::<Option<i16>, _>(i)
                    .unwrap_or(None)
                    .map(i64::from),
            ),
            "INT4" => SqlValue::Int(
                row.try_get::<Option<i32>, _>(i)
                    .unwrap_or(None)
                    .map(i64::from),
            ),
            "INT8" => SqlValue::Int(row.try_get::<Option<i64>, _>(i).unwrap_or(None)),
            "FLOAT4" => SqlValue::Float(
                row.try_get::<Option<f32>, _>(i)
                    .unwrap_or(None)
                    .map(f64::from),
            ),
            "FLOAT8" => SqlValue::Float(row.try_get::<Option<f64>, _>(i).unwrap_or(None)),
            "BOOL" => SqlValue::Bool(row.try_get::<Option<bool>, _>(i).unwrap_or(None)),
            "TIMESTAMPTZ" => SqlValue::Text(
                row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(i)
                    .unwrap_or(None)
                    .map(|t| t.to_rfc3339()),
            ),
            "JSON" | "JSONB" => SqlValue::Text(
                row.try_get::<Option<serde_json::Value>, _>(i)
                    .unwrap_or(None)
                    .map(|v| v.to_string()),
            ),
            _ => SqlValue::Text(row.try_get::<Option<String>, _>(i).unwrap_or(None)),
        };
        values.push(v);
    }
    SqlRow { columns, values }
}
