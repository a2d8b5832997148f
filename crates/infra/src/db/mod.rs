//! Database adapters: connection pool, schema migrations, error mapping.

mod schema;

use std::time::Duration;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;
use tracing::{info, instrument};

use rolegate_auth::{PolicyError, RepoError};

use crate::config::DatabaseConfig;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("database connection failed: {0}")]
    Connect(String),

    #[error("migration `{step}` failed: {message}")]
    Migrate { step: &'static str, message: String },
}

/// Build the shared connection pool.
#[instrument(skip(config), fields(host = %config.host, dbname = %config.dbname), err)]
pub async fn connect(config: &DatabaseConfig) -> Result<PgPool, DbError> {
    let max = config.max_open_conns.max(1);
    let lifetime = config
        .conn_max_lifetime()
        .map_err(|e| DbError::Connect(e.to_string()))?;
    let pool = PgPoolOptions::new()
        .max_connections(max)
        .min_connections(config.max_idle_conns.min(max))
        .max_lifetime(Some(lifetime))
        .acquire_timeout(Duration::from_secs(10))
        .connect(&config.database_url())
        .await
        .map_err(|e| DbError::Connect(e.to_string()))?;

    info!(max_connections = max, "database pool ready");
    Ok(pool)
}

/// Create or upgrade the schema. Idempotent.
#[instrument(skip(pool), err)]
pub async fn migrate(pool: &PgPool) -> Result<(), DbError> {
    let mut tx = pool.begin().await.map_err(|e| DbError::Migrate {
        step: "begin",
        message: e.to_string(),
    })?;

    for &(step, sql) in schema::STEPS {
        sqlx::query(sql)
            .execute(&mut *tx)
            .await
            .map_err(|e| DbError::Migrate {
                step,
                message: e.to_string(),
            })?;
    }

    tx.commit().await.map_err(|e| DbError::Migrate {
        step: "commit",
        message: e.to_string(),
    })?;

    info!(steps = schema::STEPS.len(), "schema migrated");
    Ok(())
}

/// SQLSTATE 23505.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}

/// Map SQLx errors onto repository errors.
///
/// | SQLx error | RepoError |
/// |---|---|
/// | unique violation (`23505`) | `Conflict` |
/// | `RowNotFound` | `NotFound` |
/// | anything else | `Backend` |
pub(crate) fn map_repo_error(operation: &str, err: sqlx::Error) -> RepoError {
    if is_unique_violation(&err) {
        return RepoError::Conflict(format!("{operation}: {err}"));
    }
    match err {
        sqlx::Error::RowNotFound => RepoError::NotFound,
        sqlx::Error::PoolClosed => RepoError::Backend(format!("connection pool closed in {operation}")),
        other => RepoError::Backend(format!("sqlx error in {operation}: {other}")),
    }
}

pub(crate) fn map_policy_error(operation: &str, err: sqlx::Error) -> PolicyError {
    PolicyError::Store(format!("sqlx error in {operation}: {err}"))
}

/// Row ids are BIGSERIAL. A negative id means the row is corrupt.
pub(crate) fn to_u64(value: i64) -> Result<u64, sqlx::Error> {
    u64::try_from(value).map_err(|_| sqlx::Error::Decode(format!("negative row id {value}").into()))
}

pub(crate) fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
