// server/src/db/mod.rs

//! PostgreSQL implementations of the teapay store traits and of the inventory
//! collaborator. Every guarded transition is a single conditional statement
//! whose `rows_affected` decides the outcome.

mod audit;
mod inventory;
mod locks;
mod orders;
mod sequences;
mod transactions;

use sqlx::PgPool;
use teapay::StoreError;

pub const SCHEMA: &str = include_str!("../../schema.sql");

#[derive(Clone)]
pub struct PgStore {
  pool: PgPool,
}

impl PgStore {
  pub fn new(pool: PgPool) -> Self {
    Self { pool }
  }

  /// Applies `schema.sql`. Every statement in it is idempotent.
  pub async fn apply_schema(&self) -> Result<(), sqlx::Error> {
    sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
    Ok(())
  }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
  matches!(err, sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("23505"))
}

fn is_serialization_failure(err: &sqlx::Error) -> bool {
  matches!(err, sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("40001"))
}

/// Maps a driver error onto the classified store error.
pub(crate) fn store_err(context: &str, err: sqlx::Error) -> StoreError {
  let message = format!("{}: {}", context, err);
  if is_unique_violation(&err) || is_serialization_failure(&err) {
    return StoreError::Conflict(message);
  }
  match err {
    sqlx::Error::PoolTimedOut => StoreError::Timeout(message),
    sqlx::Error::Io(_) | sqlx::Error::Tls(_) => StoreError::Connection(message),
    sqlx::Error::PoolClosed | sqlx::Error::WorkerCrashed => StoreError::Unavailable(message),
    sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) | sqlx::Error::ColumnNotFound(_) => {
      StoreError::Corrupted(message)
    }
    _ => StoreError::Backend(message),
  }
}

/// Counts and durations are unsigned in the model and BIGINT/INT in SQL.
pub(crate) fn to_i64(v: u64) -> i64 {
  i64::try_from(v).unwrap_or(i64::MAX)
}

pub(crate) fn to_i32(v: u32) -> i32 {
  i32::try_from(v).unwrap_or(i32::MAX)
}
