// server/src/db/sequences.rs

use super::{store_err, to_i64, PgStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use teapay::error::StoreResult;
use teapay::store::SequenceStore;
use teapay::StoreError;

fn to_u64(date_prefix: &str, v: i64) -> StoreResult<u64> {
  u64::try_from(v).map_err(|_| StoreError::Corrupted(format!("sequence {} holds negative value {}", date_prefix, v)))
}

#[async_trait]
impl SequenceStore for PgStore {
  async fn current(&self, date_prefix: &str) -> StoreResult<Option<u64>> {
    let value: Option<i64> = sqlx::query_scalar("SELECT current_value FROM order_sequences WHERE date_prefix = $1")
      .bind(date_prefix)
      .fetch_optional(&self.pool)
      .await
      .map_err(|e| store_err("read sequence", e))?;
    value.map(|v| to_u64(date_prefix, v)).transpose()
  }

  async fn create(&self, date_prefix: &str, initial: u64, at: DateTime<Utc>) -> StoreResult<bool> {
    let result = sqlx::query(
      "INSERT INTO order_sequences (date_prefix, current_value, created_at, updated_at) \
       VALUES ($1, $2, $3, $3) ON CONFLICT (date_prefix) DO NOTHING",
    )
    .bind(date_prefix)
    .bind(to_i64(initial))
    .bind(at)
    .execute(&self.pool)
    .await
    .map_err(|e| store_err("create sequence", e))?;
    Ok(result.rows_affected() == 1)
  }

  async fn compare_and_swap(&self, date_prefix: &str, expected: u64, next: u64, at: DateTime<Utc>) -> StoreResult<bool> {
    let result = sqlx::query(
      "UPDATE order_sequences SET current_value = $3, updated_at = $4 \
       WHERE date_prefix = $1 AND current_value = $2",
    )
    .bind(date_prefix)
    .bind(to_i64(expected))
    .bind(to_i64(next))
    .bind(at)
    .execute(&self.pool)
    .await
    .map_err(|e| store_err("advance sequence", e))?;
    Ok(result.rows_affected() == 1)
  }
}
