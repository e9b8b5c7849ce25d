// server/src/db/locks.rs

use super::{store_err, PgStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use teapay::error::StoreResult;
use teapay::model::ProcessingLock;
use teapay::store::LockStore;

#[async_trait]
impl LockStore for PgStore {
  /// Inserts the lease, or takes over a row whose lease already ran out.
  async fn try_acquire(&self, lock: &ProcessingLock, now: DateTime<Utc>) -> StoreResult<bool> {
    let result = sqlx::query(
      "INSERT INTO processing_locks (lock_key, owner_token, out_trade_no, transaction_id, created_at, expires_at) \
       VALUES ($1, $2, $3, $4, $5, $6) \
       ON CONFLICT (lock_key) DO UPDATE SET \
         owner_token = EXCLUDED.owner_token, \
         created_at = EXCLUDED.created_at, \
         expires_at = EXCLUDED.expires_at \
       WHERE processing_locks.expires_at <= $7",
    )
    .bind(&lock.lock_key)
    .bind(&lock.owner_token)
    .bind(&lock.out_trade_no)
    .bind(&lock.transaction_id)
    .bind(lock.created_at)
    .bind(lock.expires_at)
    .bind(now)
    .execute(&self.pool)
    .await
    .map_err(|e| store_err("acquire processing lock", e))?;
    Ok(result.rows_affected() == 1)
  }

  async fn release(&self, lock_key: &str, owner_token: &str) -> StoreResult<bool> {
    let result = sqlx::query("DELETE FROM processing_locks WHERE lock_key = $1 AND owner_token = $2")
      .bind(lock_key)
      .bind(owner_token)
      .execute(&self.pool)
      .await
      .map_err(|e| store_err("release processing lock", e))?;
    Ok(result.rows_affected() == 1)
  }

  async fn purge_expired(&self, now: DateTime<Utc>) -> StoreResult<u64> {
    let result = sqlx::query("DELETE FROM processing_locks WHERE expires_at <= $1")
      .bind(now)
      .execute(&self.pool)
      .await
      .map_err(|e| store_err("purge expired locks", e))?;
    Ok(result.rows_affected())
  }
}
