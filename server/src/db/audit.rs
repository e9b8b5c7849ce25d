// server/src/db/audit.rs

use super::{store_err, to_i32, to_i64, PgStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use teapay::error::StoreResult;
use teapay::model::{
  CallbackErrorRecord, CallbackLogRecord, GenerationLogEntry, GenerationMethod, RetryAttemptRecord, RetryFailureRecord,
  Severity,
};
use teapay::store::{AuditLog, RetryQuery};
use teapay::ErrorKind;

fn method_str(method: GenerationMethod) -> &'static str {
  match method {
    GenerationMethod::Standard => "standard",
    GenerationMethod::Fallback => "fallback",
  }
}

fn severity_str(severity: Severity) -> &'static str {
  match severity {
    Severity::Low => "low",
    Severity::Medium => "medium",
    Severity::High => "high",
  }
}

/// Unknown kinds written by older deployments read back as `Other`.
fn parse_kind(raw: &str) -> ErrorKind {
  serde_json::from_value(serde_json::Value::String(raw.to_string())).unwrap_or(ErrorKind::Other)
}

fn to_u32(v: i32) -> u32 {
  u32::try_from(v).unwrap_or(0)
}

fn to_u64(v: i64) -> u64 {
  u64::try_from(v).unwrap_or(0)
}

#[derive(Debug, FromRow)]
struct AttemptRow {
  execution_id: String,
  operation_type: String,
  attempt: i32,
  success: bool,
  duration_ms: i64,
  error_code: Option<String>,
  error_kind: Option<String>,
  error_message: Option<String>,
  recorded_at: DateTime<Utc>,
}

impl From<AttemptRow> for RetryAttemptRecord {
  fn from(row: AttemptRow) -> Self {
    Self {
      execution_id: row.execution_id,
      operation_type: row.operation_type,
      attempt: to_u32(row.attempt),
      success: row.success,
      duration_ms: to_u64(row.duration_ms),
      error_code: row.error_code,
      error_kind: row.error_kind.as_deref().map(parse_kind),
      error_message: row.error_message,
      recorded_at: row.recorded_at,
    }
  }
}

#[derive(Debug, FromRow)]
struct FailureRow {
  execution_id: String,
  operation_type: String,
  attempts: i32,
  total_duration_ms: i64,
  error_code: Option<String>,
  error_kind: String,
  error_message: String,
  needs_manual_intervention: bool,
  recorded_at: DateTime<Utc>,
}

impl From<FailureRow> for RetryFailureRecord {
  fn from(row: FailureRow) -> Self {
    Self {
      execution_id: row.execution_id,
      operation_type: row.operation_type,
      attempts: to_u32(row.attempts),
      total_duration_ms: to_u64(row.total_duration_ms),
      error_code: row.error_code,
      error_kind: parse_kind(&row.error_kind),
      error_message: row.error_message,
      needs_manual_intervention: row.needs_manual_intervention,
      recorded_at: row.recorded_at,
    }
  }
}

#[async_trait]
impl AuditLog for PgStore {
  async fn record_generation(&self, entry: &GenerationLogEntry) -> StoreResult<()> {
    sqlx::query(
      "INSERT INTO order_number_generation_log \
         (order_number, owner_id, channel, total_amount, item_count, method, generated_at) \
       VALUES ($1, $2, $3, $4, $5, $6, $7)",
    )
    .bind(&entry.order_number)
    .bind(&entry.owner_id)
    .bind(&entry.channel)
    .bind(entry.total_amount)
    .bind(to_i32(u32::try_from(entry.item_count).unwrap_or(u32::MAX)))
    .bind(method_str(entry.method))
    .bind(entry.generated_at)
    .execute(&self.pool)
    .await
    .map_err(|e| store_err("record generation", e))?;
    Ok(())
  }

  async fn record_retry_attempt(&self, record: &RetryAttemptRecord) -> StoreResult<()> {
    sqlx::query(
      "INSERT INTO retry_attempts (execution_id, operation_type, attempt, success, duration_ms, \
         error_code, error_kind, error_message, recorded_at) \
       VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
    )
    .bind(&record.execution_id)
    .bind(&record.operation_type)
    .bind(to_i32(record.attempt))
    .bind(record.success)
    .bind(to_i64(record.duration_ms))
    .bind(&record.error_code)
    .bind(record.error_kind.map(|k| k.as_str()))
    .bind(&record.error_message)
    .bind(record.recorded_at)
    .execute(&self.pool)
    .await
    .map_err(|e| store_err("record retry attempt", e))?;
    Ok(())
  }

  async fn record_retry_failure(&self, record: &RetryFailureRecord) -> StoreResult<()> {
    sqlx::query(
      "INSERT INTO retry_failures (execution_id, operation_type, attempts, total_duration_ms, error_code, \
         error_kind, error_message, needs_manual_intervention, recorded_at) \
       VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
    )
    .bind(&record.execution_id)
    .bind(&record.operation_type)
    .bind(to_i32(record.attempts))
    .bind(to_i64(record.total_duration_ms))
    .bind(&record.error_code)
    .bind(record.error_kind.as_str())
    .bind(&record.error_message)
    .bind(record.needs_manual_intervention)
    .bind(record.recorded_at)
    .execute(&self.pool)
    .await
    .map_err(|e| store_err("record retry failure", e))?;
    Ok(())
  }

  async fn record_callback(&self, record: &CallbackLogRecord) -> StoreResult<()> {
    sqlx::query(
      "INSERT INTO payment_callback_logs (out_trade_no, transaction_id, result_code, process_result, \
         order_id, order_status, received_at, processed_at) \
       VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
    )
    .bind(&record.out_trade_no)
    .bind(&record.transaction_id)
    .bind(&record.result_code)
    .bind(&record.process_result)
    .bind(&record.order_id)
    .bind(&record.order_status)
    .bind(record.received_at)
    .bind(record.processed_at)
    .execute(&self.pool)
    .await
    .map_err(|e| store_err("record callback", e))?;
    Ok(())
  }

  async fn record_callback_error(&self, record: &CallbackErrorRecord) -> StoreResult<()> {
    sqlx::query(
      "INSERT INTO payment_callback_errors (error_id, error_message, payload, severity, recorded_at) \
       VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(&record.error_id)
    .bind(&record.error_message)
    .bind(sqlx::types::Json(&record.payload))
    .bind(severity_str(record.severity))
    .bind(record.recorded_at)
    .execute(&self.pool)
    .await
    .map_err(|e| store_err("record callback error", e))?;
    Ok(())
  }

  async fn retry_attempts(&self, query: &RetryQuery) -> StoreResult<Vec<RetryAttemptRecord>> {
    let rows: Vec<AttemptRow> = sqlx::query_as(
      "SELECT execution_id, operation_type, attempt, success, duration_ms, error_code, error_kind, \
         error_message, recorded_at \
       FROM retry_attempts \
       WHERE ($1::text IS NULL OR operation_type = $1) \
         AND ($2::timestamptz IS NULL OR recorded_at >= $2) \
         AND ($3::timestamptz IS NULL OR recorded_at <= $3) \
       ORDER BY recorded_at",
    )
    .bind(&query.operation_type)
    .bind(query.since)
    .bind(query.until)
    .fetch_all(&self.pool)
    .await
    .map_err(|e| store_err("query retry attempts", e))?;
    Ok(rows.into_iter().map(RetryAttemptRecord::from).collect())
  }

  async fn retry_failures(&self, query: &RetryQuery) -> StoreResult<Vec<RetryFailureRecord>> {
    let rows: Vec<FailureRow> = sqlx::query_as(
      "SELECT execution_id, operation_type, attempts, total_duration_ms, error_code, error_kind, \
         error_message, needs_manual_intervention, recorded_at \
       FROM retry_failures \
       WHERE ($1::text IS NULL OR operation_type = $1) \
         AND ($2::timestamptz IS NULL OR recorded_at >= $2) \
         AND ($3::timestamptz IS NULL OR recorded_at <= $3) \
       ORDER BY recorded_at",
    )
    .bind(&query.operation_type)
    .bind(query.since)
    .bind(query.until)
    .fetch_all(&self.pool)
    .await
    .map_err(|e| store_err("query retry failures", e))?;
    Ok(rows.into_iter().map(RetryFailureRecord::from).collect())
  }

  async fn purge_retry_records(&self, cutoff: DateTime<Utc>) -> StoreResult<(u64, u64)> {
    let mut tx = self.pool.begin().await.map_err(|e| store_err("begin retry purge", e))?;
    let attempts = sqlx::query("DELETE FROM retry_attempts WHERE recorded_at < $1")
      .bind(cutoff)
      .execute(&mut *tx)
      .await
      .map_err(|e| store_err("purge retry attempts", e))?;
    let failures = sqlx::query("DELETE FROM retry_failures WHERE recorded_at < $1")
      .bind(cutoff)
      .execute(&mut *tx)
      .await
      .map_err(|e| store_err("purge retry failures", e))?;
    tx.commit().await.map_err(|e| store_err("commit retry purge", e))?;
    Ok((attempts.rows_affected(), failures.rows_affected()))
  }
}
