// server/src/db/transactions.rs

use super::{store_err, PgStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use teapay::error::StoreResult;
use teapay::model::{TransactionOutcome, TransactionRecord};
use teapay::store::TransactionStore;
use teapay::StoreError;

#[derive(Debug, FromRow)]
struct TransactionRow {
  out_trade_no: String,
  transaction_id: String,
  order_id: String,
  owner_id: Option<String>,
  outcome: String,
  total_amount: i64,
  cash_amount: i64,
  result_code: String,
  err_code: Option<String>,
  err_code_des: Option<String>,
  time_end: String,
  bank_type: Option<String>,
  trade_type: Option<String>,
  attach: Option<String>,
  created_at: DateTime<Utc>,
}

fn outcome_str(outcome: TransactionOutcome) -> &'static str {
  match outcome {
    TransactionOutcome::Paid => "paid",
    TransactionOutcome::Failed => "failed",
  }
}

impl TryFrom<TransactionRow> for TransactionRecord {
  type Error = StoreError;

  fn try_from(row: TransactionRow) -> Result<Self, Self::Error> {
    let outcome = match row.outcome.as_str() {
      "paid" => TransactionOutcome::Paid,
      "failed" => TransactionOutcome::Failed,
      other => {
        return Err(StoreError::Corrupted(format!(
          "transaction {}: unknown outcome '{}'",
          row.transaction_id, other
        )))
      }
    };
    Ok(TransactionRecord {
      out_trade_no: row.out_trade_no,
      transaction_id: row.transaction_id,
      order_id: row.order_id,
      owner_id: row.owner_id,
      outcome,
      total_amount: row.total_amount,
      cash_amount: row.cash_amount,
      result_code: row.result_code,
      err_code: row.err_code,
      err_code_des: row.err_code_des,
      time_end: row.time_end,
      bank_type: row.bank_type,
      trade_type: row.trade_type,
      attach: row.attach,
      created_at: row.created_at,
    })
  }
}

#[async_trait]
impl TransactionStore for PgStore {
  async fn find(&self, out_trade_no: &str, transaction_id: &str) -> StoreResult<Option<TransactionRecord>> {
    let row: Option<TransactionRow> = sqlx::query_as(
      "SELECT out_trade_no, transaction_id, order_id, owner_id, outcome, total_amount, cash_amount, \
         result_code, err_code, err_code_des, time_end, bank_type, trade_type, attach, created_at \
       FROM payment_transactions WHERE out_trade_no = $1 AND transaction_id = $2",
    )
    .bind(out_trade_no)
    .bind(transaction_id)
    .fetch_optional(&self.pool)
    .await
    .map_err(|e| store_err("find transaction", e))?;
    row.map(TransactionRecord::try_from).transpose()
  }

  async fn insert_if_absent(&self, record: &TransactionRecord) -> StoreResult<bool> {
    let result = sqlx::query(
      "INSERT INTO payment_transactions (out_trade_no, transaction_id, order_id, owner_id, outcome, \
         total_amount, cash_amount, result_code, err_code, err_code_des, time_end, bank_type, trade_type, \
         attach, created_at) \
       VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15) \
       ON CONFLICT (out_trade_no, transaction_id) DO NOTHING",
    )
    .bind(&record.out_trade_no)
    .bind(&record.transaction_id)
    .bind(&record.order_id)
    .bind(&record.owner_id)
    .bind(outcome_str(record.outcome))
    .bind(record.total_amount)
    .bind(record.cash_amount)
    .bind(&record.result_code)
    .bind(&record.err_code)
    .bind(&record.err_code_des)
    .bind(&record.time_end)
    .bind(&record.bank_type)
    .bind(&record.trade_type)
    .bind(&record.attach)
    .bind(record.created_at)
    .execute(&self.pool)
    .await
    .map_err(|e| store_err("record transaction", e))?;
    Ok(result.rows_affected() == 1)
  }

  async fn purge_before(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
    let result = sqlx::query("DELETE FROM payment_transactions WHERE created_at < $1")
      .bind(cutoff)
      .execute(&self.pool)
      .await
      .map_err(|e| store_err("purge transactions", e))?;
    Ok(result.rows_affected())
  }
}
