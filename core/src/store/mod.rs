// core/src/store/mod.rs

//! Persistence seams. Every method is a single atomic operation against the
//! backing store: the guarded updates, the insert-if-absent calls and the
//! compare-and-swap on the sequence counter are what keep concurrent
//! invocations from stepping on each other, so implementations must not split
//! them into a read followed by a write.

use crate::error::StoreResult;
use crate::model::{
  CallbackErrorRecord, CallbackLogRecord, GenerationLogEntry, Order, PaymentErrorDetail, PaymentInfo, ProcessingLock,
  RetryAttemptRecord, RetryFailureRecord, TransactionRecord,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub mod memory;

pub use memory::MemoryStore;

#[async_trait]
pub trait OrderStore: Send + Sync {
  async fn insert(&self, order: Order) -> StoreResult<()>;

  async fn find_by_number(&self, order_number: &str) -> StoreResult<Option<Order>>;

  /// Pending orders of `owner_id` with exactly `total_amount`, created at or after `since`.
  async fn find_recent_pending(
    &self,
    owner_id: &str,
    total_amount: i64,
    since: DateTime<Utc>,
  ) -> StoreResult<Vec<Order>>;

  /// `status = paid, payment_status = paid` guarded by `payment_status = unpaid`.
  /// Returns whether a row changed.
  async fn mark_paid_if_unpaid(&self, order_number: &str, info: &PaymentInfo, at: DateTime<Utc>) -> StoreResult<bool>;

  /// `status = cancelled, payment_status = failed` guarded by `payment_status = unpaid`.
  /// Returns whether a row changed.
  async fn mark_failed_if_unpaid(
    &self,
    order_number: &str,
    detail: &PaymentErrorDetail,
    at: DateTime<Utc>,
  ) -> StoreResult<bool>;
}

/// Per-day order-number counters.
#[async_trait]
pub trait SequenceStore: Send + Sync {
  async fn current(&self, date_prefix: &str) -> StoreResult<Option<u64>>;

  /// Creates the counter with `initial`. Returns `false` if it already exists.
  async fn create(&self, date_prefix: &str, initial: u64, at: DateTime<Utc>) -> StoreResult<bool>;

  /// Sets the counter to `next` only if it still holds `expected`.
  async fn compare_and_swap(&self, date_prefix: &str, expected: u64, next: u64, at: DateTime<Utc>)
    -> StoreResult<bool>;
}

#[async_trait]
pub trait TransactionStore: Send + Sync {
  async fn find(&self, out_trade_no: &str, transaction_id: &str) -> StoreResult<Option<TransactionRecord>>;

  /// Inserts unless a record for the same `(out_trade_no, transaction_id)` exists.
  /// Returns whether this call inserted.
  async fn insert_if_absent(&self, record: &TransactionRecord) -> StoreResult<bool>;

  async fn purge_before(&self, cutoff: DateTime<Utc>) -> StoreResult<u64>;
}

#[async_trait]
pub trait LockStore: Send + Sync {
  /// Stores `lock` unless a live lock with the same key exists. A lock whose
  /// `expires_at <= now` is replaced.
  async fn try_acquire(&self, lock: &ProcessingLock, now: DateTime<Utc>) -> StoreResult<bool>;

  /// Deletes the lock only if `owner_token` still owns it.
  async fn release(&self, lock_key: &str, owner_token: &str) -> StoreResult<bool>;

  async fn purge_expired(&self, now: DateTime<Utc>) -> StoreResult<u64>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryQuery {
  pub operation_type: Option<String>,
  pub since: Option<DateTime<Utc>>,
  pub until: Option<DateTime<Utc>>,
}

impl RetryQuery {
  pub fn matches(&self, operation_type: &str, at: DateTime<Utc>) -> bool {
    self.operation_type.as_deref().map_or(true, |t| t == operation_type)
      && self.since.map_or(true, |s| at >= s)
      && self.until.map_or(true, |u| at <= u)
  }
}

/// Best-effort journals. Callers log and swallow errors from every method here.
#[async_trait]
pub trait AuditLog: Send + Sync {
  async fn record_generation(&self, entry: &GenerationLogEntry) -> StoreResult<()>;

  async fn record_retry_attempt(&self, record: &RetryAttemptRecord) -> StoreResult<()>;

  async fn record_retry_failure(&self, record: &RetryFailureRecord) -> StoreResult<()>;

  async fn record_callback(&self, record: &CallbackLogRecord) -> StoreResult<()>;

  async fn record_callback_error(&self, record: &CallbackErrorRecord) -> StoreResult<()>;

  async fn retry_attempts(&self, query: &RetryQuery) -> StoreResult<Vec<RetryAttemptRecord>>;

  async fn retry_failures(&self, query: &RetryQuery) -> StoreResult<Vec<RetryFailureRecord>>;

  /// Drops attempt and failure records older than `cutoff`.
  /// Returns `(attempts_removed, failures_removed)`.
  async fn purge_retry_records(&self, cutoff: DateTime<Utc>) -> StoreResult<(u64, u64)>;
}
