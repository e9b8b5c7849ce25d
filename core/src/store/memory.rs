// core/src/store/memory.rs

//! In-process implementation of every store and of the inventory collaborator.
//! Each trait call takes the single mutex once, which makes every guarded
//! update, insert-if-absent and compare-and-swap atomic with respect to the
//! others.

use super::{AuditLog, LockStore, OrderStore, RetryQuery, SequenceStore, TransactionStore};
use crate::effects::InventoryService;
use crate::error::{EffectError, StoreResult};
use crate::model::{
  CallbackErrorRecord, CallbackLogRecord, GenerationLogEntry, Order, OrderStatus, PaymentErrorDetail, PaymentInfo,
  PaymentStatus, ProcessingLock, RetryAttemptRecord, RetryFailureRecord, TransactionRecord,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StockLevel {
  pub available: i64,
  pub reserved: i64,
}

#[derive(Debug, Default)]
struct Inner {
  orders: HashMap<String, Order>,
  sequences: HashMap<String, u64>,
  transactions: HashMap<(String, String), TransactionRecord>,
  locks: HashMap<String, ProcessingLock>,
  stock: HashMap<String, StockLevel>,
  generation_log: Vec<GenerationLogEntry>,
  retry_attempts: Vec<RetryAttemptRecord>,
  retry_failures: Vec<RetryFailureRecord>,
  callback_log: Vec<CallbackLogRecord>,
  callback_errors: Vec<CallbackErrorRecord>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
  inner: Mutex<Inner>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn set_stock(&self, sku_id: &str, level: StockLevel) {
    self.inner.lock().stock.insert(sku_id.to_string(), level);
  }

  pub fn stock(&self, sku_id: &str) -> StockLevel {
    self.inner.lock().stock.get(sku_id).copied().unwrap_or_default()
  }

  pub fn order(&self, order_number: &str) -> Option<Order> {
    self.inner.lock().orders.get(order_number).cloned()
  }

  pub fn transactions(&self) -> Vec<TransactionRecord> {
    self.inner.lock().transactions.values().cloned().collect()
  }

  pub fn locks(&self) -> Vec<ProcessingLock> {
    self.inner.lock().locks.values().cloned().collect()
  }

  pub fn sequence(&self, date_prefix: &str) -> Option<u64> {
    self.inner.lock().sequences.get(date_prefix).copied()
  }

  pub fn generation_log(&self) -> Vec<GenerationLogEntry> {
    self.inner.lock().generation_log.clone()
  }

  pub fn callback_log(&self) -> Vec<CallbackLogRecord> {
    self.inner.lock().callback_log.clone()
  }

  pub fn callback_errors(&self) -> Vec<CallbackErrorRecord> {
    self.inner.lock().callback_errors.clone()
  }
}

#[async_trait]
impl OrderStore for MemoryStore {
  async fn insert(&self, order: Order) -> StoreResult<()> {
    self.inner.lock().orders.insert(order.order_number.clone(), order);
    Ok(())
  }

  async fn find_by_number(&self, order_number: &str) -> StoreResult<Option<Order>> {
    Ok(self.inner.lock().orders.get(order_number).cloned())
  }

  async fn find_recent_pending(
    &self,
    owner_id: &str,
    total_amount: i64,
    since: DateTime<Utc>,
  ) -> StoreResult<Vec<Order>> {
    let guard = self.inner.lock();
    let mut found: Vec<Order> = guard
      .orders
      .values()
      .filter(|o| {
        o.owner_id == owner_id
          && o.status == OrderStatus::Pending
          && o.total_amount == total_amount
          && o.created_at >= since
      })
      .cloned()
      .collect();
    found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(found)
  }

  async fn mark_paid_if_unpaid(&self, order_number: &str, info: &PaymentInfo, at: DateTime<Utc>) -> StoreResult<bool> {
    let mut guard = self.inner.lock();
    match guard.orders.get_mut(order_number) {
      Some(order) if order.payment_status == PaymentStatus::Unpaid => {
        order.status = OrderStatus::Paid;
        order.payment_status = PaymentStatus::Paid;
        order.paid_at = Some(at);
        order.updated_at = at;
        order.payment_info = Some(info.clone());
        Ok(true)
      }
      _ => Ok(false),
    }
  }

  async fn mark_failed_if_unpaid(
    &self,
    order_number: &str,
    detail: &PaymentErrorDetail,
    at: DateTime<Utc>,
  ) -> StoreResult<bool> {
    let mut guard = self.inner.lock();
    match guard.orders.get_mut(order_number) {
      Some(order) if order.payment_status == PaymentStatus::Unpaid => {
        order.status = OrderStatus::Cancelled;
        order.payment_status = PaymentStatus::Failed;
        order.updated_at = at;
        order.payment_error = Some(detail.clone());
        Ok(true)
      }
      _ => Ok(false),
    }
  }
}

#[async_trait]
impl SequenceStore for MemoryStore {
  async fn current(&self, date_prefix: &str) -> StoreResult<Option<u64>> {
    Ok(self.inner.lock().sequences.get(date_prefix).copied())
  }

  async fn create(&self, date_prefix: &str, initial: u64, _at: DateTime<Utc>) -> StoreResult<bool> {
    let mut guard = self.inner.lock();
    if guard.sequences.contains_key(date_prefix) {
      return Ok(false);
    }
    guard.sequences.insert(date_prefix.to_string(), initial);
    Ok(true)
  }

  async fn compare_and_swap(
    &self,
    date_prefix: &str,
    expected: u64,
    next: u64,
    _at: DateTime<Utc>,
  ) -> StoreResult<bool> {
    let mut guard = self.inner.lock();
    match guard.sequences.get_mut(date_prefix) {
      Some(current) if *current == expected => {
        *current = next;
        Ok(true)
      }
      _ => Ok(false),
    }
  }
}

#[async_trait]
impl TransactionStore for MemoryStore {
  async fn find(&self, out_trade_no: &str, transaction_id: &str) -> StoreResult<Option<TransactionRecord>> {
    let key = (out_trade_no.to_string(), transaction_id.to_string());
    Ok(self.inner.lock().transactions.get(&key).cloned())
  }

  async fn insert_if_absent(&self, record: &TransactionRecord) -> StoreResult<bool> {
    let key = (record.out_trade_no.clone(), record.transaction_id.clone());
    let mut guard = self.inner.lock();
    if guard.transactions.contains_key(&key) {
      return Ok(false);
    }
    guard.transactions.insert(key, record.clone());
    Ok(true)
  }

  async fn purge_before(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
    let mut guard = self.inner.lock();
    let before = guard.transactions.len();
    guard.transactions.retain(|_, r| r.created_at >= cutoff);
    Ok((before - guard.transactions.len()) as u64)
  }
}

#[async_trait]
impl LockStore for MemoryStore {
  async fn try_acquire(&self, lock: &ProcessingLock, now: DateTime<Utc>) -> StoreResult<bool> {
    let mut guard = self.inner.lock();
    if let Some(existing) = guard.locks.get(&lock.lock_key) {
      if !existing.is_expired(now) {
        return Ok(false);
      }
    }
    guard.locks.insert(lock.lock_key.clone(), lock.clone());
    Ok(true)
  }

  async fn release(&self, lock_key: &str, owner_token: &str) -> StoreResult<bool> {
    let mut guard = self.inner.lock();
    match guard.locks.get(lock_key) {
      Some(existing) if existing.is_owned_by(owner_token) => {
        guard.locks.remove(lock_key);
        Ok(true)
      }
      _ => Ok(false),
    }
  }

  async fn purge_expired(&self, now: DateTime<Utc>) -> StoreResult<u64> {
    let mut guard = self.inner.lock();
    let before = guard.locks.len();
    guard.locks.retain(|_, l| !l.is_expired(now));
    Ok((before - guard.locks.len()) as u64)
  }
}

#[async_trait]
impl AuditLog for MemoryStore {
  async fn record_generation(&self, entry: &GenerationLogEntry) -> StoreResult<()> {
    self.inner.lock().generation_log.push(entry.clone());
    Ok(())
  }

  async fn record_retry_attempt(&self, record: &RetryAttemptRecord) -> StoreResult<()> {
    self.inner.lock().retry_attempts.push(record.clone());
    Ok(())
  }

  async fn record_retry_failure(&self, record: &RetryFailureRecord) -> StoreResult<()> {
    self.inner.lock().retry_failures.push(record.clone());
    Ok(())
  }

  async fn record_callback(&self, record: &CallbackLogRecord) -> StoreResult<()> {
    self.inner.lock().callback_log.push(record.clone());
    Ok(())
  }

  async fn record_callback_error(&self, record: &CallbackErrorRecord) -> StoreResult<()> {
    self.inner.lock().callback_errors.push(record.clone());
    Ok(())
  }

  async fn retry_attempts(&self, query: &RetryQuery) -> StoreResult<Vec<RetryAttemptRecord>> {
    Ok(
      self
        .inner
        .lock()
        .retry_attempts
        .iter()
        .filter(|r| query.matches(&r.operation_type, r.recorded_at))
        .cloned()
        .collect(),
    )
  }

  async fn retry_failures(&self, query: &RetryQuery) -> StoreResult<Vec<RetryFailureRecord>> {
    Ok(
      self
        .inner
        .lock()
        .retry_failures
        .iter()
        .filter(|r| query.matches(&r.operation_type, r.recorded_at))
        .cloned()
        .collect(),
    )
  }

  async fn purge_retry_records(&self, cutoff: DateTime<Utc>) -> StoreResult<(u64, u64)> {
    let mut guard = self.inner.lock();
    let attempts_before = guard.retry_attempts.len();
    let failures_before = guard.retry_failures.len();
    guard.retry_attempts.retain(|r| r.recorded_at >= cutoff);
    guard.retry_failures.retain(|r| r.recorded_at >= cutoff);
    Ok((
      (attempts_before - guard.retry_attempts.len()) as u64,
      (failures_before - guard.retry_failures.len()) as u64,
    ))
  }
}

#[async_trait]
impl InventoryService for MemoryStore {
  async fn release_reservation(&self, _order_id: &str, sku_id: &str, quantity: u32) -> Result<(), EffectError> {
    let mut guard = self.inner.lock();
    let level = guard.stock.entry(sku_id.to_string()).or_default();
    level.reserved -= i64::from(quantity);
    level.available += i64::from(quantity);
    Ok(())
  }
}
