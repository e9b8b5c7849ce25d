// core/src/callback/context.rs

use crate::clock::Clock;
use crate::config::CallbackConfig;
use crate::effects::{AlertSink, InventoryService, PostPaymentEffects};
use crate::model::{NotificationParams, Order, OrderStatus, PaymentNotification, ProcessingLock};
use crate::retry::RetryExecutor;
use crate::store::{AuditLog, LockStore, OrderStore, TransactionStore};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

/// Everything a callback step may call. Cheap to clone.
#[derive(Clone)]
pub struct CallbackServices {
  pub orders: Arc<dyn OrderStore>,
  pub transactions: Arc<dyn TransactionStore>,
  pub locks: Arc<dyn LockStore>,
  pub audit: Arc<dyn AuditLog>,
  pub inventory: Arc<dyn InventoryService>,
  pub effects: Arc<dyn PostPaymentEffects>,
  /// Paged when a charge lands on an order that can no longer take it.
  pub alerts: Arc<dyn AlertSink>,
  pub retry: Arc<RetryExecutor>,
  pub clock: Arc<dyn Clock>,
  pub config: Arc<CallbackConfig>,
}

/// Why a delivery was acknowledged the way it was.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AckReason {
  /// This delivery moved the order to paid.
  Processed,
  /// This delivery moved the order to failed.
  PaymentFailed,
  /// A transaction record already existed.
  AlreadyProcessed,
  AlreadyPaid,
  /// Another invocation holds the processing lock.
  InProgress,
  /// The guarded update found the order no longer unpaid.
  SettledConcurrently,
  /// A failure notification for an order that is no longer unpaid.
  AlreadySettled,
  InvalidNotification,
  InvalidSignature,
  Error,
}

impl AckReason {
  pub fn as_str(self) -> &'static str {
    match self {
      AckReason::Processed => "processed",
      AckReason::PaymentFailed => "payment_failed",
      AckReason::AlreadyProcessed => "already_processed",
      AckReason::AlreadyPaid => "already_paid",
      AckReason::InProgress => "in_progress",
      AckReason::SettledConcurrently => "settled_concurrently",
      AckReason::AlreadySettled => "already_settled",
      AckReason::InvalidNotification => "invalid_notification",
      AckReason::InvalidSignature => "invalid_signature",
      AckReason::Error => "error",
    }
  }
}

/// What `apply_payment_result` did to the order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
  MarkedPaid,
  MarkedFailed,
  /// Already paid before this delivery; `same_transaction` when by this very transaction.
  AlreadyPaid { same_transaction: bool },
  /// Lost the guarded update to a concurrent delivery.
  SettledConcurrently,
  /// Failure notification for an order that is no longer unpaid.
  AlreadySettled,
}

impl Settlement {
  /// Whether this delivery's transaction record belongs in the store.
  pub fn records_transaction(self) -> bool {
    matches!(
      self,
      Settlement::MarkedPaid | Settlement::MarkedFailed | Settlement::AlreadyPaid { same_transaction: true }
    )
  }

  pub fn ack_reason(self) -> AckReason {
    match self {
      Settlement::MarkedPaid => AckReason::Processed,
      Settlement::MarkedFailed => AckReason::PaymentFailed,
      Settlement::AlreadyPaid { .. } => AckReason::AlreadyPaid,
      Settlement::SettledConcurrently => AckReason::SettledConcurrently,
      Settlement::AlreadySettled => AckReason::AlreadySettled,
    }
  }
}

pub struct CallbackCtx {
  pub services: CallbackServices,
  pub params: NotificationParams,
  pub received_at: DateTime<Utc>,
  pub notification: Option<PaymentNotification>,
  pub lock: Option<ProcessingLock>,
  pub order: Option<Order>,
  pub order_status_after: Option<OrderStatus>,
  pub settlement: Option<Settlement>,
  pub ack: Option<AckReason>,
}

impl CallbackCtx {
  pub fn new(services: CallbackServices, params: NotificationParams) -> Self {
    let received_at = services.clock.now();
    Self {
      services,
      params,
      received_at,
      notification: None,
      lock: None,
      order: None,
      order_status_after: None,
      settlement: None,
      ack: None,
    }
  }
}
