// core/src/callback/mod.rs

//! Payment-result webhook handling.
//!
//! A delivery goes through `validate_notification`, `check_idempotency`,
//! `acquire_processing_lock`, `apply_payment_result`, `record_transaction` and
//! `trigger_post_payment`; the lock release and the processing log run as
//! finalizers. `apply_payment_result` is bracketed by hooks that load the order
//! under the lock and flag charges the order could not accept. Three independent guards keep duplicates harmless: the
//! transaction record, the processing lease, and the `payment_status = unpaid`
//! condition on every order update.

pub mod context;
pub mod signature;
pub mod steps;

pub use context::{AckReason, CallbackCtx, CallbackServices, Settlement};

use crate::core::ContextData;
use crate::error::{Classify, ErrorKind, PipelineError, StoreError};
use crate::model::{CallbackErrorRecord, NotificationFieldError, NotificationParams, Severity};
use crate::pipeline::Pipeline;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, instrument, warn};

#[derive(Debug, Error)]
pub enum CallbackError {
  #[error("invalid notification: {0}")]
  InvalidNotification(#[from] NotificationFieldError),

  #[error("notification signature verification failed")]
  SignatureMismatch,

  #[error("order not found: {0}")]
  OrderNotFound(String),

  #[error("callback context is missing {0}")]
  MissingContext(&'static str),

  #[error(transparent)]
  Store(#[from] StoreError),

  #[error(transparent)]
  Pipeline(#[from] PipelineError),
}

impl CallbackError {
  /// Rejections of the delivery itself, as opposed to processing failures.
  pub fn is_rejection(&self) -> bool {
    matches!(self, CallbackError::InvalidNotification(_) | CallbackError::SignatureMismatch)
  }
}

impl Classify for CallbackError {
  fn code(&self) -> Option<&str> {
    match self {
      CallbackError::InvalidNotification(_) | CallbackError::SignatureMismatch => Some("VALIDATION_ERROR"),
      CallbackError::OrderNotFound(_) => Some("ORDER_NOT_FOUND"),
      CallbackError::MissingContext(_) | CallbackError::Pipeline(_) => Some("CONFIGURATION_ERROR"),
      CallbackError::Store(e) => e.code(),
    }
  }

  fn kind(&self) -> ErrorKind {
    match self {
      CallbackError::InvalidNotification(_) | CallbackError::SignatureMismatch => ErrorKind::Validation,
      CallbackError::OrderNotFound(_) => ErrorKind::NotFound,
      CallbackError::MissingContext(_) | CallbackError::Pipeline(_) => ErrorKind::Configuration,
      CallbackError::Store(e) => e.kind(),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AckCode {
  Success,
  Fail,
}

/// The response body the gateway expects. `FAIL` makes it redeliver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallbackAck {
  pub code: AckCode,
  pub message: String,
  #[serde(skip)]
  pub reason: AckReason,
}

impl CallbackAck {
  pub fn success(reason: AckReason) -> Self {
    Self {
      code: AckCode::Success,
      message: "OK".to_string(),
      reason,
    }
  }

  pub fn fail(reason: AckReason, message: impl Into<String>) -> Self {
    Self {
      code: AckCode::Fail,
      message: message.into(),
      reason,
    }
  }

  pub fn is_success(&self) -> bool {
    self.code == AckCode::Success
  }
}

pub struct PaymentCallbackHandler {
  services: CallbackServices,
  pipeline: Pipeline<CallbackCtx, CallbackError>,
}

impl PaymentCallbackHandler {
  pub fn new(services: CallbackServices) -> Self {
    Self {
      services,
      pipeline: build_pipeline(),
    }
  }

  pub fn services(&self) -> &CallbackServices {
    &self.services
  }

  /// Processes one delivery. Never fails: errors become a `FAIL` ack, and
  /// anything other than a rejected delivery is persisted as an error record.
  #[instrument(
    name = "PaymentCallbackHandler::handle",
    skip_all,
    fields(
      out_trade_no = params.get("out_trade_no").map(String::as_str).unwrap_or_default(),
      transaction_id = params.get("transaction_id").map(String::as_str).unwrap_or_default(),
    )
  )]
  pub async fn handle(&self, params: NotificationParams) -> CallbackAck {
    let ctx = ContextData::new(CallbackCtx::new(self.services.clone(), params));

    match self.pipeline.run(ctx.clone()).await {
      Ok(_) => {
        let reason = ctx.with(|c| c.ack).unwrap_or(AckReason::Processed);
        CallbackAck::success(reason)
      }
      Err(e) if e.is_rejection() => {
        warn!(error = %e, "notification rejected");
        let reason = match e {
          CallbackError::SignatureMismatch => AckReason::InvalidSignature,
          _ => AckReason::InvalidNotification,
        };
        CallbackAck::fail(reason, e.to_string())
      }
      Err(e) => {
        error!(error = %e, "payment callback processing failed");
        let params = ctx.with(|c| c.params.clone());
        self.record_error(&e, &params).await;
        CallbackAck::fail(AckReason::Error, e.to_string())
      }
    }
  }

  async fn record_error(&self, err: &CallbackError, params: &NotificationParams) {
    let now = self.services.clock.now();
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    let record = CallbackErrorRecord {
      error_id: format!("ERR_{}_{}", now.timestamp_millis(), &suffix[..9]),
      error_message: err.to_string(),
      payload: serde_json::to_value(params).unwrap_or(serde_json::Value::Null),
      severity: Severity::High,
      recorded_at: now,
    };
    if let Err(e) = self.services.audit.record_callback_error(&record).await {
      error!(error = %e, "failed to persist callback error record");
    }
  }
}

fn build_pipeline() -> Pipeline<CallbackCtx, CallbackError> {
  let only_success_transitions: crate::core::SkipCondition<CallbackCtx> =
    Arc::new(|c: &CallbackCtx| c.settlement != Some(Settlement::MarkedPaid));

  let mut p = Pipeline::<CallbackCtx, CallbackError>::new(&[
    ("validate_notification", false, None),
    ("check_idempotency", false, None),
    ("acquire_processing_lock", false, None),
    ("apply_payment_result", false, None),
    ("record_transaction", false, None),
    ("trigger_post_payment", true, Some(only_success_transitions)),
  ]);

  p.on_root("validate_notification", steps::validate_notification);
  p.on_root("check_idempotency", steps::check_idempotency);
  p.on_root("acquire_processing_lock", steps::acquire_processing_lock);
  p.before_root("apply_payment_result", steps::load_order);
  p.on_root("apply_payment_result", steps::apply_payment_result);
  p.after_root("apply_payment_result", steps::flag_unsettled_charge);
  p.on_root("record_transaction", steps::record_transaction_step);
  p.on_root("trigger_post_payment", steps::trigger_post_payment);

  p.finally_root("release_processing_lock", steps::release_processing_lock);
  p.finally_root("record_callback_log", steps::record_callback_log);
  p
}
