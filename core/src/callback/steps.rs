// core/src/callback/steps.rs

//! The named steps of the payment callback pipeline. Each step reads what it
//! needs from the context, drops the guard, then awaits.

use super::context::{AckReason, CallbackCtx, CallbackServices, Settlement};
use super::{signature, CallbackError};
use crate::core::{ContextData, PipelineControl};
use crate::effects::{PaymentSuccessNotice, PointsGrant};
use crate::model::{
  CallbackLogRecord, ManualInterventionAlert, Order, OrderStatus, PaymentErrorDetail, PaymentInfo,
  PaymentNotification, PaymentStatus, ProcessingLock, TransactionOutcome, TransactionRecord, Urgency,
};
use crate::retry::{RetryContext, ALERT_CHANNELS};
use tracing::{debug, info, instrument, warn};

type StepResult = Result<PipelineControl, CallbackError>;

pub const REFUND_REVIEW_OPERATION: &str = "payment_refund_review";

fn notification_of(ctx: &ContextData<CallbackCtx>) -> Result<(CallbackServices, PaymentNotification), CallbackError> {
  let guard = ctx.read();
  let n = guard
    .notification
    .clone()
    .ok_or(CallbackError::MissingContext("notification"))?;
  Ok((guard.services.clone(), n))
}

fn acknowledge(ctx: &ContextData<CallbackCtx>, reason: AckReason) -> StepResult {
  ctx.update(|c| c.ack = Some(reason));
  Ok(PipelineControl::Stop)
}

#[instrument(name = "step::validate_notification", skip_all)]
pub async fn validate_notification(ctx: ContextData<CallbackCtx>) -> StepResult {
  let (services, params) = ctx.with(|c| (c.services.clone(), c.params.clone()));

  let n = PaymentNotification::from_params(params)?;

  if services.config.verify_signature {
    let key = services.config.api_key.as_deref().unwrap_or_default();
    if !signature::verify(&n.params, key) {
      warn!(out_trade_no = %n.out_trade_no, transaction_id = %n.transaction_id, "notification signature mismatch");
      return Err(CallbackError::SignatureMismatch);
    }
  } else {
    debug!("signature verification disabled");
  }

  info!(
    out_trade_no = %n.out_trade_no,
    transaction_id = %n.transaction_id,
    result_code = %n.result_code,
    "payment notification accepted"
  );
  ctx.update(|c| c.notification = Some(n));
  Ok(PipelineControl::Continue)
}

/// Layered duplicate detection. Store errors here fail open: the guarded
/// update and the lock still stand behind this check.
#[instrument(name = "step::check_idempotency", skip_all)]
pub async fn check_idempotency(ctx: ContextData<CallbackCtx>) -> StepResult {
  let (services, n) = notification_of(&ctx)?;

  match services.transactions.find(&n.out_trade_no, &n.transaction_id).await {
    Ok(Some(_)) => {
      info!(out_trade_no = %n.out_trade_no, transaction_id = %n.transaction_id, "transaction already processed");
      return acknowledge(&ctx, AckReason::AlreadyProcessed);
    }
    Ok(None) => {}
    Err(e) => {
      warn!(error = %e, "transaction lookup failed, continuing");
      return Ok(PipelineControl::Continue);
    }
  }

  let order = match services.orders.find_by_number(&n.out_trade_no).await {
    Ok(Some(order)) => order,
    Ok(None) => {
      warn!(out_trade_no = %n.out_trade_no, "order for notification not found");
      return Ok(PipelineControl::Continue);
    }
    Err(e) => {
      warn!(error = %e, "order lookup failed, continuing");
      return Ok(PipelineControl::Continue);
    }
  };

  if order.payment_status == PaymentStatus::Paid && n.is_success() {
    info!(out_trade_no = %n.out_trade_no, "order already paid");
    if order.paid_by() == Some(n.transaction_id.as_str()) {
      // Paid by this transaction but the record is missing: a previous run
      // stopped between the update and the insert.
      record_transaction(&services, &n, &order, TransactionOutcome::Paid).await;
    }
    ctx.update(|c| c.order = Some(order));
    return acknowledge(&ctx, AckReason::AlreadyPaid);
  }

  Ok(PipelineControl::Continue)
}

#[instrument(name = "step::acquire_processing_lock", skip_all)]
pub async fn acquire_processing_lock(ctx: ContextData<CallbackCtx>) -> StepResult {
  let (services, n) = notification_of(&ctx)?;
  let now = services.clock.now();
  let ttl = chrono::Duration::from_std(services.config.lock_ttl).unwrap_or_else(|_| chrono::Duration::minutes(5));
  let lock = ProcessingLock::new(&n.out_trade_no, &n.transaction_id, now, ttl);

  if services.locks.try_acquire(&lock, now).await? {
    debug!(lock_key = %lock.lock_key, "processing lock acquired");
    ctx.update(|c| c.lock = Some(lock));
    Ok(PipelineControl::Continue)
  } else {
    info!(lock_key = %lock.lock_key, "another delivery is processing this transaction");
    acknowledge(&ctx, AckReason::InProgress)
  }
}

/// Before `apply_payment_result`: reads the order under the lock, so the
/// settlement decision never works from the pre-lock snapshot.
#[instrument(name = "step::load_order", skip_all)]
pub async fn load_order(ctx: ContextData<CallbackCtx>) -> StepResult {
  let (services, n) = notification_of(&ctx)?;
  let order = services
    .orders
    .find_by_number(&n.out_trade_no)
    .await?
    .ok_or_else(|| CallbackError::OrderNotFound(n.out_trade_no.clone()))?;
  ctx.update(|c| c.order = Some(order));
  Ok(PipelineControl::Continue)
}

#[instrument(name = "step::apply_payment_result", skip_all)]
pub async fn apply_payment_result(ctx: ContextData<CallbackCtx>) -> StepResult {
  let (services, n) = notification_of(&ctx)?;
  let order = ctx
    .with(|c| c.order.clone())
    .ok_or(CallbackError::MissingContext("order"))?;
  let now = services.clock.now();

  let settlement = if n.is_success() {
    settle_paid(&services, &n, &order, now).await?
  } else {
    settle_failed(&services, &n, &order, now).await?
  };

  let status_after = match settlement {
    Settlement::MarkedPaid => OrderStatus::Paid,
    Settlement::MarkedFailed => OrderStatus::Cancelled,
    _ => order.status,
  };
  info!(out_trade_no = %n.out_trade_no, ?settlement, status = %status_after, "payment result applied");

  ctx.update(|c| {
    c.order_status_after = Some(status_after);
    c.settlement = Some(settlement);
    c.ack = Some(settlement.ack_reason());
  });
  Ok(PipelineControl::Continue)
}

/// After `apply_payment_result`: a successful charge that did not settle the
/// order means money was taken for an order that cannot ship. Someone has to
/// refund it by hand.
#[instrument(name = "step::flag_unsettled_charge", skip_all)]
pub async fn flag_unsettled_charge(ctx: ContextData<CallbackCtx>) -> StepResult {
  let (services, n) = notification_of(&ctx)?;
  let settlement = ctx.with(|c| c.settlement);
  if !n.is_success() || settlement != Some(Settlement::SettledConcurrently) {
    return Ok(PipelineControl::Continue);
  }

  let current = match services.orders.find_by_number(&n.out_trade_no).await {
    Ok(order) => order,
    Err(e) => {
      warn!(error = %e, "could not re-read order after a lost settlement");
      None
    }
  };
  if let Some(order) = &current {
    if order.paid_by() == Some(n.transaction_id.as_str()) {
      return Ok(PipelineControl::Continue);
    }
  }

  let payment_status = current
    .as_ref()
    .map_or("unknown", |o| o.payment_status.as_str());
  warn!(
    out_trade_no = %n.out_trade_no,
    transaction_id = %n.transaction_id,
    payment_status,
    amount = n.total_fee,
    "payment charged for an order that did not accept it, refund needed"
  );

  let alert = ManualInterventionAlert {
    execution_id: n.transaction_key(),
    operation_type: REFUND_REVIEW_OPERATION.to_string(),
    attempts: 1,
    error_message: format!(
      "transaction {} charged {} for order {} in payment status {}",
      n.transaction_id, n.total_fee, n.out_trade_no, payment_status
    ),
    urgency: Urgency::High,
    channels: ALERT_CHANNELS.iter().map(|c| c.to_string()).collect(),
    raised_at: services.clock.now(),
  };
  if let Err(e) = services.alerts.raise(&alert).await {
    warn!(error = %e, "failed to raise refund alert");
  }
  Ok(PipelineControl::Continue)
}

async fn settle_paid(
  services: &CallbackServices,
  n: &PaymentNotification,
  order: &Order,
  now: chrono::DateTime<chrono::Utc>,
) -> Result<Settlement, CallbackError> {
  if order.payment_status == PaymentStatus::Paid {
    return Ok(Settlement::AlreadyPaid {
      same_transaction: order.paid_by() == Some(n.transaction_id.as_str()),
    });
  }

  let info = PaymentInfo {
    transaction_id: n.transaction_id.clone(),
    total_fee: n.total_fee,
    cash_fee: n.cash_fee,
    time_end: n.time_end.clone(),
    bank_type: n.bank_type.clone(),
  };
  if services.orders.mark_paid_if_unpaid(&order.order_number, &info, now).await? {
    Ok(Settlement::MarkedPaid)
  } else {
    debug!(out_trade_no = %n.out_trade_no, "order settled by a concurrent delivery");
    Ok(Settlement::SettledConcurrently)
  }
}

async fn settle_failed(
  services: &CallbackServices,
  n: &PaymentNotification,
  order: &Order,
  now: chrono::DateTime<chrono::Utc>,
) -> Result<Settlement, CallbackError> {
  if order.payment_status != PaymentStatus::Unpaid {
    info!(out_trade_no = %n.out_trade_no, payment_status = %order.payment_status, "failure for a settled order ignored");
    return Ok(Settlement::AlreadySettled);
  }

  let detail = PaymentErrorDetail {
    transaction_id: n.transaction_id.clone(),
    err_code: n.err_code.clone(),
    err_code_des: n.err_code_des.clone(),
  };
  if !services.orders.mark_failed_if_unpaid(&order.order_number, &detail, now).await? {
    return Ok(Settlement::SettledConcurrently);
  }

  release_inventory(services, order).await;
  Ok(Settlement::MarkedFailed)
}

async fn release_inventory(services: &CallbackServices, order: &Order) {
  let retry_ctx = RetryContext::default();
  for item in &order.items {
    let result = services
      .retry
      .execute("inventory_operation", &retry_ctx, || {
        services.inventory.release_reservation(&order.id, &item.sku_id, item.quantity)
      })
      .await;
    if let Err(e) = result {
      warn!(order_id = %order.id, sku_id = %item.sku_id, error = %e, "inventory release failed");
    }
  }
}

#[instrument(name = "step::record_transaction", skip_all)]
pub async fn record_transaction_step(ctx: ContextData<CallbackCtx>) -> StepResult {
  let (services, n) = notification_of(&ctx)?;
  let (order, settlement) = ctx.with(|c| (c.order.clone(), c.settlement));
  let (order, settlement) = match (order, settlement) {
    (Some(o), Some(s)) => (o, s),
    _ => return Err(CallbackError::MissingContext("settlement")),
  };

  if settlement.records_transaction() {
    let outcome = if n.is_success() {
      TransactionOutcome::Paid
    } else {
      TransactionOutcome::Failed
    };
    record_transaction(&services, &n, &order, outcome).await;
  }
  Ok(PipelineControl::Continue)
}

async fn record_transaction(
  services: &CallbackServices,
  n: &PaymentNotification,
  order: &Order,
  outcome: TransactionOutcome,
) {
  let record = TransactionRecord::from_notification(n, &order.id, outcome, services.clock.now());
  match services.transactions.insert_if_absent(&record).await {
    Ok(true) => debug!(transaction_id = %n.transaction_id, "transaction recorded"),
    Ok(false) => debug!(transaction_id = %n.transaction_id, "transaction already recorded"),
    Err(e) => warn!(transaction_id = %n.transaction_id, error = %e, "failed to record transaction"),
  }
}

#[instrument(name = "step::trigger_post_payment", skip_all)]
pub async fn trigger_post_payment(ctx: ContextData<CallbackCtx>) -> StepResult {
  let (services, n) = notification_of(&ctx)?;
  let order = ctx
    .with(|c| c.order.clone())
    .ok_or(CallbackError::MissingContext("order"))?;

  let paid_at = services.clock.now();
  if services.config.detach_side_effects {
    tokio::spawn(async move { run_post_payment(services, order, n, paid_at).await });
  } else {
    run_post_payment(services, order, n, paid_at).await;
  }
  Ok(PipelineControl::Continue)
}

/// Notification, points, sales counters and virtual delivery. Each runs
/// through the retry executor and a failure in one does not stop the others.
pub async fn run_post_payment(
  services: CallbackServices,
  order: Order,
  n: PaymentNotification,
  paid_at: chrono::DateTime<chrono::Utc>,
) {
  let retry_ctx = RetryContext::default();
  let effects = &services.effects;

  let notice = PaymentSuccessNotice {
    order_id: order.id.clone(),
    order_number: order.order_number.clone(),
    owner_id: order.owner_id.clone(),
    amount: n.total_fee,
    transaction_id: n.transaction_id.clone(),
    paid_at,
  };
  if let Err(e) = services
    .retry
    .execute("notification_send", &retry_ctx, || effects.notify_payment_success(&notice))
    .await
  {
    warn!(order_number = %order.order_number, error = %e, "payment notification failed");
  }

  let grant = PointsGrant::for_purchase(&order.owner_id, &order.id, n.total_fee);
  if grant.points > 0 {
    if let Err(e) = services
      .retry
      .execute("points_accrual", &retry_ctx, || effects.accrue_points(&grant))
      .await
    {
      warn!(order_number = %order.order_number, error = %e, "points accrual failed");
    }
  }

  if let Err(e) = services
    .retry
    .execute("sales_update", &retry_ctx, || effects.record_sales(&order.id, &order.items))
    .await
  {
    warn!(order_number = %order.order_number, error = %e, "sales counter update failed");
  }

  if order.has_virtual_items() {
    if let Err(e) = services
      .retry
      .execute("virtual_delivery", &retry_ctx, || {
        effects.dispatch_virtual_delivery(&order.id, &order.owner_id, &order.items)
      })
      .await
    {
      warn!(order_number = %order.order_number, error = %e, "virtual delivery dispatch failed");
    }
  }
}

/// Finalizer: delete the lease if this invocation still owns it.
pub async fn release_processing_lock(ctx: ContextData<CallbackCtx>) -> Result<(), CallbackError> {
  let (services, lock) = ctx.with(|c| (c.services.clone(), c.lock.clone()));
  let Some(lock) = lock else {
    return Ok(());
  };
  if !services.locks.release(&lock.lock_key, &lock.owner_token).await? {
    warn!(lock_key = %lock.lock_key, "processing lock was reclaimed before release");
  }
  ctx.write().lock = None;
  Ok(())
}

/// Finalizer: processing log for every delivery that parsed.
pub async fn record_callback_log(ctx: ContextData<CallbackCtx>) -> Result<(), CallbackError> {
  let (services, record) = ctx.with(|c| {
    let record = c.notification.as_ref().map(|n| CallbackLogRecord {
      out_trade_no: n.out_trade_no.clone(),
      transaction_id: n.transaction_id.clone(),
      result_code: n.result_code.clone(),
      process_result: c.ack.unwrap_or(AckReason::Error).as_str().to_string(),
      order_id: c.order.as_ref().map(|o| o.id.clone()),
      order_status: c
        .order_status_after
        .or_else(|| c.order.as_ref().map(|o| o.status))
        .map(|s| s.as_str().to_string()),
      received_at: c.received_at,
      processed_at: c.services.clock.now(),
    });
    (c.services.clone(), record)
  });

  if let Some(record) = record {
    if let Err(e) = services.audit.record_callback(&record).await {
      warn!(error = %e, "failed to record callback processing log");
    }
  }
  Ok(())
}
