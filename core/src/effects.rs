// core/src/effects.rs

//! Outbound collaborators touched by the payment flow. The storefront owns
//! these systems; this crate only calls them.

use crate::error::EffectError;
use crate::model::{ManualInterventionAlert, OrderItem};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

/// Points are granted at one per whole currency unit (100 minor units).
pub const MINOR_UNITS_PER_POINT: i64 = 100;
pub const PURCHASE_POINTS_REASON: &str = "purchase";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentSuccessNotice {
  pub order_id: String,
  pub order_number: String,
  pub owner_id: String,
  pub amount: i64,
  pub transaction_id: String,
  pub paid_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PointsGrant {
  pub owner_id: String,
  pub order_id: String,
  pub points: i64,
  pub reason: String,
}

impl PointsGrant {
  pub fn for_purchase(owner_id: &str, order_id: &str, total_fee: i64) -> Self {
    Self {
      owner_id: owner_id.to_string(),
      order_id: order_id.to_string(),
      points: total_fee.max(0) / MINOR_UNITS_PER_POINT,
      reason: PURCHASE_POINTS_REASON.to_string(),
    }
  }
}

/// Atomic per-SKU reservation release: `reserved -= q, available += q`.
#[async_trait]
pub trait InventoryService: Send + Sync {
  async fn release_reservation(&self, order_id: &str, sku_id: &str, quantity: u32) -> Result<(), EffectError>;
}

/// Effects that follow a confirmed payment. All are best-effort.
#[async_trait]
pub trait PostPaymentEffects: Send + Sync {
  async fn notify_payment_success(&self, notice: &PaymentSuccessNotice) -> Result<(), EffectError>;

  async fn accrue_points(&self, grant: &PointsGrant) -> Result<(), EffectError>;

  async fn record_sales(&self, order_id: &str, items: &[OrderItem]) -> Result<(), EffectError>;

  async fn dispatch_virtual_delivery(
    &self,
    order_id: &str,
    owner_id: &str,
    items: &[OrderItem],
  ) -> Result<(), EffectError>;
}

#[async_trait]
pub trait AlertSink: Send + Sync {
  async fn raise(&self, alert: &ManualInterventionAlert) -> Result<(), EffectError>;
}

/// Collaborator that only writes log lines. Used when no downstream systems are wired.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingEffects;

#[async_trait]
impl PostPaymentEffects for LoggingEffects {
  async fn notify_payment_success(&self, notice: &PaymentSuccessNotice) -> Result<(), EffectError> {
    info!(order_number = %notice.order_number, owner_id = %notice.owner_id, amount = notice.amount, "payment success notification");
    Ok(())
  }

  async fn accrue_points(&self, grant: &PointsGrant) -> Result<(), EffectError> {
    info!(owner_id = %grant.owner_id, points = grant.points, reason = %grant.reason, "points accrued");
    Ok(())
  }

  async fn record_sales(&self, order_id: &str, items: &[OrderItem]) -> Result<(), EffectError> {
    info!(order_id, lines = items.len(), "sales counters updated");
    Ok(())
  }

  async fn dispatch_virtual_delivery(
    &self,
    order_id: &str,
    owner_id: &str,
    items: &[OrderItem],
  ) -> Result<(), EffectError> {
    let virtual_lines = items.iter().filter(|i| i.is_virtual).count();
    info!(order_id, owner_id, virtual_lines, "virtual delivery dispatched");
    Ok(())
  }
}

#[async_trait]
impl AlertSink for LoggingEffects {
  async fn raise(&self, alert: &ManualInterventionAlert) -> Result<(), EffectError> {
    warn!(
      execution_id = %alert.execution_id,
      operation_type = %alert.operation_type,
      urgency = alert.urgency.as_str(),
      "manual intervention required: {}",
      alert.error_message
    );
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::PointsGrant;

  #[test]
  fn points_round_down_to_whole_units() {
    assert_eq!(PointsGrant::for_purchase("U1", "o1", 1000).points, 10);
    assert_eq!(PointsGrant::for_purchase("U1", "o1", 1099).points, 10);
    assert_eq!(PointsGrant::for_purchase("U1", "o1", 99).points, 0);
  }
}
