// core/src/model/order.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Fulfilment lifecycle of an order. Tracked separately from [`PaymentStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
  Pending,
  Paid,
  Processing,
  Shipped,
  Completed,
  Cancelled,
  Refunded,
}

impl OrderStatus {
  /// The statuses this one may move to. Terminal statuses return an empty slice.
  pub fn allowed_transitions(self) -> &'static [OrderStatus] {
    match self {
      OrderStatus::Pending => &[OrderStatus::Paid, OrderStatus::Cancelled],
      OrderStatus::Paid => &[OrderStatus::Processing, OrderStatus::Cancelled],
      OrderStatus::Processing => &[OrderStatus::Shipped, OrderStatus::Cancelled],
      OrderStatus::Shipped => &[OrderStatus::Completed],
      OrderStatus::Completed | OrderStatus::Cancelled | OrderStatus::Refunded => &[],
    }
  }

  pub fn can_transition_to(self, next: OrderStatus) -> bool {
    self.allowed_transitions().contains(&next)
  }

  pub fn is_terminal(self) -> bool {
    self.allowed_transitions().is_empty()
  }

  pub fn as_str(self) -> &'static str {
    match self {
      OrderStatus::Pending => "pending",
      OrderStatus::Paid => "paid",
      OrderStatus::Processing => "processing",
      OrderStatus::Shipped => "shipped",
      OrderStatus::Completed => "completed",
      OrderStatus::Cancelled => "cancelled",
      OrderStatus::Refunded => "refunded",
    }
  }
}

/// Payment lifecycle of an order. `Paid` is reached at most once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
  Unpaid,
  Paid,
  Failed,
  Refunding,
  Refunded,
  Cancelled,
}

impl PaymentStatus {
  pub fn allowed_transitions(self) -> &'static [PaymentStatus] {
    match self {
      PaymentStatus::Unpaid => &[PaymentStatus::Paid, PaymentStatus::Failed, PaymentStatus::Cancelled],
      PaymentStatus::Paid => &[PaymentStatus::Refunding],
      PaymentStatus::Refunding => &[PaymentStatus::Refunded],
      PaymentStatus::Failed | PaymentStatus::Refunded | PaymentStatus::Cancelled => &[],
    }
  }

  pub fn can_transition_to(self, next: PaymentStatus) -> bool {
    self.allowed_transitions().contains(&next)
  }

  pub fn as_str(self) -> &'static str {
    match self {
      PaymentStatus::Unpaid => "unpaid",
      PaymentStatus::Paid => "paid",
      PaymentStatus::Failed => "failed",
      PaymentStatus::Refunding => "refunding",
      PaymentStatus::Refunded => "refunded",
      PaymentStatus::Cancelled => "cancelled",
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown status '{0}'")]
pub struct UnknownStatus(pub String);

impl FromStr for OrderStatus {
  type Err = UnknownStatus;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "pending" => Ok(OrderStatus::Pending),
      "paid" => Ok(OrderStatus::Paid),
      "processing" => Ok(OrderStatus::Processing),
      "shipped" => Ok(OrderStatus::Shipped),
      "completed" => Ok(OrderStatus::Completed),
      "cancelled" => Ok(OrderStatus::Cancelled),
      "refunded" => Ok(OrderStatus::Refunded),
      other => Err(UnknownStatus(other.to_string())),
    }
  }
}

impl FromStr for PaymentStatus {
  type Err = UnknownStatus;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "unpaid" => Ok(PaymentStatus::Unpaid),
      "paid" => Ok(PaymentStatus::Paid),
      "failed" => Ok(PaymentStatus::Failed),
      "refunding" => Ok(PaymentStatus::Refunding),
      "refunded" => Ok(PaymentStatus::Refunded),
      "cancelled" => Ok(PaymentStatus::Cancelled),
      other => Err(UnknownStatus(other.to_string())),
    }
  }
}

impl fmt::Display for OrderStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl fmt::Display for PaymentStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// A single order line. Prices are in minor units (fen).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
  pub sku_id: String,
  pub quantity: u32,
  pub price: i64,
  #[serde(default)]
  pub is_virtual: bool,
}

/// The logical content of an order as submitted by the client, before it has
/// a number.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderDraft {
  pub items: Vec<OrderItem>,
  pub total_amount: i64,
}

/// What the gateway told us about a successful payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentInfo {
  pub transaction_id: String,
  pub total_fee: i64,
  pub cash_fee: i64,
  pub time_end: String,
  pub bank_type: Option<String>,
}

/// What the gateway told us about a failed payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentErrorDetail {
  pub transaction_id: String,
  pub err_code: Option<String>,
  pub err_code_des: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipmentTracking {
  pub carrier: String,
  pub tracking_number: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
  pub id: String,
  pub order_number: String,
  pub owner_id: String,
  pub items: Vec<OrderItem>,
  pub total_amount: i64,
  pub status: OrderStatus,
  pub payment_status: PaymentStatus,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
  pub paid_at: Option<DateTime<Utc>>,
  pub payment_info: Option<PaymentInfo>,
  pub payment_error: Option<PaymentErrorDetail>,
  pub tracking: Option<ShipmentTracking>,
}

impl Order {
  /// A fresh pending, unpaid order.
  pub fn pending(
    order_number: impl Into<String>,
    owner_id: impl Into<String>,
    draft: OrderDraft,
    created_at: DateTime<Utc>,
  ) -> Self {
    Self {
      id: uuid::Uuid::new_v4().to_string(),
      order_number: order_number.into(),
      owner_id: owner_id.into(),
      items: draft.items,
      total_amount: draft.total_amount,
      status: OrderStatus::Pending,
      payment_status: PaymentStatus::Unpaid,
      created_at,
      updated_at: created_at,
      paid_at: None,
      payment_info: None,
      payment_error: None,
      tracking: None,
    }
  }

  pub fn has_virtual_items(&self) -> bool {
    self.items.iter().any(|i| i.is_virtual)
  }

  /// The gateway transaction that paid this order, if any.
  pub fn paid_by(&self) -> Option<&str> {
    self.payment_info.as_ref().map(|p| p.transaction_id.as_str())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn order_status_graph() {
    assert!(OrderStatus::Pending.can_transition_to(OrderStatus::Paid));
    assert!(OrderStatus::Pending.can_transition_to(OrderStatus::Cancelled));
    assert!(!OrderStatus::Pending.can_transition_to(OrderStatus::Shipped));
    assert!(OrderStatus::Processing.can_transition_to(OrderStatus::Shipped));
    assert!(OrderStatus::Shipped.can_transition_to(OrderStatus::Completed));
    assert!(!OrderStatus::Shipped.can_transition_to(OrderStatus::Cancelled));
    for terminal in [OrderStatus::Completed, OrderStatus::Cancelled, OrderStatus::Refunded] {
      assert!(terminal.is_terminal());
    }
  }

  #[test]
  fn payment_status_paid_is_reachable_only_from_unpaid() {
    let all = [
      PaymentStatus::Unpaid,
      PaymentStatus::Paid,
      PaymentStatus::Failed,
      PaymentStatus::Refunding,
      PaymentStatus::Refunded,
      PaymentStatus::Cancelled,
    ];
    let sources: Vec<_> = all.iter().filter(|s| s.can_transition_to(PaymentStatus::Paid)).collect();
    assert_eq!(sources, vec![&PaymentStatus::Unpaid]);
  }

  #[test]
  fn statuses_round_trip_through_strings() {
    for s in ["pending", "paid", "processing", "shipped", "completed", "cancelled", "refunded"] {
      assert_eq!(s.parse::<OrderStatus>().map(|v| v.as_str()), Ok(s));
    }
    assert!("lost".parse::<PaymentStatus>().is_err());
  }
}
