// server/src/db/orders.rs

use super::{store_err, PgStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::FromRow;
use teapay::error::StoreResult;
use teapay::model::{Order, OrderItem, PaymentErrorDetail, PaymentInfo, ShipmentTracking};
use teapay::store::OrderStore;
use teapay::StoreError;

const ORDER_COLUMNS: &str = "id, order_number, owner_id, items, total_amount, status, payment_status, \
   created_at, updated_at, paid_at, payment_info, payment_error, tracking";

#[derive(Debug, FromRow)]
struct OrderRow {
  id: String,
  order_number: String,
  owner_id: String,
  items: Json<Vec<OrderItem>>,
  total_amount: i64,
  status: String,
  payment_status: String,
  created_at: DateTime<Utc>,
  updated_at: DateTime<Utc>,
  paid_at: Option<DateTime<Utc>>,
  payment_info: Option<Json<PaymentInfo>>,
  payment_error: Option<Json<PaymentErrorDetail>>,
  tracking: Option<Json<ShipmentTracking>>,
}

impl TryFrom<OrderRow> for Order {
  type Error = StoreError;

  fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
    let corrupted = |e: teapay::model::order::UnknownStatus| {
      StoreError::Corrupted(format!("order {}: unknown status '{}'", row.order_number, e.0))
    };
    let status = row.status.parse().map_err(corrupted)?;
    let payment_status = row.payment_status.parse().map_err(corrupted)?;
    Ok(Order {
      id: row.id,
      order_number: row.order_number,
      owner_id: row.owner_id,
      items: row.items.0,
      total_amount: row.total_amount,
      status,
      payment_status,
      created_at: row.created_at,
      updated_at: row.updated_at,
      paid_at: row.paid_at,
      payment_info: row.payment_info.map(|j| j.0),
      payment_error: row.payment_error.map(|j| j.0),
      tracking: row.tracking.map(|j| j.0),
    })
  }
}

#[async_trait]
impl OrderStore for PgStore {
  async fn insert(&self, order: Order) -> StoreResult<()> {
    sqlx::query(
      "INSERT INTO orders (id, order_number, owner_id, items, total_amount, status, payment_status, \
         created_at, updated_at, paid_at, payment_info, payment_error, tracking) \
       VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
    )
    .bind(&order.id)
    .bind(&order.order_number)
    .bind(&order.owner_id)
    .bind(Json(&order.items))
    .bind(order.total_amount)
    .bind(order.status.as_str())
    .bind(order.payment_status.as_str())
    .bind(order.created_at)
    .bind(order.updated_at)
    .bind(order.paid_at)
    .bind(order.payment_info.as_ref().map(Json))
    .bind(order.payment_error.as_ref().map(Json))
    .bind(order.tracking.as_ref().map(Json))
    .execute(&self.pool)
    .await
    .map_err(|e| store_err("insert order", e))?;
    Ok(())
  }

  async fn find_by_number(&self, order_number: &str) -> StoreResult<Option<Order>> {
    let sql = format!("SELECT {} FROM orders WHERE order_number = $1", ORDER_COLUMNS);
    let row: Option<OrderRow> = sqlx::query_as(&sql)
      .bind(order_number)
      .fetch_optional(&self.pool)
      .await
      .map_err(|e| store_err("find order", e))?;
    row.map(Order::try_from).transpose()
  }

  async fn find_recent_pending(
    &self,
    owner_id: &str,
    total_amount: i64,
    since: DateTime<Utc>,
  ) -> StoreResult<Vec<Order>> {
    let sql = format!(
      "SELECT {} FROM orders \
       WHERE owner_id = $1 AND status = 'pending' AND total_amount = $2 AND created_at >= $3 \
       ORDER BY created_at DESC",
      ORDER_COLUMNS
    );
    let rows: Vec<OrderRow> = sqlx::query_as(&sql)
      .bind(owner_id)
      .bind(total_amount)
      .bind(since)
      .fetch_all(&self.pool)
      .await
      .map_err(|e| store_err("find recent pending orders", e))?;
    rows.into_iter().map(Order::try_from).collect()
  }

  async fn mark_paid_if_unpaid(&self, order_number: &str, info: &PaymentInfo, at: DateTime<Utc>) -> StoreResult<bool> {
    let result = sqlx::query(
      "UPDATE orders \
       SET status = 'paid', payment_status = 'paid', paid_at = $2, updated_at = $2, payment_info = $3 \
       WHERE order_number = $1 AND payment_status = 'unpaid'",
    )
    .bind(order_number)
    .bind(at)
    .bind(Json(info))
    .execute(&self.pool)
    .await
    .map_err(|e| store_err("mark order paid", e))?;
    Ok(result.rows_affected() == 1)
  }

  async fn mark_failed_if_unpaid(
    &self,
    order_number: &str,
    detail: &PaymentErrorDetail,
    at: DateTime<Utc>,
  ) -> StoreResult<bool> {
    let result = sqlx::query(
      "UPDATE orders \
       SET status = 'cancelled', payment_status = 'failed', updated_at = $2, payment_error = $3 \
       WHERE order_number = $1 AND payment_status = 'unpaid'",
    )
    .bind(order_number)
    .bind(at)
    .bind(Json(detail))
    .execute(&self.pool)
    .await
    .map_err(|e| store_err("mark order failed", e))?;
    Ok(result.rows_affected() == 1)
  }
}
