// server/src/db/inventory.rs

use super::{store_err, PgStore};
use async_trait::async_trait;
use teapay::{EffectError, InventoryService};

#[async_trait]
impl InventoryService for PgStore {
  async fn release_reservation(&self, order_id: &str, sku_id: &str, quantity: u32) -> Result<(), EffectError> {
    let result = sqlx::query(
      "UPDATE inventory SET reserved = reserved - $2, available = available + $2, updated_at = now() \
       WHERE sku_id = $1",
    )
    .bind(sku_id)
    .bind(i64::from(quantity))
    .execute(&self.pool)
    .await
    .map_err(|e| store_err("release reservation", e))?;

    if result.rows_affected() == 0 {
      tracing::warn!(order_id, sku_id, "no inventory row to release");
      return Err(EffectError::Rejected(format!("unknown sku {}", sku_id)));
    }
    Ok(())
  }
}
