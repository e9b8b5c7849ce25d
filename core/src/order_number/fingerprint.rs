// core/src/order_number/fingerprint.rs

use crate::model::OrderItem;
use sha2::{Digest, Sha256};

/// Deterministic digest of an order's logical content: line items reduced to
/// `(sku_id, quantity, price)`, sorted, plus the total. Item order and the
/// virtual flag do not affect the result.
pub fn fingerprint(items: &[OrderItem], total_amount: i64) -> String {
  let mut lines: Vec<(&str, u32, i64)> = items.iter().map(|i| (i.sku_id.as_str(), i.quantity, i.price)).collect();
  lines.sort_unstable();

  let mut hasher = Sha256::new();
  hasher.update((lines.len() as u64).to_be_bytes());
  for (sku_id, quantity, price) in lines {
    // Length prefix keeps "ab"+"c" and "a"+"bc" apart.
    hasher.update((sku_id.len() as u64).to_be_bytes());
    hasher.update(sku_id.as_bytes());
    hasher.update(quantity.to_be_bytes());
    hasher.update(price.to_be_bytes());
  }
  hasher.update(total_amount.to_be_bytes());
  hex::encode(hasher.finalize())
}
