// core/src/model/payment.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Fields that must be present and non-empty on every notification.
pub const REQUIRED_NOTIFICATION_FIELDS: [&str; 6] =
  ["appid", "mch_id", "out_trade_no", "transaction_id", "result_code", "time_end"];

/// The raw key/value form of a gateway notification, exactly as signed.
pub type NotificationParams = BTreeMap<String, String>;

/// A payment-result notification from the gateway, after required-field
/// validation. `params` keeps the original fields for signature checks and
/// error records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentNotification {
  pub appid: String,
  pub mch_id: String,
  pub out_trade_no: String,
  pub transaction_id: String,
  pub result_code: String,
  pub err_code: Option<String>,
  pub err_code_des: Option<String>,
  pub total_fee: i64,
  pub cash_fee: i64,
  pub time_end: String,
  pub openid: Option<String>,
  pub trade_type: Option<String>,
  pub bank_type: Option<String>,
  pub attach: Option<String>,
  #[serde(skip)]
  pub params: NotificationParams,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NotificationFieldError {
  #[error("missing required field: {0}")]
  Missing(&'static str),

  #[error("field '{field}' is not a valid amount: {value}")]
  InvalidAmount { field: &'static str, value: String },
}

impl PaymentNotification {
  pub fn from_params(params: NotificationParams) -> Result<Self, NotificationFieldError> {
    for field in REQUIRED_NOTIFICATION_FIELDS {
      if params.get(field).map_or(true, |v| v.trim().is_empty()) {
        return Err(NotificationFieldError::Missing(field));
      }
    }

    let text = |key: &str| params.get(key).cloned().unwrap_or_default();
    let optional = |key: &str| params.get(key).filter(|v| !v.is_empty()).cloned();
    let amount = |key: &'static str| -> Result<i64, NotificationFieldError> {
      match params.get(key).map(|v| v.trim()).filter(|v| !v.is_empty()) {
        None => Ok(0),
        Some(raw) => raw.parse::<i64>().map_err(|_| NotificationFieldError::InvalidAmount {
          field: key,
          value: raw.to_string(),
        }),
      }
    };

    let total_fee = amount("total_fee")?;
    let cash_fee = match params.get("cash_fee").filter(|v| !v.trim().is_empty()) {
      Some(_) => amount("cash_fee")?,
      None => total_fee,
    };

    Ok(Self {
      appid: text("appid"),
      mch_id: text("mch_id"),
      out_trade_no: text("out_trade_no"),
      transaction_id: text("transaction_id"),
      result_code: text("result_code"),
      err_code: optional("err_code"),
      err_code_des: optional("err_code_des"),
      total_fee,
      cash_fee,
      time_end: text("time_end"),
      openid: optional("openid"),
      trade_type: optional("trade_type"),
      bank_type: optional("bank_type"),
      attach: optional("attach"),
      params,
    })
  }

  pub fn is_success(&self) -> bool {
    self.result_code == "SUCCESS"
  }

  /// Key shared by the processing lock and the transaction record.
  pub fn transaction_key(&self) -> String {
    transaction_key(&self.out_trade_no, &self.transaction_id)
  }
}

/// `<len>:<out_trade_no>_<transaction_id>`. The byte length of the first part
/// keeps ids that themselves contain `_` from colliding.
pub fn transaction_key(out_trade_no: &str, transaction_id: &str) -> String {
  format!("{}:{}_{}", out_trade_no.len(), out_trade_no, transaction_id)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionOutcome {
  Paid,
  Failed,
}

/// Immutable record of one processed `(out_trade_no, transaction_id)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
  pub out_trade_no: String,
  pub transaction_id: String,
  pub order_id: String,
  pub owner_id: Option<String>,
  pub outcome: TransactionOutcome,
  pub total_amount: i64,
  pub cash_amount: i64,
  pub result_code: String,
  pub err_code: Option<String>,
  pub err_code_des: Option<String>,
  pub time_end: String,
  pub bank_type: Option<String>,
  pub trade_type: Option<String>,
  pub attach: Option<String>,
  pub created_at: DateTime<Utc>,
}

impl TransactionRecord {
  pub fn from_notification(
    n: &PaymentNotification,
    order_id: &str,
    outcome: TransactionOutcome,
    created_at: DateTime<Utc>,
  ) -> Self {
    Self {
      out_trade_no: n.out_trade_no.clone(),
      transaction_id: n.transaction_id.clone(),
      order_id: order_id.to_string(),
      owner_id: n.openid.clone(),
      outcome,
      total_amount: n.total_fee,
      cash_amount: n.cash_fee,
      result_code: n.result_code.clone(),
      err_code: n.err_code.clone(),
      err_code_des: n.err_code_des.clone(),
      time_end: n.time_end.clone(),
      bank_type: n.bank_type.clone(),
      trade_type: n.trade_type.clone(),
      attach: n.attach.clone(),
      created_at,
    }
  }
}

/// A lease giving one invocation exclusive right to process a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingLock {
  pub lock_key: String,
  pub owner_token: String,
  pub out_trade_no: String,
  pub transaction_id: String,
  pub created_at: DateTime<Utc>,
  pub expires_at: DateTime<Utc>,
}

impl ProcessingLock {
  pub fn new(out_trade_no: &str, transaction_id: &str, now: DateTime<Utc>, ttl: chrono::Duration) -> Self {
    Self {
      lock_key: transaction_key(out_trade_no, transaction_id),
      owner_token: uuid::Uuid::new_v4().to_string(),
      out_trade_no: out_trade_no.to_string(),
      transaction_id: transaction_id.to_string(),
      created_at: now,
      expires_at: now + ttl,
    }
  }

  pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
    self.expires_at <= now
  }

  pub fn is_owned_by(&self, token: &str) -> bool {
    self.owner_token == token
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn params(pairs: &[(&str, &str)]) -> NotificationParams {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
  }

  #[test]
  fn missing_required_field_is_reported_by_name() {
    let p = params(&[("appid", "wx1"), ("mch_id", "m1"), ("out_trade_no", "O1"), ("result_code", "SUCCESS")]);
    assert_eq!(
      PaymentNotification::from_params(p),
      Err(NotificationFieldError::Missing("transaction_id"))
    );
  }

  #[test]
  fn cash_fee_defaults_to_total_fee() {
    let p = params(&[
      ("appid", "wx1"),
      ("mch_id", "m1"),
      ("out_trade_no", "O1"),
      ("transaction_id", "T1"),
      ("result_code", "SUCCESS"),
      ("time_end", "20240301120000"),
      ("total_fee", "1000"),
    ]);
    let n = PaymentNotification::from_params(p).expect("valid notification");
    assert_eq!(n.cash_fee, 1000);
    assert!(n.is_success());
    assert_eq!(n.transaction_key(), "2:O1_T1");
  }

  #[test]
  fn transaction_keys_do_not_collide_on_underscores() {
    assert_ne!(transaction_key("A_B", "C"), transaction_key("A", "B_C"));
    assert_ne!(transaction_key("A", "_B"), transaction_key("A_", "B"));
    let lock = ProcessingLock::new("A_B", "C", Utc::now(), chrono::Duration::seconds(60));
    assert_eq!(lock.lock_key, transaction_key("A_B", "C"));
  }

  #[test]
  fn lock_expiry_is_inclusive_of_deadline() {
    let now = Utc::now();
    let lock = ProcessingLock::new("O1", "T1", now, chrono::Duration::seconds(300));
    assert!(!lock.is_expired(now));
    assert!(lock.is_expired(now + chrono::Duration::seconds(300)));
  }
}
