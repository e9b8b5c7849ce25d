// core/src/model/journal.rs

//! Append-only audit records. None of these are read on the hot path; they
//! exist for operators and for the retry statistics.

use crate::error::ErrorKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationMethod {
  Standard,
  Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationLogEntry {
  pub order_number: String,
  pub owner_id: String,
  pub channel: String,
  pub total_amount: i64,
  pub item_count: usize,
  pub method: GenerationMethod,
  pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryAttemptRecord {
  pub execution_id: String,
  pub operation_type: String,
  pub attempt: u32,
  pub success: bool,
  pub duration_ms: u64,
  pub error_code: Option<String>,
  pub error_kind: Option<ErrorKind>,
  pub error_message: Option<String>,
  pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryFailureRecord {
  pub execution_id: String,
  pub operation_type: String,
  pub attempts: u32,
  pub total_duration_ms: u64,
  pub error_code: Option<String>,
  pub error_kind: ErrorKind,
  pub error_message: String,
  pub needs_manual_intervention: bool,
  pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
  Low,
  Medium,
  High,
}

impl Urgency {
  /// Payment and gateway work pages someone; database work is next in line.
  pub fn for_operation(operation_type: &str) -> Self {
    if operation_type.contains("payment") || operation_type.contains("wx_") {
      Urgency::High
    } else if operation_type.contains("database") {
      Urgency::Medium
    } else {
      Urgency::Low
    }
  }

  pub fn as_str(self) -> &'static str {
    match self {
      Urgency::Low => "low",
      Urgency::Medium => "medium",
      Urgency::High => "high",
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManualInterventionAlert {
  pub execution_id: String,
  pub operation_type: String,
  pub attempts: u32,
  pub error_message: String,
  pub urgency: Urgency,
  pub channels: Vec<String>,
  pub raised_at: DateTime<Utc>,
}

/// One handled webhook delivery, whatever the outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackLogRecord {
  pub out_trade_no: String,
  pub transaction_id: String,
  pub result_code: String,
  pub process_result: String,
  pub order_id: Option<String>,
  pub order_status: Option<String>,
  pub received_at: DateTime<Utc>,
  pub processed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
  Low,
  Medium,
  High,
}

/// Persisted whenever the top-level callback handler catches an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackErrorRecord {
  pub error_id: String,
  pub error_message: String,
  pub payload: serde_json::Value,
  pub severity: Severity,
  pub recorded_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
  use super::Urgency;

  #[test]
  fn urgency_follows_operation_family() {
    assert_eq!(Urgency::for_operation("wx_unifiedorder"), Urgency::High);
    assert_eq!(Urgency::for_operation("payment_settlement"), Urgency::High);
    assert_eq!(Urgency::for_operation("database_update"), Urgency::Medium);
    assert_eq!(Urgency::for_operation("notification_send"), Urgency::Low);
  }
}
