// core/src/retry/classify.rs

use super::strategy::RetryStrategy;
use crate::error::{Classify, ErrorKind};
use std::fmt::Display;

pub const RETRYABLE_MESSAGE_KEYWORDS: [&str; 7] = [
  "timeout",
  "network",
  "connection",
  "temporary",
  "overload",
  "rate limit",
  "service unavailable",
];

pub const CRITICAL_CODES: [&str; 5] = [
  "VALIDATION_ERROR",
  "PERMISSION_DENIED",
  "CONFIGURATION_ERROR",
  "PAYMENT_GATEWAY_ERROR",
  "DATABASE_CORRUPTION",
];

pub const CRITICAL_MESSAGE_KEYWORDS: [&str; 5] = [
  "database corrupted",
  "permission denied",
  "configuration error",
  "payment gateway",
  "service permanently unavailable",
];

/// Codes with this prefix are retried for operations flagged as important.
pub const TEMPORARY_CODE_PREFIX: &str = "TEMP_";

/// Whether another attempt may help. Any one of these is enough: the code is
/// listed by the strategy, the message names a transient condition, the kind
/// is a transport failure, or the operation is important and the code is
/// marked temporary.
pub fn should_retry<E>(err: &E, strategy: &RetryStrategy, important: bool) -> bool
where
  E: Classify + Display,
{
  let code = err.code();
  if code.map_or(false, |c| strategy.is_retryable_code(c)) {
    return true;
  }

  let message = err.to_string().to_lowercase();
  if RETRYABLE_MESSAGE_KEYWORDS.iter().any(|k| message.contains(k)) {
    return true;
  }

  if matches!(err.kind(), ErrorKind::Network | ErrorKind::Timeout | ErrorKind::Connection) {
    return true;
  }

  important && code.map_or(false, |c| c.starts_with(TEMPORARY_CODE_PREFIX))
}

/// Failures that need a human: escalated instead of retried forever.
pub fn is_critical<E>(err: &E) -> bool
where
  E: Classify + Display,
{
  if err.code().map_or(false, |c| CRITICAL_CODES.contains(&c)) {
    return true;
  }
  let message = err.to_string().to_lowercase();
  CRITICAL_MESSAGE_KEYWORDS.iter().any(|k| message.contains(k))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::retry::strategy::StrategyTable;

  #[derive(Debug)]
  struct Failure {
    code: Option<&'static str>,
    kind: ErrorKind,
    message: &'static str,
  }

  impl Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
      f.write_str(self.message)
    }
  }

  impl Classify for Failure {
    fn code(&self) -> Option<&str> {
      self.code
    }

    fn kind(&self) -> ErrorKind {
      self.kind
    }
  }

  fn failure(code: Option<&'static str>, kind: ErrorKind, message: &'static str) -> Failure {
    Failure { code, kind, message }
  }

  #[test]
  fn each_rule_alone_allows_retry() {
    let table = StrategyTable::builtin();
    let s = table.for_operation("wx_unifiedorder");
    assert!(should_retry(&failure(Some("SYSTEMERROR"), ErrorKind::Other, "boom"), s, false));
    assert!(should_retry(&failure(None, ErrorKind::Other, "Upstream Timeout"), s, false));
    assert!(should_retry(&failure(None, ErrorKind::Connection, "boom"), s, false));
    assert!(should_retry(&failure(Some("TEMP_LOCKED"), ErrorKind::Other, "boom"), s, true));
  }

  #[test]
  fn unclassified_failures_stop() {
    let table = StrategyTable::builtin();
    let s = table.for_operation("wx_unifiedorder");
    assert!(!should_retry(&failure(Some("ORDERPAID"), ErrorKind::Other, "order already paid"), s, false));
    assert!(!should_retry(&failure(Some("TEMP_LOCKED"), ErrorKind::Other, "boom"), s, false));
  }

  #[test]
  fn critical_by_code_or_message() {
    assert!(is_critical(&failure(Some("PERMISSION_DENIED"), ErrorKind::Other, "nope")));
    assert!(is_critical(&failure(None, ErrorKind::Other, "Database corrupted at page 7")));
    assert!(!is_critical(&failure(Some("TIMEOUT"), ErrorKind::Timeout, "slow")));
  }
}
