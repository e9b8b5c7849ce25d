// core/src/retry/stats.rs

use crate::model::{RetryAttemptRecord, RetryFailureRecord};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OperationCounts {
  pub attempts: usize,
  pub successes: usize,
  pub failures: usize,
}

/// Aggregate view over the retry journals.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RetryStatistics {
  pub total_attempts: usize,
  pub successful_attempts: usize,
  pub failed_attempts: usize,
  pub executions: usize,
  pub executions_retried: usize,
  /// Share of executions that needed more than one attempt.
  pub retry_rate: f64,
  pub average_attempts_per_execution: f64,
  pub max_attempt: u32,
  pub average_duration_ms: f64,
  pub terminal_failures: usize,
  pub manual_interventions: usize,
  pub by_operation: BTreeMap<String, OperationCounts>,
  pub by_error_code: BTreeMap<String, usize>,
}

impl RetryStatistics {
  pub fn from_records(attempts: &[RetryAttemptRecord], failures: &[RetryFailureRecord]) -> Self {
    let mut stats = RetryStatistics {
      total_attempts: attempts.len(),
      terminal_failures: failures.len(),
      manual_interventions: failures.iter().filter(|f| f.needs_manual_intervention).count(),
      ..Default::default()
    };

    let mut per_execution: HashMap<&str, u32> = HashMap::new();
    let mut total_duration: u64 = 0;

    for record in attempts {
      let counts = stats.by_operation.entry(record.operation_type.clone()).or_default();
      counts.attempts += 1;
      if record.success {
        counts.successes += 1;
        stats.successful_attempts += 1;
      } else {
        counts.failures += 1;
        stats.failed_attempts += 1;
        let code = record.error_code.clone().unwrap_or_else(|| "UNKNOWN".to_string());
        *stats.by_error_code.entry(code).or_default() += 1;
      }

      total_duration += record.duration_ms;
      stats.max_attempt = stats.max_attempt.max(record.attempt);
      let highest = per_execution.entry(record.execution_id.as_str()).or_default();
      *highest = (*highest).max(record.attempt);
    }

    stats.executions = per_execution.len();
    stats.executions_retried = per_execution.values().filter(|a| **a > 1).count();
    if stats.executions > 0 {
      stats.retry_rate = stats.executions_retried as f64 / stats.executions as f64;
      stats.average_attempts_per_execution = stats.total_attempts as f64 / stats.executions as f64;
    }
    if stats.total_attempts > 0 {
      stats.average_duration_ms = total_duration as f64 / stats.total_attempts as f64;
    }
    stats
  }
}
