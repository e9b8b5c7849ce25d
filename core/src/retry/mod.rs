// core/src/retry/mod.rs

//! Bounded retries with exponential backoff, jitter and error classification.
//! Every attempt is journaled; the final failure is recorded and, when it looks
//! critical, escalated for manual intervention.

pub mod classify;
pub mod stats;
pub mod strategy;

pub use classify::{is_critical, should_retry};
pub use stats::{OperationCounts, RetryStatistics};
pub use strategy::{FixedJitter, JitterSource, RandomJitter, RetryStrategy, StrategyTable};

use crate::clock::Clock;
use crate::effects::AlertSink;
use crate::error::{Classify, StoreError};
use crate::model::{ManualInterventionAlert, RetryAttemptRecord, RetryFailureRecord, Urgency};
use crate::store::{AuditLog, RetryQuery};
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

pub const ALERT_CHANNELS: [&str; 3] = ["email", "wechat", "sms"];
pub const DEFAULT_RETENTION_DAYS: i64 = 30;

/// Per-call knobs for [`RetryExecutor::execute`].
#[derive(Debug, Clone, Default)]
pub struct RetryContext {
  /// Also retry `TEMP_*` codes.
  pub important: bool,
  pub cancel: Option<CancellationToken>,
  /// No sleep may end past this instant.
  pub deadline: Option<Instant>,
}

impl RetryContext {
  pub fn important(mut self) -> Self {
    self.important = true;
    self
  }

  pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
    self.cancel = Some(token);
    self
  }

  pub fn with_deadline(mut self, deadline: Instant) -> Self {
    self.deadline = Some(deadline);
    self
  }

  pub fn with_timeout(self, timeout: Duration) -> Self {
    self.with_deadline(Instant::now() + timeout)
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryOutcome<T> {
  pub value: T,
  pub attempts: u32,
  pub execution_id: String,
  pub elapsed: Duration,
}

#[derive(Debug)]
pub enum RetryError<E> {
  Exhausted { source: E, attempts: u32 },
  NonRetryable { source: E, attempts: u32 },
  Cancelled { attempts: u32, last_error: Option<E> },
  DeadlineExceeded { attempts: u32, last_error: Option<E> },
}

impl<E: Display> Display for RetryError<E> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      RetryError::Exhausted { source, attempts } => write!(f, "gave up after {} attempt(s): {}", attempts, source),
      RetryError::NonRetryable { source, attempts } => {
        write!(f, "non-retryable failure on attempt {}: {}", attempts, source)
      }
      RetryError::Cancelled { attempts, .. } => write!(f, "cancelled after {} attempt(s)", attempts),
      RetryError::DeadlineExceeded { attempts, .. } => write!(f, "deadline exceeded after {} attempt(s)", attempts),
    }
  }
}

impl<E: std::error::Error + 'static> std::error::Error for RetryError<E> {
  fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
    match self {
      RetryError::Exhausted { source, .. } | RetryError::NonRetryable { source, .. } => Some(source),
      RetryError::Cancelled { last_error, .. } | RetryError::DeadlineExceeded { last_error, .. } => {
        last_error.as_ref().map(|e| e as &(dyn std::error::Error + 'static))
      }
    }
  }
}

impl<E> RetryError<E> {
  pub fn attempts(&self) -> u32 {
    match self {
      RetryError::Exhausted { attempts, .. }
      | RetryError::NonRetryable { attempts, .. }
      | RetryError::Cancelled { attempts, .. }
      | RetryError::DeadlineExceeded { attempts, .. } => *attempts,
    }
  }

  /// The last error returned by the operation, if it ran at all.
  pub fn into_last_error(self) -> Option<E> {
    match self {
      RetryError::Exhausted { source, .. } | RetryError::NonRetryable { source, .. } => Some(source),
      RetryError::Cancelled { last_error, .. } | RetryError::DeadlineExceeded { last_error, .. } => last_error,
    }
  }
}

pub struct RetryExecutor {
  strategies: Arc<StrategyTable>,
  audit: Arc<dyn AuditLog>,
  alerts: Arc<dyn AlertSink>,
  jitter: Arc<dyn JitterSource>,
  clock: Arc<dyn Clock>,
}

impl RetryExecutor {
  pub fn new(
    strategies: StrategyTable,
    audit: Arc<dyn AuditLog>,
    alerts: Arc<dyn AlertSink>,
    jitter: Arc<dyn JitterSource>,
    clock: Arc<dyn Clock>,
  ) -> Self {
    Self {
      strategies: Arc::new(strategies),
      audit,
      alerts,
      jitter,
      clock,
    }
  }

  pub fn strategies(&self) -> &StrategyTable {
    &self.strategies
  }

  /// Runs `operation` until it succeeds, fails with a non-retryable error,
  /// runs out of attempts, is cancelled, or would overrun the deadline.
  /// Attempts already in flight are never aborted.
  #[instrument(name = "RetryExecutor::execute", skip(self, ctx, operation), fields(important = ctx.important))]
  pub async fn execute<T, E, F, Fut>(
    &self,
    operation_type: &str,
    ctx: &RetryContext,
    mut operation: F,
  ) -> Result<RetryOutcome<T>, RetryError<E>>
  where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Classify + Display,
  {
    let strategy = self.strategies.for_operation(operation_type);
    let execution_id = new_execution_id(self.clock.now().timestamp_millis());
    let started = Instant::now();

    if ctx.cancel.as_ref().map_or(false, CancellationToken::is_cancelled) {
      return Err(RetryError::Cancelled {
        attempts: 0,
        last_error: None,
      });
    }

    let mut attempt: u32 = 0;
    loop {
      attempt += 1;
      let attempt_started = Instant::now();
      let result = operation().await;
      let duration = attempt_started.elapsed();

      let err = match result {
        Ok(value) => {
          self
            .journal_attempt::<E>(&execution_id, operation_type, attempt, duration, None)
            .await;
          if attempt > 1 {
            info!(execution_id = %execution_id, attempt, "operation succeeded after retry");
          }
          return Ok(RetryOutcome {
            value,
            attempts: attempt,
            execution_id,
            elapsed: started.elapsed(),
          });
        }
        Err(err) => err,
      };

      self
        .journal_attempt(&execution_id, operation_type, attempt, duration, Some(&err))
        .await;

      let retryable = should_retry(&err, strategy, ctx.important);
      if !retryable {
        warn!(execution_id = %execution_id, attempt, error = %err, "non-retryable failure");
        self
          .record_failure(&execution_id, operation_type, attempt, started.elapsed(), &err)
          .await;
        return Err(RetryError::NonRetryable {
          source: err,
          attempts: attempt,
        });
      }
      if attempt >= strategy.max_attempts() {
        warn!(execution_id = %execution_id, attempt, error = %err, "retries exhausted");
        self
          .record_failure(&execution_id, operation_type, attempt, started.elapsed(), &err)
          .await;
        return Err(RetryError::Exhausted {
          source: err,
          attempts: attempt,
        });
      }

      let delay = strategy.delay_for(attempt, self.jitter.draw());
      if let Some(deadline) = ctx.deadline {
        if Instant::now() + delay > deadline {
          warn!(execution_id = %execution_id, attempt, "next retry would pass the deadline");
          self
            .record_failure(&execution_id, operation_type, attempt, started.elapsed(), &err)
            .await;
          return Err(RetryError::DeadlineExceeded {
            attempts: attempt,
            last_error: Some(err),
          });
        }
      }

      debug!(execution_id = %execution_id, attempt, delay_ms = delay.as_millis() as u64, error = %err, "retrying");
      match &ctx.cancel {
        Some(token) => {
          tokio::select! {
            _ = token.cancelled() => {
              info!(execution_id = %execution_id, attempt, "retry cancelled");
              return Err(RetryError::Cancelled { attempts: attempt, last_error: Some(err) });
            }
            _ = tokio::time::sleep(delay) => {}
          }
        }
        None => tokio::time::sleep(delay).await,
      }
    }
  }

  /// Aggregates the journals, optionally filtered by type and time range.
  pub async fn statistics(&self, query: &RetryQuery) -> Result<RetryStatistics, StoreError> {
    let attempts = self.audit.retry_attempts(query).await?;
    let failures = self.audit.retry_failures(query).await?;
    Ok(RetryStatistics::from_records(&attempts, &failures))
  }

  /// Drops journal entries older than `days_to_keep` days.
  #[instrument(name = "RetryExecutor::cleanup", skip(self))]
  pub async fn cleanup(&self, days_to_keep: i64) -> Result<(u64, u64), StoreError> {
    let cutoff = self.clock.now() - chrono::Duration::days(days_to_keep.max(0));
    let removed = self.audit.purge_retry_records(cutoff).await?;
    info!(attempts_removed = removed.0, failures_removed = removed.1, "retry journals cleaned");
    Ok(removed)
  }

  async fn journal_attempt<E: Classify + Display>(
    &self,
    execution_id: &str,
    operation_type: &str,
    attempt: u32,
    duration: Duration,
    err: Option<&E>,
  ) {
    let record = RetryAttemptRecord {
      execution_id: execution_id.to_string(),
      operation_type: operation_type.to_string(),
      attempt,
      success: err.is_none(),
      duration_ms: duration.as_millis() as u64,
      error_code: err.and_then(|e| e.code().map(str::to_string)),
      error_kind: err.map(|e| e.kind()),
      error_message: err.map(|e| e.to_string()),
      recorded_at: self.clock.now(),
    };
    if let Err(e) = self.audit.record_retry_attempt(&record).await {
      warn!(error = %e, "failed to journal retry attempt");
    }
  }

  async fn record_failure<E: Classify + Display>(
    &self,
    execution_id: &str,
    operation_type: &str,
    attempts: u32,
    elapsed: Duration,
    err: &E,
  ) {
    let critical = is_critical(err);
    let record = RetryFailureRecord {
      execution_id: execution_id.to_string(),
      operation_type: operation_type.to_string(),
      attempts,
      total_duration_ms: elapsed.as_millis() as u64,
      error_code: err.code().map(str::to_string),
      error_kind: err.kind(),
      error_message: err.to_string(),
      needs_manual_intervention: critical,
      recorded_at: self.clock.now(),
    };
    if let Err(e) = self.audit.record_retry_failure(&record).await {
      warn!(error = %e, "failed to record retry failure");
    }

    if critical {
      let alert = ManualInterventionAlert {
        execution_id: execution_id.to_string(),
        operation_type: operation_type.to_string(),
        attempts,
        error_message: record.error_message.clone(),
        urgency: Urgency::for_operation(operation_type),
        channels: ALERT_CHANNELS.iter().map(|c| c.to_string()).collect(),
        raised_at: record.recorded_at,
      };
      error!(
        execution_id,
        operation_type,
        urgency = alert.urgency.as_str(),
        "critical failure needs manual intervention: {}",
        alert.error_message
      );
      if let Err(e) = self.alerts.raise(&alert).await {
        warn!(error = %e, "failed to raise manual intervention alert");
      }
    }
  }
}

fn new_execution_id(epoch_millis: i64) -> String {
  let suffix = uuid::Uuid::new_v4().simple().to_string();
  format!("EXEC_{}_{}", epoch_millis, &suffix[..9])
}
