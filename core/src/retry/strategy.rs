// core/src/retry/strategy.rs

use crate::error::ConfigError;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

pub const DEFAULT_STRATEGY: &str = "default";
pub const MAX_CONFIGURED_RETRIES: u32 = 10;

/// Backoff policy for one operation type. Delays are in milliseconds so the
/// table can be loaded from JSON as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryStrategy {
  pub max_retries: u32,
  pub base_delay_ms: u64,
  pub max_delay_ms: u64,
  pub backoff_factor: f64,
  pub jitter_factor: f64,
  #[serde(default)]
  pub retryable_codes: Vec<String>,
}

impl RetryStrategy {
  pub fn new(
    max_retries: u32,
    base_delay_ms: u64,
    max_delay_ms: u64,
    backoff_factor: f64,
    jitter_factor: f64,
    retryable_codes: &[&str],
  ) -> Self {
    Self {
      max_retries,
      base_delay_ms,
      max_delay_ms,
      backoff_factor,
      jitter_factor,
      retryable_codes: retryable_codes.iter().map(|c| c.to_string()).collect(),
    }
  }

  /// Total attempts including the first one.
  pub fn max_attempts(&self) -> u32 {
    self.max_retries + 1
  }

  pub fn is_retryable_code(&self, code: &str) -> bool {
    self.retryable_codes.iter().any(|c| c == code)
  }

  fn raw_delay_ms(&self, attempt: u32) -> f64 {
    let exponent = attempt.saturating_sub(1) as i32;
    self.base_delay_ms as f64 * self.backoff_factor.powi(exponent)
  }

  /// `base * factor^(attempt-1)` capped at `max_delay`, before jitter.
  /// `attempt` is the 1-based number of the attempt that just failed.
  pub fn pre_jitter_delay(&self, attempt: u32) -> Duration {
    let capped = self.raw_delay_ms(attempt).min(self.max_delay_ms as f64);
    Duration::from_millis(capped.max(0.0).round() as u64)
  }

  /// Delay before the next attempt for a jitter draw in `[-1, 1]`. The result
  /// always lies in `[0, max_delay]`.
  pub fn delay_for(&self, attempt: u32, draw: f64) -> Duration {
    let raw = self.raw_delay_ms(attempt);
    let draw = if draw.is_finite() { draw.clamp(-1.0, 1.0) } else { 0.0 };
    let jittered = raw + raw * self.jitter_factor * draw;
    let ms = if jittered.is_finite() {
      jittered.clamp(0.0, self.max_delay_ms as f64)
    } else {
      self.max_delay_ms as f64
    };
    Duration::from_millis(ms.round() as u64)
  }

  pub fn validate(&self, name: &str) -> Result<(), ConfigError> {
    let field = |f: &str| format!("{}.{}", name, f);
    if self.max_retries > MAX_CONFIGURED_RETRIES {
      return Err(ConfigError::invalid(
        field("max_retries"),
        format!("must be at most {}", MAX_CONFIGURED_RETRIES),
      ));
    }
    if self.base_delay_ms > self.max_delay_ms {
      return Err(ConfigError::invalid(field("base_delay_ms"), "must not exceed max_delay_ms"));
    }
    if !(self.backoff_factor.is_finite() && self.backoff_factor >= 0.0) {
      return Err(ConfigError::invalid(field("backoff_factor"), "must be a non-negative number"));
    }
    if !(self.jitter_factor.is_finite() && (0.0..=1.0).contains(&self.jitter_factor)) {
      return Err(ConfigError::invalid(field("jitter_factor"), "must lie in [0, 1]"));
    }
    Ok(())
  }
}

/// Strategies keyed by operation type. Unknown types get `default`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyTable {
  pub default: RetryStrategy,
  #[serde(default)]
  pub strategies: BTreeMap<String, RetryStrategy>,
}

impl Default for StrategyTable {
  fn default() -> Self {
    Self::builtin()
  }
}

impl StrategyTable {
  pub fn builtin() -> Self {
    let mut strategies = BTreeMap::new();
    strategies.insert(
      "wx_unifiedorder".to_string(),
      RetryStrategy::new(
        3,
        1000,
        10_000,
        2.0,
        0.1,
        &["SYSTEMERROR", "APPID_NOT_EXIST", "MCHID_NOT_EXIST", "NETWORK_ERROR"],
      ),
    );
    strategies.insert(
      "wx_orderquery".to_string(),
      RetryStrategy::new(5, 500, 8000, 1.5, 0.1, &["SYSTEMERROR", "NETWORK_ERROR", "TIMEOUT"]),
    );
    strategies.insert(
      "database_update".to_string(),
      RetryStrategy::new(2, 200, 2000, 2.0, 0.2, &["CONFLICT", "TIMEOUT", "TEMPORARY_FAILURE"]),
    );
    strategies.insert(
      "database_query".to_string(),
      RetryStrategy::new(3, 100, 1000, 1.5, 0.3, &["TIMEOUT", "CONNECTION_ERROR"]),
    );
    strategies.insert(
      "inventory_operation".to_string(),
      RetryStrategy::new(2, 300, 3000, 1.8, 0.15, &["VERSION_MISMATCH", "TEMPORARY_LOCK"]),
    );
    strategies.insert(
      "notification_send".to_string(),
      RetryStrategy::new(
        4,
        1000,
        15_000,
        2.5,
        0.2,
        &["NETWORK_ERROR", "SERVICE_UNAVAILABLE", "RATE_LIMITED"],
      ),
    );

    Self {
      default: RetryStrategy::new(3, 500, 5000, 1.5, 0.1, &["NETWORK_ERROR", "SYSTEM_ERROR", "TIMEOUT"]),
      strategies,
    }
  }

  /// Parses a JSON table and lays it over the built-in one: listed operation
  /// types replace their built-in entry, unlisted ones keep it.
  pub fn builtin_with_overrides(json: &str) -> Result<Self, ConfigError> {
    #[derive(Deserialize)]
    struct Overrides {
      default: Option<RetryStrategy>,
      #[serde(default)]
      strategies: BTreeMap<String, RetryStrategy>,
    }

    let overrides: Overrides =
      serde_json::from_str(json).map_err(|e| ConfigError::invalid("retry_strategies", e.to_string()))?;
    let mut table = Self::builtin();
    if let Some(default) = overrides.default {
      table.default = default;
    }
    table.strategies.extend(overrides.strategies);
    table.validate()?;
    Ok(table)
  }

  pub fn for_operation(&self, operation_type: &str) -> &RetryStrategy {
    self.strategies.get(operation_type).unwrap_or(&self.default)
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    self.default.validate(DEFAULT_STRATEGY)?;
    for (name, strategy) in &self.strategies {
      strategy.validate(name)?;
    }
    Ok(())
  }
}

/// Source of the uniform `[-1, 1]` jitter draw.
pub trait JitterSource: Send + Sync {
  fn draw(&self) -> f64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RandomJitter;

impl JitterSource for RandomJitter {
  fn draw(&self) -> f64 {
    rand::thread_rng().gen_range(-1.0..=1.0)
  }
}

/// Always returns the same draw. `FixedJitter(0.0)` disables jitter.
#[derive(Debug, Clone, Copy)]
pub struct FixedJitter(pub f64);

impl JitterSource for FixedJitter {
  fn draw(&self) -> f64 {
    self.0
  }
}
