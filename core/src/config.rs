// core/src/config.rs

//! Tunables for the generator and the callback handler. The retry strategy
//! table lives in `retry::strategy`.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
  Development,
  Staging,
  Production,
}

impl Environment {
  pub fn is_production(self) -> bool {
    matches!(self, Environment::Production)
  }
}

impl FromStr for Environment {
  type Err = ConfigError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "development" | "dev" => Ok(Environment::Development),
      "staging" => Ok(Environment::Staging),
      "production" | "prod" => Ok(Environment::Production),
      other => Err(ConfigError::invalid("environment", format!("unknown environment '{}'", other))),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderNumberConfig {
  /// Identical drafts from one owner inside this window get the same number.
  pub duplicate_window: Duration,
  /// CAS retries on the day counter before falling back to a random sequence.
  pub sequence_max_retries: u32,
  /// Linear backoff between CAS retries: `step * attempt`.
  pub sequence_backoff_step: Duration,
  /// Offset applied to UTC when deriving the `YYYYMMDD` prefix.
  pub utc_offset_secs: i32,
  /// Pause between mints in a batch.
  pub batch_pause: Duration,
  pub max_batch_size: usize,
}

impl Default for OrderNumberConfig {
  fn default() -> Self {
    Self {
      duplicate_window: Duration::from_secs(5 * 60),
      sequence_max_retries: 3,
      sequence_backoff_step: Duration::from_millis(50),
      utc_offset_secs: 8 * 3600,
      batch_pause: Duration::from_millis(10),
      max_batch_size: 100,
    }
  }
}

impl OrderNumberConfig {
  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.utc_offset_secs.abs() >= 24 * 3600 {
      return Err(ConfigError::invalid("utc_offset_secs", "offset must be within one day"));
    }
    if self.max_batch_size == 0 {
      return Err(ConfigError::invalid("max_batch_size", "must be at least 1"));
    }
    Ok(())
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackConfig {
  pub environment: Environment,
  pub verify_signature: bool,
  /// Merchant API key used for HMAC-SHA256 notification signatures.
  pub api_key: Option<String>,
  pub lock_ttl: Duration,
  /// Run post-payment effects on background tasks instead of before the ack.
  pub detach_side_effects: bool,
}

impl Default for CallbackConfig {
  fn default() -> Self {
    Self {
      environment: Environment::Development,
      verify_signature: true,
      api_key: None,
      lock_ttl: Duration::from_secs(5 * 60),
      detach_side_effects: false,
    }
  }
}

impl CallbackConfig {
  /// Signature checks may only be switched off outside production, and an
  /// enabled check needs a key.
  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.environment.is_production() && !self.verify_signature {
      return Err(ConfigError::invalid(
        "verify_signature",
        "signature verification cannot be disabled in production",
      ));
    }
    if self.verify_signature && self.api_key.as_deref().map_or(true, str::is_empty) {
      return Err(ConfigError::invalid("api_key", "signature verification requires an api key"));
    }
    if self.lock_ttl.is_zero() {
      return Err(ConfigError::invalid("lock_ttl", "must be greater than zero"));
    }
    Ok(())
  }
}
