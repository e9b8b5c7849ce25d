// core/src/error.rs

//! Error types shared by the stores, the collaborators and the pipeline engine.
//! Component-specific errors live next to their component (`OrderNumberError`,
//! `RetryError`, `CallbackError`).

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Coarse error classification consumed by the retry executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
  Network,
  Timeout,
  Connection,
  Validation,
  Permission,
  Configuration,
  Conflict,
  NotFound,
  Gateway,
  Corruption,
  Other,
}

impl ErrorKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      ErrorKind::Network => "network",
      ErrorKind::Timeout => "timeout",
      ErrorKind::Connection => "connection",
      ErrorKind::Validation => "validation",
      ErrorKind::Permission => "permission",
      ErrorKind::Configuration => "configuration",
      ErrorKind::Conflict => "conflict",
      ErrorKind::NotFound => "not_found",
      ErrorKind::Gateway => "gateway",
      ErrorKind::Corruption => "corruption",
      ErrorKind::Other => "other",
    }
  }
}

/// Anything the retry executor can reason about: an optional machine-readable
/// code (e.g. `SYSTEMERROR`, `TEMP_LOCKED`) and a kind. The human-readable
/// message comes from `Display`.
pub trait Classify {
  fn code(&self) -> Option<&str> {
    None
  }

  fn kind(&self) -> ErrorKind {
    ErrorKind::Other
  }
}

/// Failure of a persistence call. Every store implementation maps its driver
/// errors onto these variants so callers can classify them uniformly.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
  #[error("store unavailable: {0}")]
  Unavailable(String),

  #[error("store operation timeout: {0}")]
  Timeout(String),

  #[error("store connection error: {0}")]
  Connection(String),

  #[error("conflicting write: {0}")]
  Conflict(String),

  #[error("database corrupted: {0}")]
  Corrupted(String),

  #[error("store error: {0}")]
  Backend(String),
}

impl Classify for StoreError {
  fn code(&self) -> Option<&str> {
    match self {
      StoreError::Unavailable(_) => Some("SERVICE_UNAVAILABLE"),
      StoreError::Timeout(_) => Some("TIMEOUT"),
      StoreError::Connection(_) => Some("CONNECTION_ERROR"),
      StoreError::Conflict(_) => Some("CONFLICT"),
      StoreError::Corrupted(_) => Some("DATABASE_CORRUPTION"),
      StoreError::Backend(_) => None,
    }
  }

  fn kind(&self) -> ErrorKind {
    match self {
      StoreError::Unavailable(_) => ErrorKind::Network,
      StoreError::Timeout(_) => ErrorKind::Timeout,
      StoreError::Connection(_) => ErrorKind::Connection,
      StoreError::Conflict(_) => ErrorKind::Conflict,
      StoreError::Corrupted(_) => ErrorKind::Corruption,
      StoreError::Backend(_) => ErrorKind::Other,
    }
  }
}

/// Failure reported by an outbound collaborator (notification, points, sales,
/// fulfillment, inventory, alerting).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EffectError {
  #[error("network error reaching collaborator: {0}")]
  Network(String),

  #[error("collaborator rate limited the request: {0}")]
  RateLimited(String),

  #[error("service unavailable: {0}")]
  Unavailable(String),

  #[error("collaborator rejected the request: {0}")]
  Rejected(String),

  #[error(transparent)]
  Store(#[from] StoreError),
}

impl Classify for EffectError {
  fn code(&self) -> Option<&str> {
    match self {
      EffectError::Network(_) => Some("NETWORK_ERROR"),
      EffectError::RateLimited(_) => Some("RATE_LIMITED"),
      EffectError::Unavailable(_) => Some("SERVICE_UNAVAILABLE"),
      EffectError::Rejected(_) => None,
      EffectError::Store(e) => e.code(),
    }
  }

  fn kind(&self) -> ErrorKind {
    match self {
      EffectError::Network(_) | EffectError::RateLimited(_) | EffectError::Unavailable(_) => ErrorKind::Network,
      EffectError::Rejected(_) => ErrorKind::Validation,
      EffectError::Store(e) => e.kind(),
    }
  }
}

/// Errors raised by the pipeline engine itself rather than by a step handler.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PipelineError {
  #[error("Handler missing for non-optional step: {step_name}")]
  HandlerMissing { step_name: String },

  #[error("Step not found: {step_name}")]
  StepNotFound { step_name: String },
}

/// Invalid configuration detected at startup.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
  #[error("invalid configuration for '{field}': {message}")]
  Invalid { field: String, message: String },
}

impl ConfigError {
  pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
    ConfigError::Invalid {
      field: field.into(),
      message: message.into(),
    }
  }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
