// server/src/config.rs

use crate::errors::{AppError, Result};
use dotenvy::dotenv;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use teapay::{CallbackConfig, Environment, OrderNumberConfig, StrategyTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
  Postgres,
  Memory,
}

impl FromStr for StorageBackend {
  type Err = AppError;

  fn from_str(s: &str) -> Result<Self> {
    match s.to_ascii_lowercase().as_str() {
      "postgres" | "postgresql" => Ok(StorageBackend::Postgres),
      "memory" => Ok(StorageBackend::Memory),
      other => Err(AppError::Config(format!("Unknown STORAGE_BACKEND '{}'", other))),
    }
  }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
  pub server_host: String,
  pub server_port: u16,
  pub storage_backend: StorageBackend,
  /// Required for the postgres backend.
  pub database_url: Option<String>,
  pub apply_schema: bool,

  pub callback: CallbackConfig,
  pub order_numbers: OrderNumberConfig,
  pub retry_strategies: StrategyTable,

  /// Base URL of the post-payment collaborators; unset means log only.
  pub effects_base_url: Option<String>,
  pub effects_timeout: Duration,

  pub janitor_interval: Duration,
  pub retry_retention_days: i64,
  pub transaction_retention_days: i64,
}

fn var(name: &str) -> Option<String> {
  env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_var<T>(name: &str, default: T) -> Result<T>
where
  T: FromStr,
  T::Err: std::fmt::Display,
{
  match var(name) {
    Some(raw) => raw
      .trim()
      .parse::<T>()
      .map_err(|e| AppError::Config(format!("Invalid {} value '{}': {}", name, raw, e))),
    None => Ok(default),
  }
}

impl AppConfig {
  pub fn from_env() -> Result<Self> {
    dotenv().ok(); // Load .env file if present

    let server_host = var("SERVER_HOST").unwrap_or_else(|| "127.0.0.1".to_string());
    let server_port = parse_var("SERVER_PORT", 8080u16)?;
    let storage_backend = parse_var("STORAGE_BACKEND", StorageBackend::Postgres)?;
    let database_url = var("DATABASE_URL");
    if storage_backend == StorageBackend::Postgres && database_url.is_none() {
      return Err(AppError::Config(
        "Missing environment variable 'DATABASE_URL' for the postgres backend".to_string(),
      ));
    }
    let apply_schema = parse_var("APPLY_SCHEMA", false)?;

    let environment = match var("APP_ENV") {
      Some(raw) => Environment::from_str(&raw).map_err(|e| AppError::Config(e.to_string()))?,
      None => Environment::Development,
    };

    let callback = CallbackConfig {
      environment,
      verify_signature: parse_var("SIGNATURE_VERIFICATION_ENABLED", true)?,
      api_key: var("WXPAY_API_KEY"),
      lock_ttl: Duration::from_secs(parse_var("LOCK_TTL_SECS", 300u64)?),
      detach_side_effects: parse_var("DETACH_SIDE_EFFECTS", false)?,
    };
    callback.validate().map_err(|e| AppError::Config(e.to_string()))?;

    let utc_offset_hours = parse_var("BUSINESS_UTC_OFFSET_HOURS", 8i32)?;
    let order_numbers = OrderNumberConfig {
      duplicate_window: Duration::from_secs(parse_var("DUPLICATE_WINDOW_SECS", 300u64)?),
      utc_offset_secs: utc_offset_hours * 3600,
      ..OrderNumberConfig::default()
    };
    order_numbers.validate().map_err(|e| AppError::Config(e.to_string()))?;

    let retry_strategies = match var("RETRY_STRATEGIES_FILE") {
      Some(path) => {
        let json = std::fs::read_to_string(&path)
          .map_err(|e| AppError::Config(format!("Cannot read RETRY_STRATEGIES_FILE '{}': {}", path, e)))?;
        StrategyTable::builtin_with_overrides(&json).map_err(|e| AppError::Config(e.to_string()))?
      }
      None => StrategyTable::builtin(),
    };

    let effects_base_url = var("EFFECTS_BASE_URL").map(|u| u.trim_end_matches('/').to_string());
    let effects_timeout = Duration::from_secs(parse_var("EFFECTS_TIMEOUT_SECS", 10u64)?);

    let janitor_interval = Duration::from_secs(parse_var("JANITOR_INTERVAL_SECS", 60u64)?);
    let retry_retention_days = parse_var("RETRY_RETENTION_DAYS", teapay::retry::DEFAULT_RETENTION_DAYS)?;
    let transaction_retention_days = parse_var("TRANSACTION_RETENTION_DAYS", 180i64)?;

    tracing::info!(
      backend = ?storage_backend,
      environment = ?callback.environment,
      verify_signature = callback.verify_signature,
      "Application configuration loaded successfully."
    );

    Ok(Self {
      server_host,
      server_port,
      storage_backend,
      database_url,
      apply_schema,
      callback,
      order_numbers,
      retry_strategies,
      effects_base_url,
      effects_timeout,
      janitor_interval,
      retry_retention_days,
      transaction_retention_days,
    })
  }
}
