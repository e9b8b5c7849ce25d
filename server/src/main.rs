// server/src/main.rs

mod config;
mod db;
mod errors;
mod services;
mod state;
mod web;

use crate::config::{AppConfig, StorageBackend};
use crate::db::PgStore;
use crate::services::janitor::Janitor;
use crate::services::{spawn_janitor, HttpEffects};
use crate::state::AppState;

use actix_web::{web as actix_data, App, HttpServer};
use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use teapay::retry::RandomJitter;
use teapay::store::{AuditLog, LockStore, OrderStore, SequenceStore, TransactionStore};
use teapay::{
  AlertSink, CallbackServices, Clock, InventoryService, LoggingEffects, MemoryStore, OrderNumberGenerator,
  PaymentCallbackHandler, PostPaymentEffects, RetryExecutor, SystemClock,
};
use tokio_util::sync::CancellationToken;
use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;

/// Everything that depends on the chosen storage backend.
struct Wiring {
  state: AppState,
  janitor: Janitor,
}

fn wire<S>(
  store: Arc<S>,
  db_pool: Option<sqlx::PgPool>,
  config: Arc<AppConfig>,
  effects: Arc<dyn PostPaymentEffects>,
  alerts: Arc<dyn AlertSink>,
) -> Wiring
where
  S: OrderStore + SequenceStore + TransactionStore + LockStore + AuditLog + InventoryService + 'static,
{
  let clock: Arc<dyn Clock> = Arc::new(SystemClock);

  let retry = Arc::new(RetryExecutor::new(
    config.retry_strategies.clone(),
    store.clone(),
    alerts.clone(),
    Arc::new(RandomJitter),
    clock.clone(),
  ));

  let callback_handler = Arc::new(PaymentCallbackHandler::new(CallbackServices {
    orders: store.clone(),
    transactions: store.clone(),
    locks: store.clone(),
    audit: store.clone(),
    inventory: store.clone(),
    effects,
    alerts,
    retry: retry.clone(),
    clock: clock.clone(),
    config: Arc::new(config.callback.clone()),
  }));

  let order_numbers = Arc::new(OrderNumberGenerator::new(
    store.clone(),
    store.clone(),
    store.clone(),
    clock.clone(),
    config.order_numbers.clone(),
  ));

  let janitor = Janitor {
    locks: store.clone(),
    transactions: store,
    retry: retry.clone(),
    clock,
    retry_retention_days: config.retry_retention_days,
    transaction_retention_days: config.transaction_retention_days,
  };

  Wiring {
    state: AppState {
      db_pool,
      callback_handler,
      order_numbers,
      retry,
      config,
    },
    janitor,
  }
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_max_level(Level::INFO)
    .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
    .with_span_events(FmtSpan::CLOSE)
    .init();

  tracing::info!("Starting teapay payment server...");

  let app_config = match AppConfig::from_env() {
    Ok(cfg) => Arc::new(cfg),
    Err(e) => {
      tracing::error!(error = %e, "Failed to load application configuration.");
      return Err(anyhow::anyhow!("configuration error: {}", e));
    }
  };

  let (effects, alerts): (Arc<dyn PostPaymentEffects>, Arc<dyn AlertSink>) = match &app_config.effects_base_url {
    Some(base_url) => {
      let http = Arc::new(HttpEffects::new(base_url.clone(), app_config.effects_timeout)?);
      tracing::info!(base_url = %base_url, "Post-payment collaborators reached over HTTP.");
      let effects: Arc<dyn PostPaymentEffects> = http.clone();
      let alerts: Arc<dyn AlertSink> = http;
      (effects, alerts)
    }
    None => {
      tracing::info!("EFFECTS_BASE_URL not set; post-payment effects are logged only.");
      let logging = Arc::new(LoggingEffects);
      let effects: Arc<dyn PostPaymentEffects> = logging.clone();
      let alerts: Arc<dyn AlertSink> = logging;
      (effects, alerts)
    }
  };

  let wiring = match app_config.storage_backend {
    StorageBackend::Memory => {
      tracing::warn!("Using the in-memory backend; state is lost on restart.");
      wire(Arc::new(MemoryStore::new()), None, app_config.clone(), effects, alerts)
    }
    StorageBackend::Postgres => {
      let database_url = app_config
        .database_url
        .as_deref()
        .context("DATABASE_URL is required for the postgres backend")?;
      let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
        .context("Failed to connect to the database")?;
      tracing::info!("Successfully connected to the database.");

      let store = PgStore::new(pool.clone());
      if app_config.apply_schema {
        store.apply_schema().await.context("Failed to apply schema.sql")?;
        tracing::info!("Database schema applied.");
      }
      wire(Arc::new(store), Some(pool), app_config.clone(), effects, alerts)
    }
  };

  let shutdown = CancellationToken::new();
  let janitor_handle = spawn_janitor(wiring.janitor, app_config.janitor_interval, shutdown.clone());
  let app_state = wiring.state;

  let server_address = format!("{}:{}", app_config.server_host, app_config.server_port);
  tracing::info!("Attempting to bind server to {}...", server_address);

  let result = HttpServer::new(move || {
    App::new()
      .app_data(actix_data::Data::new(app_state.clone()))
      .wrap(tracing_actix_web::TracingLogger::default())
      .configure(web::configure_app_routes)
  })
  .bind(&server_address)?
  .run()
  .await;

  shutdown.cancel();
  if let Err(e) = janitor_handle.await {
    tracing::warn!(error = %e, "Janitor task ended abnormally.");
  }

  result?;
  Ok(())
}
