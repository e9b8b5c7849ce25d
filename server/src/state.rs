// server/src/state.rs

use crate::config::AppConfig;
use sqlx::PgPool;
use std::sync::Arc;
use teapay::{OrderNumberGenerator, PaymentCallbackHandler, RetryExecutor};

#[derive(Clone)]
pub struct AppState {
  /// `None` on the in-memory backend.
  pub db_pool: Option<PgPool>,
  pub callback_handler: Arc<PaymentCallbackHandler>,
  pub order_numbers: Arc<OrderNumberGenerator>,
  pub retry: Arc<RetryExecutor>,
  pub config: Arc<AppConfig>,
}
