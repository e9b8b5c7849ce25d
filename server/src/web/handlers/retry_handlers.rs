// server/src/web/handlers/retry_handlers.rs

use actix_web::{web, HttpResponse};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use teapay::store::RetryQuery;
use tracing::instrument;

use crate::errors::{AppError, Result};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct StatisticsQuery {
  pub operation_type: Option<String>,
  pub start: Option<DateTime<Utc>>,
  pub end: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct CleanupRequest {
  pub days_to_keep: Option<i64>,
}

pub async fn strategies_handler(app_state: web::Data<AppState>) -> HttpResponse {
  HttpResponse::Ok().json(app_state.retry.strategies())
}

#[instrument(name = "handler::retry_statistics", skip(app_state))]
pub async fn statistics_handler(
  app_state: web::Data<AppState>,
  query: web::Query<StatisticsQuery>,
) -> Result<HttpResponse> {
  let query = query.into_inner();
  if let (Some(start), Some(end)) = (query.start, query.end) {
    if start > end {
      return Err(AppError::Validation("start must not be after end".to_string()));
    }
  }
  let stats = app_state
    .retry
    .statistics(&RetryQuery {
      operation_type: query.operation_type,
      since: query.start,
      until: query.end,
    })
    .await?;
  Ok(HttpResponse::Ok().json(stats))
}

#[instrument(name = "handler::retry_cleanup", skip(app_state))]
pub async fn cleanup_handler(app_state: web::Data<AppState>, req: web::Json<CleanupRequest>) -> Result<HttpResponse> {
  let days = req.days_to_keep.unwrap_or(app_state.config.retry_retention_days);
  if days < 0 {
    return Err(AppError::Validation("days_to_keep must not be negative".to_string()));
  }
  let (attempts, failures) = app_state.retry.cleanup(days).await?;
  Ok(HttpResponse::Ok().json(json!({
    "days_to_keep": days,
    "attempts_removed": attempts,
    "failures_removed": failures,
  })))
}
