// server/src/web/handlers/order_number_handlers.rs

use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use teapay::model::OrderDraft;
use teapay::order_number::DEFAULT_CHANNEL;
use tracing::{info, instrument};

use crate::errors::{AppError, Result};
use crate::state::AppState;

fn default_channel() -> String {
  DEFAULT_CHANNEL.to_string()
}

#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
  pub owner_id: String,
  #[serde(default = "default_channel")]
  pub channel: String,
  #[serde(flatten)]
  pub draft: OrderDraft,
}

#[derive(Debug, Deserialize)]
pub struct BatchRequest {
  pub owner_id: String,
  #[serde(default = "default_channel")]
  pub channel: String,
  pub count: usize,
}

#[derive(Debug, Deserialize)]
pub struct CheckExistingRequest {
  pub owner_id: String,
  #[serde(flatten)]
  pub draft: OrderDraft,
}

#[instrument(name = "handler::generate_order_number", skip(app_state, req), fields(channel = %req.channel))]
pub async fn generate_handler(app_state: web::Data<AppState>, req: web::Json<GenerateRequest>) -> Result<HttpResponse> {
  let req = req.into_inner();
  if req.draft.items.is_empty() {
    return Err(AppError::Validation("an order needs at least one item".to_string()));
  }
  let generated = app_state
    .order_numbers
    .generate(&req.owner_id, &req.channel, &req.draft)
    .await?;
  info!(order_number = %generated.order_number, method = ?generated.method, "Order number issued.");
  Ok(HttpResponse::Ok().json(generated))
}

#[instrument(name = "handler::generate_order_number_batch", skip(app_state, req), fields(count = req.count))]
pub async fn batch_handler(app_state: web::Data<AppState>, req: web::Json<BatchRequest>) -> Result<HttpResponse> {
  let numbers = app_state
    .order_numbers
    .generate_batch(req.count, &req.owner_id, &req.channel)
    .await?;
  Ok(HttpResponse::Ok().json(json!({ "count": numbers.len(), "order_numbers": numbers })))
}

#[instrument(name = "handler::check_existing_order_number", skip(app_state, req))]
pub async fn check_existing_handler(
  app_state: web::Data<AppState>,
  req: web::Json<CheckExistingRequest>,
) -> Result<HttpResponse> {
  let existing = app_state.order_numbers.check_existing(&req.owner_id, &req.draft).await;
  Ok(HttpResponse::Ok().json(json!({ "exists": existing.is_some(), "order_number": existing })))
}

#[instrument(name = "handler::parse_order_number", skip(app_state))]
pub async fn parse_handler(app_state: web::Data<AppState>, path: web::Path<String>) -> Result<HttpResponse> {
  let order_number = path.into_inner();
  let parsed = app_state.order_numbers.parse(&order_number)?;
  Ok(HttpResponse::Ok().json(json!({
    "order_number": order_number,
    "valid": app_state.order_numbers.validate(&order_number),
    "parsed": parsed,
  })))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::{AppConfig, StorageBackend};
  use actix_web::{test, App};
  use std::sync::Arc;
  use std::time::Duration;
  use teapay::order_number::{parse, ParsedOrderNumber};
  use teapay::{CallbackConfig, LoggingEffects, MemoryStore, OrderNumberConfig, StrategyTable};

  fn memory_state() -> AppState {
    let config = Arc::new(AppConfig {
      server_host: "127.0.0.1".to_string(),
      server_port: 0,
      storage_backend: StorageBackend::Memory,
      database_url: None,
      apply_schema: false,
      callback: CallbackConfig::default(),
      order_numbers: OrderNumberConfig::default(),
      retry_strategies: StrategyTable::builtin(),
      effects_base_url: None,
      effects_timeout: Duration::from_secs(5),
      janitor_interval: Duration::from_secs(60),
      retry_retention_days: 30,
      transaction_retention_days: 90,
    });
    crate::wire(
      Arc::new(MemoryStore::new()),
      None,
      config,
      Arc::new(LoggingEffects),
      Arc::new(LoggingEffects),
    )
    .state
  }

  fn channel_code_of(order_number: &str) -> String {
    match parse(order_number).unwrap() {
      ParsedOrderNumber::Standard(parts) => parts.channel_code,
      other => panic!("expected a standard number, got {:?}", other),
    }
  }

  #[actix_web::test]
  async fn request_without_channel_gets_mini_program_code() {
    let app = test::init_service(
      App::new()
        .app_data(web::Data::new(memory_state()))
        .route("/order-numbers", web::post().to(generate_handler))
        .route("/order-numbers/batch", web::post().to(batch_handler)),
    )
    .await;

    let req = test::TestRequest::post()
      .uri("/order-numbers")
      .set_json(json!({
        "owner_id": "u-1",
        "items": [{ "sku_id": "LONGJING", "quantity": 1, "price": 3200 }],
        "total_amount": 3200,
      }))
      .to_request();
    let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    let order_number = body["order_number"].as_str().unwrap();
    assert_eq!(channel_code_of(order_number), "02");

    let req = test::TestRequest::post()
      .uri("/order-numbers/batch")
      .set_json(json!({ "owner_id": "u-1", "count": 2 }))
      .to_request();
    let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    let numbers = body["order_numbers"].as_array().unwrap();
    assert_eq!(numbers.len(), 2);
    for n in numbers {
      assert_eq!(channel_code_of(n.as_str().unwrap()), "02");
    }
  }

  #[actix_web::test]
  async fn explicit_channel_is_kept() {
    let app = test::init_service(
      App::new()
        .app_data(web::Data::new(memory_state()))
        .route("/order-numbers", web::post().to(generate_handler)),
    )
    .await;

    let req = test::TestRequest::post()
      .uri("/order-numbers")
      .set_json(json!({
        "owner_id": "u-2",
        "channel": "h5",
        "items": [{ "sku_id": "PUER", "quantity": 2, "price": 5000 }],
        "total_amount": 10000,
      }))
      .to_request();
    let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(channel_code_of(body["order_number"].as_str().unwrap()), "03");
  }
}
