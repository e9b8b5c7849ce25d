// server/src/errors.rs

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use teapay::{OrderNumberError, StoreError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
  #[error("Validation Error: {0}")]
  Validation(String),

  #[error("Configuration Error: {0}")]
  Config(String),

  #[error("Database Error: {0}")]
  Sqlx(#[from] sqlx::Error),

  #[error("Store Error: {0}")]
  Store(#[from] StoreError),

  #[error("Order Number Error: {0}")]
  OrderNumber(#[from] OrderNumberError),

  #[error("Internal Server Error: {0}")]
  Internal(String),
}

impl From<anyhow::Error> for AppError {
  fn from(err: anyhow::Error) -> Self {
    match err.downcast::<sqlx::Error>() {
      Ok(sqlx_err) => AppError::Sqlx(sqlx_err),
      Err(err) => AppError::Internal(err.to_string()),
    }
  }
}

impl ResponseError for AppError {
  fn error_response(&self) -> HttpResponse {
    tracing::error!(application_error = %self, "Responding with error");
    match self {
      AppError::Validation(m) => HttpResponse::BadRequest().json(json!({"error": m})),
      AppError::OrderNumber(OrderNumberError::InvalidRequest(m)) => {
        HttpResponse::BadRequest().json(json!({"error": m}))
      }
      AppError::OrderNumber(OrderNumberError::Unrecognized(n)) => {
        HttpResponse::BadRequest().json(json!({"error": "Unrecognized order number", "detail": n}))
      }
      AppError::OrderNumber(e) => {
        HttpResponse::InternalServerError().json(json!({"error": "Order number generation failed", "detail": e.to_string()}))
      }
      AppError::Config(m) => {
        HttpResponse::InternalServerError().json(json!({"error": "Configuration issue", "detail": m}))
      }
      AppError::Sqlx(_) | AppError::Store(_) => {
        HttpResponse::InternalServerError().json(json!({"error": "Database operation failed"}))
      }
      AppError::Internal(m) => {
        HttpResponse::InternalServerError().json(json!({"error": "An internal error occurred", "detail": m}))
      }
    }
  }
}

pub type Result<T, E = AppError> = std::result::Result<T, E>;
