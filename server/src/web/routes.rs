// server/src/web/routes.rs

use actix_web::{web, HttpResponse};
use serde_json::json;

use crate::state::AppState;
use crate::web::handlers::{order_number_handlers, retry_handlers, webhook_handlers};

/// Reports `ok`, or `degraded` with HTTP 503 when the database does not answer.
async fn health_check_handler(app_state: web::Data<AppState>) -> HttpResponse {
  let Some(pool) = app_state.db_pool.as_ref() else {
    return HttpResponse::Ok().json(json!({ "status": "ok", "backend": "memory" }));
  };
  match sqlx::query("SELECT 1").execute(pool).await {
    Ok(_) => HttpResponse::Ok().json(json!({ "status": "ok", "backend": "postgres" })),
    Err(e) => {
      tracing::warn!(error = %e, "Health check could not reach the database.");
      HttpResponse::ServiceUnavailable().json(json!({ "status": "degraded", "backend": "postgres" }))
    }
  }
}

pub fn configure_app_routes(cfg: &mut web::ServiceConfig) {
  cfg.service(
    web::scope("/api/v1")
      .route("/health", web::get().to(health_check_handler))
      .service(
        web::scope("/webhooks").route(
          "/wechat-pay",
          web::post().to(webhook_handlers::wechat_pay_webhook_handler),
        ),
      )
      .service(
        web::scope("/order-numbers")
          .route("", web::post().to(order_number_handlers::generate_handler))
          .route("/batch", web::post().to(order_number_handlers::batch_handler))
          .route(
            "/check-existing",
            web::post().to(order_number_handlers::check_existing_handler),
          )
          .route("/{order_number}", web::get().to(order_number_handlers::parse_handler)),
      )
      .service(
        web::scope("/admin/retry")
          .route("/strategies", web::get().to(retry_handlers::strategies_handler))
          .route("/statistics", web::get().to(retry_handlers::statistics_handler))
          .route("/cleanup", web::post().to(retry_handlers::cleanup_handler)),
      ),
  );
}
