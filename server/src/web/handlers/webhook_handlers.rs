// server/src/web/handlers/webhook_handlers.rs

use actix_web::{web, HttpResponse};
use serde_json::Value;
use teapay::callback::{AckReason, CallbackAck};
use teapay::model::NotificationParams;
use tracing::{instrument, warn};

use crate::state::AppState;

/// Flattens the JSON body into the string map the gateway signed. Nested
/// values and nulls are dropped.
pub fn params_from_json(body: &[u8]) -> Result<NotificationParams, String> {
  let value: Value = serde_json::from_slice(body).map_err(|e| e.to_string())?;
  let Value::Object(fields) = value else {
    return Err("notification body must be a JSON object".to_string());
  };

  Ok(
    fields
      .into_iter()
      .filter_map(|(key, value)| match value {
        Value::String(s) => Some((key, s)),
        Value::Number(n) => Some((key, n.to_string())),
        Value::Bool(b) => Some((key, b.to_string())),
        _ => None,
      })
      .collect(),
  )
}

fn ack_response(ack: &CallbackAck) -> HttpResponse {
  if ack.is_success() {
    HttpResponse::Ok().json(ack)
  } else {
    HttpResponse::InternalServerError().json(ack)
  }
}

#[instrument(name = "handler::wechat_pay_webhook", skip(app_state, body), fields(payload_bytes = body.len()))]
pub async fn wechat_pay_webhook_handler(app_state: web::Data<AppState>, body: web::Bytes) -> HttpResponse {
  let params = match params_from_json(&body) {
    Ok(p) => p,
    Err(e) => {
      warn!(error = %e, "Rejecting malformed payment notification body.");
      return ack_response(&CallbackAck::fail(AckReason::InvalidNotification, e));
    }
  };

  let ack = app_state.callback_handler.handle(params).await;
  ack_response(&ack)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn scalar_fields_become_strings() {
    let params = params_from_json(
      br#"{"out_trade_no":"O1","total_fee":1000,"is_subscribe":true,"attach":null,"extra":{"a":1}}"#,
    )
    .unwrap();
    assert_eq!(params.get("out_trade_no").map(String::as_str), Some("O1"));
    assert_eq!(params.get("total_fee").map(String::as_str), Some("1000"));
    assert_eq!(params.get("is_subscribe").map(String::as_str), Some("true"));
    assert!(!params.contains_key("attach"));
    assert!(!params.contains_key("extra"));
  }

  #[test]
  fn non_object_bodies_are_rejected() {
    assert!(params_from_json(b"[1,2]").is_err());
    assert!(params_from_json(b"not json").is_err());
  }
}
