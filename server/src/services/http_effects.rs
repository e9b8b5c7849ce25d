// server/src/services/http_effects.rs

//! Post-payment collaborators and admin alerts reached over HTTP. Each call is
//! a single JSON POST to `{base_url}/{action}`; retries belong to the caller.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde_json::json;
use std::time::Duration;
use teapay::effects::{PaymentSuccessNotice, PointsGrant};
use teapay::model::{ManualInterventionAlert, OrderItem};
use teapay::{AlertSink, EffectError, PostPaymentEffects};
use tracing::{debug, error, instrument, warn};

const NOTIFY_ACTION: &str = "send-payment-notification";
const POINTS_ACTION: &str = "update-user-points";
const SALES_ACTION: &str = "update-product-sales";
const VIRTUAL_DELIVERY_ACTION: &str = "process-virtual-delivery";
const ADMIN_NOTIFICATION_ACTION: &str = "send-admin-notification";

pub struct HttpEffects {
  client: Client,
  base_url: String,
}

impl HttpEffects {
  pub fn new(base_url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
    let client = Client::builder().timeout(timeout).build()?;
    Ok(Self {
      client,
      base_url: base_url.into(),
    })
  }

  fn transport_error(action: &str, err: reqwest::Error) -> EffectError {
    if err.is_timeout() || err.is_connect() {
      EffectError::Network(format!("{}: {}", action, err))
    } else {
      EffectError::Rejected(format!("{}: {}", action, err))
    }
  }

  fn status_error(action: &str, status: StatusCode, body: &str) -> EffectError {
    let message = format!("{} returned HTTP {}: {}", action, status, body.chars().take(200).collect::<String>());
    if status == StatusCode::TOO_MANY_REQUESTS {
      EffectError::RateLimited(message)
    } else if status.is_server_error() {
      EffectError::Unavailable(message)
    } else {
      EffectError::Rejected(message)
    }
  }

  async fn post<T: Serialize + ?Sized>(&self, action: &str, body: &T) -> Result<(), EffectError> {
    let url = format!("{}/{}", self.base_url, action);
    let response = self
      .client
      .post(&url)
      .json(body)
      .send()
      .await
      .map_err(|e| Self::transport_error(action, e))?;

    let status = response.status();
    if status.is_success() {
      debug!(action, %status, "collaborator call succeeded");
      return Ok(());
    }

    let body = response.text().await.unwrap_or_default();
    warn!(action, %status, body = %body, "collaborator call failed");
    Err(Self::status_error(action, status, &body))
  }
}

#[async_trait]
impl PostPaymentEffects for HttpEffects {
  #[instrument(skip(self, notice), fields(order_number = %notice.order_number))]
  async fn notify_payment_success(&self, notice: &PaymentSuccessNotice) -> Result<(), EffectError> {
    self.post(NOTIFY_ACTION, notice).await
  }

  #[instrument(skip(self, grant), fields(owner_id = %grant.owner_id, points = grant.points))]
  async fn accrue_points(&self, grant: &PointsGrant) -> Result<(), EffectError> {
    self.post(POINTS_ACTION, grant).await
  }

  #[instrument(skip(self, items))]
  async fn record_sales(&self, order_id: &str, items: &[OrderItem]) -> Result<(), EffectError> {
    self
      .post(SALES_ACTION, &json!({ "order_id": order_id, "items": items }))
      .await
  }

  #[instrument(skip(self, items))]
  async fn dispatch_virtual_delivery(
    &self,
    order_id: &str,
    owner_id: &str,
    items: &[OrderItem],
  ) -> Result<(), EffectError> {
    let virtual_items: Vec<&OrderItem> = items.iter().filter(|i| i.is_virtual).collect();
    self
      .post(
        VIRTUAL_DELIVERY_ACTION,
        &json!({ "order_id": order_id, "owner_id": owner_id, "items": virtual_items }),
      )
      .await
  }
}

#[async_trait]
impl AlertSink for HttpEffects {
  async fn raise(&self, alert: &ManualInterventionAlert) -> Result<(), EffectError> {
    error!(
      execution_id = %alert.execution_id,
      operation_type = %alert.operation_type,
      urgency = alert.urgency.as_str(),
      "manual intervention required: {}",
      alert.error_message
    );
    self.post(ADMIN_NOTIFICATION_ACTION, alert).await
  }
}
