// core/examples/callback_replay.rs

//! Replays one payment notification the way the gateway does when it does not
//! hear back in time: several copies at once, then a late straggler.

use std::sync::Arc;
use teapay::callback::signature;
use teapay::model::{NotificationParams, Order, OrderDraft, OrderItem};
use teapay::retry::RandomJitter;
use teapay::store::OrderStore;
use teapay::{
  CallbackConfig, CallbackServices, Clock, Environment, LoggingEffects, MemoryStore, OrderNumberConfig,
  OrderNumberGenerator, PaymentCallbackHandler, RetryExecutor, StrategyTable, SystemClock,
};
use tracing::info;

const API_KEY: &str = "example-merchant-key";

fn signed_notification(out_trade_no: &str, total_fee: i64) -> anyhow::Result<NotificationParams> {
  let mut params: NotificationParams = [
    ("appid", "wx2421b1c4370ec43b"),
    ("mch_id", "10000100"),
    ("nonce_str", "5K8264ILTKCH16CQ2502SI8ZNMTM67VS"),
    ("out_trade_no", out_trade_no),
    ("transaction_id", "4200002024030100000000000001"),
    ("result_code", "SUCCESS"),
    ("time_end", "20240301120500"),
    ("sign_type", "HMAC-SHA256"),
  ]
  .into_iter()
  .map(|(k, v)| (k.to_string(), v.to_string()))
  .collect();
  params.insert("total_fee".into(), total_fee.to_string());
  let sign = signature::sign(&params, API_KEY).map_err(|e| anyhow::anyhow!("{}", e))?;
  params.insert("sign".into(), sign);
  Ok(params)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt().with_max_level(tracing::Level::INFO).init();

  let store = Arc::new(MemoryStore::new());
  let clock = Arc::new(SystemClock);
  let retry = Arc::new(RetryExecutor::new(
    StrategyTable::builtin(),
    store.clone(),
    Arc::new(LoggingEffects),
    Arc::new(RandomJitter),
    clock.clone(),
  ));
  let config = CallbackConfig {
    environment: Environment::Development,
    api_key: Some(API_KEY.to_string()),
    ..CallbackConfig::default()
  };
  config.validate()?;

  let handler = Arc::new(PaymentCallbackHandler::new(CallbackServices {
    orders: store.clone(),
    transactions: store.clone(),
    locks: store.clone(),
    audit: store.clone(),
    inventory: store.clone(),
    effects: Arc::new(LoggingEffects),
    alerts: Arc::new(LoggingEffects),
    retry,
    clock: clock.clone(),
    config: Arc::new(config),
  }));

  let generator = OrderNumberGenerator::new(
    store.clone(),
    store.clone(),
    store.clone(),
    clock.clone(),
    OrderNumberConfig::default(),
  );
  let draft = OrderDraft {
    items: vec![OrderItem {
      sku_id: "LONGJING-250G".into(),
      quantity: 2,
      price: 12_800,
      is_virtual: false,
    }],
    total_amount: 25_600,
  };
  let number = generator.generate("demo-owner", "mini-program", &draft).await?;
  store
    .insert(Order::pending(number.order_number.clone(), "demo-owner", draft, clock.now()))
    .await?;
  info!(order_number = %number.order_number, "order placed");

  let params = signed_notification(&number.order_number, 25_600)?;
  let burst: Vec<_> = (0..5)
    .map(|_| {
      let handler = handler.clone();
      let params = params.clone();
      tokio::spawn(async move { handler.handle(params).await })
    })
    .collect();
  for (i, task) in burst.into_iter().enumerate() {
    let ack = task.await?;
    info!(delivery = i, code = ?ack.code, reason = ack.reason.as_str(), "burst delivery acknowledged");
  }

  let late = handler.handle(params).await;
  info!(code = ?late.code, reason = late.reason.as_str(), "late redelivery acknowledged");

  let order = store.order(&number.order_number);
  info!(
    payment_status = ?order.map(|o| o.payment_status),
    transactions = store.transactions().len(),
    "final state"
  );
  Ok(())
}
