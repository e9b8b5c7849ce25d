// tests/common/mod.rs
#![allow(dead_code)] // Each test binary uses a different subset.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use teapay::callback::signature;
use teapay::effects::{PaymentSuccessNotice, PointsGrant};
use teapay::model::{GenerationMethod, ManualInterventionAlert, NotificationParams, Order, OrderDraft, OrderItem};
use teapay::retry::FixedJitter;
use teapay::store::OrderStore;
use teapay::{
  AlertSink, CallbackConfig, CallbackServices, Classify, Clock, ContextData, EffectError, Environment, ErrorKind,
  ManualClock, MemoryStore, OrderNumberConfig, OrderNumberGenerator, PaymentCallbackHandler, PipelineControl,
  PipelineError, PostPaymentEffects, RetryExecutor, StrategyTable,
};
use tracing::Level;

// --- Tracing ---
use once_cell::sync::Lazy;
static TRACING_INIT: Lazy<()> = Lazy::new(|| {
  tracing_subscriber::fmt()
    .with_max_level(Level::DEBUG)
    .with_test_writer()
    .try_init()
    .ok();
});

pub fn setup_tracing() {
  Lazy::force(&TRACING_INIT);
}

// --- Pipeline engine fixtures ---

#[derive(Clone, Debug, Default)]
pub struct TestContext {
  pub counter: i32,
  pub steps_executed: Vec<String>,
  pub should_stop_at: Option<String>,
  pub finalized: bool,
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum TestError {
  #[error("pipeline error: {0}")]
  Pipeline(String),

  #[error("handler failed: {0}")]
  Handler(String),
}

impl From<PipelineError> for TestError {
  fn from(e: PipelineError) -> Self {
    TestError::Pipeline(e.to_string())
  }
}

pub fn create_simple_handler(
  step_name: &'static str,
) -> impl Fn(ContextData<TestContext>) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<PipelineControl, TestError>> + Send>>
     + Send
     + Sync
     + 'static {
  move |ctx: ContextData<TestContext>| {
    Box::pin(async move {
      let mut guard = ctx.write();
      guard.counter += 1;
      guard.steps_executed.push(step_name.to_string());
      if guard.should_stop_at.as_deref() == Some(step_name) {
        return Ok(PipelineControl::Stop);
      }
      Ok(PipelineControl::Continue)
    })
  }
}

pub fn create_failing_handler(
  step_name: &'static str,
  message: &'static str,
) -> impl Fn(ContextData<TestContext>) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<PipelineControl, TestError>> + Send>>
     + Send
     + Sync
     + 'static {
  move |ctx: ContextData<TestContext>| {
    Box::pin(async move {
      ctx.write().steps_executed.push(step_name.to_string());
      Err(TestError::Handler(message.to_string()))
    })
  }
}

// --- Scripted operation errors for the retry executor ---

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ScriptedError {
  pub code: Option<String>,
  pub kind: ErrorKind,
  pub message: String,
}

impl ScriptedError {
  pub fn new(code: Option<&str>, kind: ErrorKind, message: &str) -> Self {
    Self {
      code: code.map(str::to_string),
      kind,
      message: message.to_string(),
    }
  }
}

impl Classify for ScriptedError {
  fn code(&self) -> Option<&str> {
    self.code.as_deref()
  }

  fn kind(&self) -> ErrorKind {
    self.kind
  }
}

// --- Collaborators ---

#[derive(Default)]
pub struct RecordingEffects {
  pub calls: Mutex<Vec<String>>,
  pub points: Mutex<Vec<PointsGrant>>,
  pub notices: Mutex<Vec<PaymentSuccessNotice>>,
  /// Number of upcoming notification calls that fail with a network error.
  pub failing_notifications: AtomicUsize,
}

impl RecordingEffects {
  pub fn calls(&self) -> Vec<String> {
    self.calls.lock().clone()
  }

  pub fn count(&self, call: &str) -> usize {
    self.calls.lock().iter().filter(|c| c.as_str() == call).count()
  }
}

#[async_trait]
impl PostPaymentEffects for RecordingEffects {
  async fn notify_payment_success(&self, notice: &PaymentSuccessNotice) -> Result<(), EffectError> {
    self.calls.lock().push("notify".into());
    let remaining = self.failing_notifications.load(Ordering::SeqCst);
    if remaining > 0 {
      self.failing_notifications.store(remaining - 1, Ordering::SeqCst);
      return Err(EffectError::Network("notification service unreachable".into()));
    }
    self.notices.lock().push(notice.clone());
    Ok(())
  }

  async fn accrue_points(&self, grant: &PointsGrant) -> Result<(), EffectError> {
    self.calls.lock().push("points".into());
    self.points.lock().push(grant.clone());
    Ok(())
  }

  async fn record_sales(&self, _order_id: &str, _items: &[OrderItem]) -> Result<(), EffectError> {
    self.calls.lock().push("sales".into());
    Ok(())
  }

  async fn dispatch_virtual_delivery(
    &self,
    _order_id: &str,
    _owner_id: &str,
    _items: &[OrderItem],
  ) -> Result<(), EffectError> {
    self.calls.lock().push("virtual".into());
    Ok(())
  }
}

#[derive(Default)]
pub struct RecordingAlerts {
  pub alerts: Mutex<Vec<ManualInterventionAlert>>,
}

#[async_trait]
impl AlertSink for RecordingAlerts {
  async fn raise(&self, alert: &ManualInterventionAlert) -> Result<(), EffectError> {
    self.alerts.lock().push(alert.clone());
    Ok(())
  }
}

// --- Fixtures ---

pub const API_KEY: &str = "192006250b4c09247ec02edce69f6a2d";
pub const OWNER: &str = "oUpF8uMuAJO_M2pxb1Q9zNjWeS6o";

/// 2024-03-01 12:00 at +08:00.
pub fn start_time() -> DateTime<Utc> {
  Utc.with_ymd_and_hms(2024, 3, 1, 4, 0, 0).single().unwrap()
}

/// Built-in strategies with every delay shrunk to a millisecond.
pub fn fast_strategies() -> StrategyTable {
  let mut table = StrategyTable::builtin();
  table.default.base_delay_ms = 1;
  table.default.max_delay_ms = 1;
  for s in table.strategies.values_mut() {
    s.base_delay_ms = 1;
    s.max_delay_ms = 1;
  }
  table
}

pub fn callback_config() -> CallbackConfig {
  CallbackConfig {
    environment: Environment::Production,
    verify_signature: true,
    api_key: Some(API_KEY.to_string()),
    ..CallbackConfig::default()
  }
}

pub fn item(sku: &str, quantity: u32, price: i64) -> OrderItem {
  OrderItem {
    sku_id: sku.to_string(),
    quantity,
    price,
    is_virtual: false,
  }
}

pub fn draft(items: Vec<OrderItem>) -> OrderDraft {
  let total_amount = items.iter().map(|i| i.price * i64::from(i.quantity)).sum();
  OrderDraft { items, total_amount }
}

/// A signed notification for `out_trade_no`/`transaction_id`.
pub fn notification(out_trade_no: &str, transaction_id: &str, result_code: &str, total_fee: i64) -> NotificationParams {
  let mut params: NotificationParams = [
    ("appid", "wx2421b1c4370ec43b"),
    ("mch_id", "10000100"),
    ("nonce_str", "5K8264ILTKCH16CQ2502SI8ZNMTM67VS"),
    ("openid", OWNER),
    ("out_trade_no", out_trade_no),
    ("transaction_id", transaction_id),
    ("result_code", result_code),
    ("time_end", "20240301120500"),
    ("trade_type", "JSAPI"),
    ("bank_type", "CMC"),
    ("sign_type", "HMAC-SHA256"),
  ]
  .into_iter()
  .map(|(k, v)| (k.to_string(), v.to_string()))
  .collect();
  params.insert("total_fee".into(), total_fee.to_string());
  params.insert("cash_fee".into(), total_fee.to_string());
  if result_code != "SUCCESS" {
    params.insert("err_code".into(), "NOTENOUGH".into());
    params.insert("err_code_des".into(), "insufficient balance".into());
  }
  let sig = signature::sign(&params, API_KEY).unwrap();
  params.insert("sign".into(), sig);
  params
}

pub struct Harness {
  pub store: Arc<MemoryStore>,
  pub clock: Arc<ManualClock>,
  pub effects: Arc<RecordingEffects>,
  pub alerts: Arc<RecordingAlerts>,
  pub retry: Arc<RetryExecutor>,
  pub handler: Arc<PaymentCallbackHandler>,
  pub generator: OrderNumberGenerator,
}

impl Harness {
  pub fn new() -> Self {
    Self::with_config(callback_config())
  }

  pub fn with_config(config: CallbackConfig) -> Self {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(start_time()));
    let effects = Arc::new(RecordingEffects::default());
    let alerts = Arc::new(RecordingAlerts::default());
    let retry = Arc::new(RetryExecutor::new(
      fast_strategies(),
      store.clone(),
      alerts.clone(),
      Arc::new(FixedJitter(0.0)),
      clock.clone(),
    ));

    let services = CallbackServices {
      orders: store.clone(),
      transactions: store.clone(),
      locks: store.clone(),
      audit: store.clone(),
      inventory: store.clone(),
      effects: effects.clone(),
      alerts: alerts.clone(),
      retry: retry.clone(),
      clock: clock.clone(),
      config: Arc::new(config),
    };
    let handler = Arc::new(PaymentCallbackHandler::new(services));
    let generator = OrderNumberGenerator::new(
      store.clone(),
      store.clone(),
      store.clone(),
      clock.clone(),
      OrderNumberConfig::default(),
    );

    Self {
      store,
      clock,
      effects,
      alerts,
      retry,
      handler,
      generator,
    }
  }

  /// Mints a number for `items` and stores the pending order.
  pub async fn place_order(&self, items: Vec<OrderItem>) -> Order {
    let d = draft(items);
    let generated = self.generator.generate(OWNER, "mini-program", &d).await.unwrap();
    let order = Order::pending(generated.order_number, OWNER, d, self.clock.now());
    self.store.insert(order.clone()).await.unwrap();
    order
  }

  pub fn generation_methods(&self) -> Vec<GenerationMethod> {
    self.store.generation_log().into_iter().map(|e| e.method).collect()
  }
}

