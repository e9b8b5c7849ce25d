// tests/callback_tests.rs
mod common;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use common::*;
use serial_test::serial;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use teapay::error::StoreResult;
use teapay::callback::steps::REFUND_REVIEW_OPERATION;
use teapay::model::{
  OrderItem, OrderStatus, PaymentInfo, PaymentStatus, ProcessingLock, Severity, TransactionOutcome, Urgency,
};
use teapay::store::memory::StockLevel;
use teapay::store::{LockStore, OrderStore};
use teapay::{AckCode, AckReason, CallbackConfig, Clock, Environment, PaymentCallbackHandler, StoreError};

const TXN: &str = "4200002024030112345678901234";

fn virtual_item(sku: &str, price: i64) -> OrderItem {
  OrderItem {
    is_virtual: true,
    ..item(sku, 1, price)
  }
}

/// A lock store that is down.
struct DownLocks;

#[async_trait]
impl LockStore for DownLocks {
  async fn try_acquire(&self, _lock: &ProcessingLock, _now: DateTime<Utc>) -> StoreResult<bool> {
    Err(StoreError::Unavailable("lock table offline".into()))
  }

  async fn release(&self, _lock_key: &str, _owner_token: &str) -> StoreResult<bool> {
    Err(StoreError::Unavailable("lock table offline".into()))
  }

  async fn purge_expired(&self, _now: DateTime<Utc>) -> StoreResult<u64> {
    Err(StoreError::Unavailable("lock table offline".into()))
  }
}

#[tokio::test]
#[serial]
async fn test_successful_payment_settles_order_and_runs_effects() {
  setup_tracing();
  let h = Harness::new();
  let order = h.place_order(vec![item("LONGJING-250G", 2, 12_800)]).await;

  let ack = h.handler.handle(notification(&order.order_number, TXN, "SUCCESS", 25_600)).await;

  assert_eq!(ack.code, AckCode::Success);
  assert_eq!(ack.reason, AckReason::Processed);
  assert_eq!(ack.message, "OK");

  let stored = h.store.order(&order.order_number).unwrap();
  assert_eq!(stored.status, OrderStatus::Paid);
  assert_eq!(stored.payment_status, PaymentStatus::Paid);
  assert_eq!(stored.paid_by(), Some(TXN));
  assert_eq!(stored.paid_at, Some(h.clock.now()));

  let records = h.store.transactions();
  assert_eq!(records.len(), 1);
  assert_eq!(records[0].outcome, TransactionOutcome::Paid);
  assert_eq!(records[0].order_id, order.id);

  assert_eq!(h.effects.calls(), vec!["notify", "points", "sales"]);
  let points = h.effects.points.lock().clone();
  assert_eq!(points[0].points, 256);
  assert_eq!(points[0].owner_id, OWNER);
  assert_eq!(h.effects.notices.lock()[0].amount, 25_600);

  assert!(h.store.locks().is_empty());
  let log = h.store.callback_log();
  assert_eq!(log.len(), 1);
  assert_eq!(log[0].process_result, "processed");
  assert_eq!(log[0].order_status.as_deref(), Some("paid"));
}

#[tokio::test]
#[serial]
async fn test_redelivery_is_acknowledged_without_side_effects() {
  setup_tracing();
  let h = Harness::new();
  let order = h.place_order(vec![item("DAHONGPAO-100G", 1, 6_800)]).await;
  let params = notification(&order.order_number, TXN, "SUCCESS", 6_800);

  let first = h.handler.handle(params.clone()).await;
  let second = h.handler.handle(params.clone()).await;
  let third = h.handler.handle(params).await;

  assert_eq!(first.reason, AckReason::Processed);
  for ack in [&second, &third] {
    assert!(ack.is_success());
    assert_eq!(ack.reason, AckReason::AlreadyProcessed);
  }
  assert_eq!(h.effects.count("notify"), 1);
  assert_eq!(h.effects.count("points"), 1);
  assert_eq!(h.store.transactions().len(), 1);
  assert_eq!(h.store.callback_log().len(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn test_concurrent_duplicates_settle_once() {
  setup_tracing();
  let h = Harness::new();
  let order = h.place_order(vec![item("PUER-CAKE", 1, 29_900)]).await;
  let params = notification(&order.order_number, TXN, "SUCCESS", 29_900);

  let tasks: Vec<_> = (0..8)
    .map(|_| {
      let handler = h.handler.clone();
      let params = params.clone();
      tokio::spawn(async move { handler.handle(params).await })
    })
    .collect();

  let mut processed = 0;
  for task in tasks {
    let ack = task.await.unwrap();
    assert!(ack.is_success(), "unexpected ack {:?}", ack);
    if ack.reason == AckReason::Processed {
      processed += 1;
    }
  }

  assert_eq!(processed, 1);
  assert_eq!(h.effects.count("notify"), 1);
  assert_eq!(h.effects.count("points"), 1);
  assert_eq!(h.store.transactions().len(), 1);
  assert!(h.store.locks().is_empty());
}

#[tokio::test]
#[serial]
async fn test_paid_order_without_record_heals_the_record() {
  setup_tracing();
  let h = Harness::new();
  let order = h.place_order(vec![item("TIEGUANYIN", 1, 5_600)]).await;

  // A previous run settled the order and stopped before recording the transaction.
  let info = PaymentInfo {
    transaction_id: TXN.into(),
    total_fee: 5_600,
    cash_fee: 5_600,
    time_end: "20240301120500".into(),
    bank_type: Some("CMC".into()),
  };
  assert!(h.store.mark_paid_if_unpaid(&order.order_number, &info, h.clock.now()).await.unwrap());

  let ack = h.handler.handle(notification(&order.order_number, TXN, "SUCCESS", 5_600)).await;

  assert!(ack.is_success());
  assert_eq!(ack.reason, AckReason::AlreadyPaid);
  assert_eq!(h.store.transactions().len(), 1);
  assert!(h.effects.calls().is_empty());

  let again = h.handler.handle(notification(&order.order_number, TXN, "SUCCESS", 5_600)).await;
  assert_eq!(again.reason, AckReason::AlreadyProcessed);
}

#[tokio::test]
#[serial]
async fn test_second_transaction_for_paid_order_changes_nothing() {
  setup_tracing();
  let h = Harness::new();
  let order = h.place_order(vec![item("JASMINE", 1, 4_200)]).await;

  h.handler.handle(notification(&order.order_number, TXN, "SUCCESS", 4_200)).await;
  let ack = h
    .handler
    .handle(notification(&order.order_number, "4200009999999999", "SUCCESS", 4_200))
    .await;

  assert!(ack.is_success());
  assert_eq!(ack.reason, AckReason::AlreadyPaid);
  assert_eq!(h.store.order(&order.order_number).unwrap().paid_by(), Some(TXN));
  assert_eq!(h.store.transactions().len(), 1);
  assert_eq!(h.effects.count("notify"), 1);
  assert!(h.alerts.alerts.lock().is_empty());
}

#[tokio::test]
#[serial]
async fn test_payment_failure_cancels_order_and_releases_stock() {
  setup_tracing();
  let h = Harness::new();
  h.store.set_stock("WHITE-PEONY", StockLevel { available: 10, reserved: 2 });
  let order = h.place_order(vec![item("WHITE-PEONY", 2, 8_800)]).await;

  let ack = h.handler.handle(notification(&order.order_number, TXN, "FAIL", 17_600)).await;

  assert!(ack.is_success());
  assert_eq!(ack.reason, AckReason::PaymentFailed);
  let stored = h.store.order(&order.order_number).unwrap();
  assert_eq!(stored.status, OrderStatus::Cancelled);
  assert_eq!(stored.payment_status, PaymentStatus::Failed);
  assert_eq!(
    stored.payment_error.and_then(|e| e.err_code),
    Some("NOTENOUGH".to_string())
  );
  assert_eq!(h.store.stock("WHITE-PEONY"), StockLevel { available: 12, reserved: 0 });
  assert_eq!(h.store.transactions()[0].outcome, TransactionOutcome::Failed);
  assert!(h.effects.calls().is_empty());
}

#[tokio::test]
#[serial]
async fn test_success_after_failure_does_not_revive_order() {
  setup_tracing();
  let h = Harness::new();
  let order = h.place_order(vec![item("OOLONG", 1, 7_000)]).await;

  h.handler.handle(notification(&order.order_number, "4200000000000001", "FAIL", 7_000)).await;
  let ack = h
    .handler
    .handle(notification(&order.order_number, "4200000000000002", "SUCCESS", 7_000))
    .await;

  assert!(ack.is_success());
  assert_eq!(ack.reason, AckReason::SettledConcurrently);
  let stored = h.store.order(&order.order_number).unwrap();
  assert_eq!(stored.payment_status, PaymentStatus::Failed);
  assert!(h.effects.calls().is_empty());

  let alerts = h.alerts.alerts.lock().clone();
  assert_eq!(alerts.len(), 1);
  assert_eq!(alerts[0].operation_type, REFUND_REVIEW_OPERATION);
  assert_eq!(alerts[0].urgency, Urgency::High);
  assert_eq!(alerts[0].channels, vec!["email", "wechat", "sms"]);
  assert!(alerts[0].error_message.contains("4200000000000002"));
}

#[tokio::test]
#[serial]
async fn test_failure_after_success_is_ignored() {
  setup_tracing();
  let h = Harness::new();
  h.store.set_stock("KEEMUN", StockLevel { available: 5, reserved: 1 });
  let order = h.place_order(vec![item("KEEMUN", 1, 6_600)]).await;

  h.handler.handle(notification(&order.order_number, TXN, "SUCCESS", 6_600)).await;
  let ack = h
    .handler
    .handle(notification(&order.order_number, "4200000000000003", "FAIL", 6_600))
    .await;

  assert!(ack.is_success());
  assert_eq!(ack.reason, AckReason::AlreadySettled);
  assert_eq!(h.store.order(&order.order_number).unwrap().payment_status, PaymentStatus::Paid);
  assert_eq!(h.store.stock("KEEMUN"), StockLevel { available: 5, reserved: 1 });
  assert_eq!(h.store.transactions().len(), 1);
}

#[tokio::test]
#[serial]
async fn test_held_lock_defers_until_lease_expires() {
  setup_tracing();
  let h = Harness::new();
  let order = h.place_order(vec![item("BILUOCHUN", 1, 9_900)]).await;
  let held = ProcessingLock::new(&order.order_number, TXN, h.clock.now(), Duration::minutes(5));
  assert!(h.store.try_acquire(&held, h.clock.now()).await.unwrap());

  let params = notification(&order.order_number, TXN, "SUCCESS", 9_900);
  let ack = h.handler.handle(params.clone()).await;
  assert!(ack.is_success());
  assert_eq!(ack.reason, AckReason::InProgress);
  assert_eq!(h.store.order(&order.order_number).unwrap().payment_status, PaymentStatus::Unpaid);
  // Someone else's lease is left alone.
  assert_eq!(h.store.locks(), vec![held]);

  h.clock.advance(Duration::minutes(5));
  let ack = h.handler.handle(params).await;
  assert_eq!(ack.reason, AckReason::Processed);
  assert!(h.store.locks().is_empty());
}

#[tokio::test]
#[serial]
async fn test_bad_signature_is_rejected() {
  setup_tracing();
  let h = Harness::new();
  let order = h.place_order(vec![item("LAPSANG", 1, 5_000)]).await;
  let mut params = notification(&order.order_number, TXN, "SUCCESS", 5_000);
  params.insert("total_fee".into(), "1".into());

  let ack = h.handler.handle(params).await;

  assert_eq!(ack.code, AckCode::Fail);
  assert_eq!(ack.reason, AckReason::InvalidSignature);
  assert_eq!(h.store.order(&order.order_number).unwrap().payment_status, PaymentStatus::Unpaid);
  assert!(h.store.callback_errors().is_empty());
  assert!(h.store.transactions().is_empty());
}

#[tokio::test]
#[serial]
async fn test_missing_field_is_rejected() {
  setup_tracing();
  let h = Harness::new();
  let mut params = notification("20240301020001A1B2C3F0", TXN, "SUCCESS", 100);
  params.remove("transaction_id");

  let ack = h.handler.handle(params).await;

  assert_eq!(ack.code, AckCode::Fail);
  assert_eq!(ack.reason, AckReason::InvalidNotification);
  assert!(ack.message.contains("transaction_id"));
  assert!(h.store.callback_log().is_empty());
}

#[tokio::test]
#[serial]
async fn test_unknown_order_fails_and_is_recorded() {
  setup_tracing();
  let h = Harness::new();

  let ack = h.handler.handle(notification("20240301029999A1B2C3F0", TXN, "SUCCESS", 100)).await;

  assert_eq!(ack.code, AckCode::Fail);
  assert_eq!(ack.reason, AckReason::Error);
  let errors = h.store.callback_errors();
  assert_eq!(errors.len(), 1);
  assert!(errors[0].error_id.starts_with("ERR_"));
  assert_eq!(errors[0].severity, Severity::High);
  assert_eq!(errors[0].payload["out_trade_no"], "20240301029999A1B2C3F0");
  assert!(h.store.locks().is_empty());
  assert_eq!(h.store.callback_log()[0].process_result, "error");
}

#[tokio::test]
#[serial]
async fn test_lock_store_outage_asks_for_redelivery() {
  setup_tracing();
  let h = Harness::new();
  let order = h.place_order(vec![item("GENMAICHA", 1, 3_300)]).await;
  let mut services = h.handler.services().clone();
  services.locks = Arc::new(DownLocks);
  let handler = PaymentCallbackHandler::new(services);

  let ack = handler.handle(notification(&order.order_number, TXN, "SUCCESS", 3_300)).await;

  assert_eq!(ack.code, AckCode::Fail);
  assert_eq!(ack.reason, AckReason::Error);
  assert_eq!(h.store.order(&order.order_number).unwrap().payment_status, PaymentStatus::Unpaid);
  assert_eq!(h.store.callback_errors().len(), 1);
}

#[tokio::test]
#[serial]
async fn test_virtual_items_are_dispatched() {
  setup_tracing();
  let h = Harness::new();
  let order = h
    .place_order(vec![item("TEA-CUP", 1, 3_900), virtual_item("TASTING-CLASS", 19_900)])
    .await;

  let ack = h.handler.handle(notification(&order.order_number, TXN, "SUCCESS", 23_800)).await;

  assert_eq!(ack.reason, AckReason::Processed);
  assert_eq!(h.effects.calls(), vec!["notify", "points", "sales", "virtual"]);
}

#[tokio::test]
#[serial]
async fn test_flaky_notification_is_retried() {
  setup_tracing();
  let h = Harness::new();
  h.effects.failing_notifications.store(2, Ordering::SeqCst);
  let order = h.place_order(vec![item("MATCHA-30G", 1, 50)]).await;

  let ack = h.handler.handle(notification(&order.order_number, TXN, "SUCCESS", 50)).await;

  assert_eq!(ack.reason, AckReason::Processed);
  assert_eq!(h.effects.count("notify"), 3);
  assert_eq!(h.effects.notices.lock().len(), 1);
  // Under one point for 50 fen.
  assert_eq!(h.effects.count("points"), 0);
  assert_eq!(h.effects.count("sales"), 1);
}

#[tokio::test]
#[serial]
async fn test_unsigned_notification_accepted_when_verification_disabled() {
  setup_tracing();
  let h = Harness::with_config(CallbackConfig {
    environment: Environment::Development,
    verify_signature: false,
    api_key: None,
    ..CallbackConfig::default()
  });
  let order = h.place_order(vec![item("HOJICHA", 1, 2_800)]).await;
  let mut params = notification(&order.order_number, TXN, "SUCCESS", 2_800);
  params.remove("sign");

  let ack = h.handler.handle(params).await;

  assert_eq!(ack.reason, AckReason::Processed);
}

#[tokio::test]
#[serial]
async fn test_ack_serializes_for_the_gateway() {
  setup_tracing();
  let h = Harness::new();
  let ack = h.handler.handle(notification("X", TXN, "SUCCESS", 1)).await;
  let body = serde_json::to_value(&ack).unwrap();
  assert_eq!(body["code"], "FAIL");
  assert!(body.get("reason").is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn test_racing_success_and_failure_settle_one_way() {
  setup_tracing();
  for round in 0..10 {
    let h = Harness::new();
    let order = h.place_order(vec![item("DAHONGPAO", 1, 9_900)]).await;

    let success = {
      let handler = h.handler.clone();
      let params = notification(&order.order_number, "4200000000000101", "SUCCESS", 9_900);
      tokio::spawn(async move { handler.handle(params).await })
    };
    let failure = {
      let handler = h.handler.clone();
      let params = notification(&order.order_number, "4200000000000102", "FAIL", 9_900);
      tokio::spawn(async move { handler.handle(params).await })
    };
    assert!(success.await.unwrap().is_success());
    assert!(failure.await.unwrap().is_success());

    let stored = h.store.order(&order.order_number).unwrap();
    let records = h.store.transactions();
    let alerts = h.alerts.alerts.lock().len();
    assert_eq!(records.len(), 1, "round {}: {:?}", round, records);
    match stored.payment_status {
      PaymentStatus::Paid => {
        assert_eq!(stored.status, OrderStatus::Paid);
        assert_eq!(records[0].outcome, TransactionOutcome::Paid);
        assert_eq!(alerts, 0, "round {}", round);
      }
      PaymentStatus::Failed => {
        assert_eq!(stored.status, OrderStatus::Cancelled);
        assert_eq!(records[0].outcome, TransactionOutcome::Failed);
        assert!(stored.payment_info.is_none());
        assert_eq!(alerts, 1, "round {}", round);
      }
      other => panic!("round {}: order left in {:?}", round, other),
    }
  }
}
