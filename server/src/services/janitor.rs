// server/src/services/janitor.rs

//! Periodic housekeeping: expired processing leases, old retry journals and
//! transaction records past their retention.

use futures_util::future::join3;
use std::sync::Arc;
use std::time::Duration;
use teapay::store::{LockStore, TransactionStore};
use teapay::{Clock, RetryExecutor};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct Janitor {
  pub locks: Arc<dyn LockStore>,
  pub transactions: Arc<dyn TransactionStore>,
  pub retry: Arc<RetryExecutor>,
  pub clock: Arc<dyn Clock>,
  pub retry_retention_days: i64,
  pub transaction_retention_days: i64,
}

impl Janitor {
  /// Runs the three purges concurrently. Failures are logged and left for the next tick.
  pub async fn sweep(&self) {
    let now = self.clock.now();
    let transaction_cutoff = now - chrono::Duration::days(self.transaction_retention_days.max(0));

    let (locks, retry, transactions) = join3(
      self.locks.purge_expired(now),
      self.retry.cleanup(self.retry_retention_days),
      self.transactions.purge_before(transaction_cutoff),
    )
    .await;

    match locks {
      Ok(0) => {}
      Ok(n) => info!(removed = n, "expired processing locks purged"),
      Err(e) => warn!(error = %e, "failed to purge expired processing locks"),
    }
    if let Err(e) = retry {
      warn!(error = %e, "failed to clean retry journals");
    }
    match transactions {
      Ok(0) => {}
      Ok(n) => info!(removed = n, "old transaction records purged"),
      Err(e) => warn!(error = %e, "failed to purge transaction records"),
    }
  }
}

pub fn spawn_janitor(janitor: Janitor, interval: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
  tokio::spawn(async move {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
      tokio::select! {
        _ = shutdown.cancelled() => {
          debug!("janitor stopped");
          break;
        }
        _ = ticker.tick() => janitor.sweep().await,
      }
    }
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::{TimeZone, Utc};
  use teapay::model::{ProcessingLock, TransactionOutcome, TransactionRecord};
  use teapay::retry::FixedJitter;
  use teapay::{LoggingEffects, ManualClock, MemoryStore, StrategyTable};

  fn record(out_trade_no: &str, created_at: chrono::DateTime<Utc>) -> TransactionRecord {
    TransactionRecord {
      out_trade_no: out_trade_no.to_string(),
      transaction_id: "T1".to_string(),
      order_id: "order-1".to_string(),
      owner_id: None,
      outcome: TransactionOutcome::Paid,
      total_amount: 100,
      cash_amount: 100,
      result_code: "SUCCESS".to_string(),
      err_code: None,
      err_code_des: None,
      time_end: "20240301120000".to_string(),
      bank_type: None,
      trade_type: None,
      attach: None,
      created_at,
    }
  }

  #[tokio::test]
  async fn sweep_removes_expired_locks_and_old_transactions() {
    let start = Utc.with_ymd_and_hms(2024, 3, 1, 4, 0, 0).unwrap();
    let clock = Arc::new(ManualClock::new(start));
    let store = Arc::new(MemoryStore::new());
    let retry = Arc::new(RetryExecutor::new(
      StrategyTable::builtin(),
      store.clone(),
      Arc::new(LoggingEffects),
      Arc::new(FixedJitter(0.0)),
      clock.clone(),
    ));

    let lock = ProcessingLock::new("O1", "T1", start, chrono::Duration::seconds(300));
    assert!(store.try_acquire(&lock, start).await.unwrap());
    assert!(store.insert_if_absent(&record("OLD", start)).await.unwrap());

    clock.advance(chrono::Duration::days(200));
    assert!(store.insert_if_absent(&record("NEW", clock.now())).await.unwrap());

    let janitor = Janitor {
      locks: store.clone(),
      transactions: store.clone(),
      retry,
      clock: clock.clone(),
      retry_retention_days: 30,
      transaction_retention_days: 180,
    };
    janitor.sweep().await;

    let fresh = ProcessingLock::new("O1", "T1", clock.now(), chrono::Duration::seconds(300));
    assert!(store.try_acquire(&fresh, clock.now()).await.unwrap());
    assert!(store.find("OLD", "T1").await.unwrap().is_none());
    assert!(store.find("NEW", "T1").await.unwrap().is_some());
  }
}
