// core/src/order_number/sequence.rs

use crate::clock::Clock;
use crate::store::SequenceStore;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

pub const RANDOM_SEQUENCE_MIN: u64 = 1000;
pub const RANDOM_SEQUENCE_MAX: u64 = 9999;

/// Hands out per-day sequence numbers from the store's counter using
/// optimistic compare-and-swap. Never fails: contention past the retry budget,
/// or a store error, yields a random value instead.
pub struct SequenceAllocator {
  store: Arc<dyn SequenceStore>,
  clock: Arc<dyn Clock>,
  max_retries: u32,
  backoff_step: Duration,
}

impl SequenceAllocator {
  pub fn new(store: Arc<dyn SequenceStore>, clock: Arc<dyn Clock>, max_retries: u32, backoff_step: Duration) -> Self {
    Self {
      store,
      clock,
      max_retries,
      backoff_step,
    }
  }

  #[instrument(name = "SequenceAllocator::next", skip(self))]
  pub async fn next(&self, date_prefix: &str) -> u64 {
    for attempt in 0..=self.max_retries {
      if attempt > 0 {
        tokio::time::sleep(self.backoff_step * attempt).await;
      }

      let now = self.clock.now();
      let claimed = match self.store.current(date_prefix).await {
        Ok(None) => self.store.create(date_prefix, 1, now).await.map(|created| created.then_some(1)),
        Ok(Some(current)) => {
          let next = current + 1;
          self
            .store
            .compare_and_swap(date_prefix, current, next, now)
            .await
            .map(|swapped| swapped.then_some(next))
        }
        Err(e) => Err(e),
      };

      match claimed {
        Ok(Some(value)) => {
          debug!(attempt, value, "sequence claimed");
          return value;
        }
        Ok(None) => debug!(attempt, "lost sequence race, retrying"),
        Err(e) => {
          warn!(error = %e, "sequence store failed, using random sequence");
          return random_sequence();
        }
      }
    }

    warn!(retries = self.max_retries, "sequence contention exhausted retries, using random sequence");
    random_sequence()
  }
}

fn random_sequence() -> u64 {
  rand::thread_rng().gen_range(RANDOM_SEQUENCE_MIN..=RANDOM_SEQUENCE_MAX)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::clock::SystemClock;
  use crate::error::{StoreError, StoreResult};
  use crate::store::MemoryStore;
  use async_trait::async_trait;
  use chrono::{DateTime, Utc};

  struct DownSequences;

  #[async_trait]
  impl SequenceStore for DownSequences {
    async fn current(&self, _date_prefix: &str) -> StoreResult<Option<u64>> {
      Err(StoreError::Unavailable("sequence table offline".into()))
    }

    async fn create(&self, _date_prefix: &str, _initial: u64, _at: DateTime<Utc>) -> StoreResult<bool> {
      Err(StoreError::Unavailable("sequence table offline".into()))
    }

    async fn compare_and_swap(
      &self,
      _date_prefix: &str,
      _expected: u64,
      _next: u64,
      _at: DateTime<Utc>,
    ) -> StoreResult<bool> {
      Err(StoreError::Unavailable("sequence table offline".into()))
    }
  }

  #[tokio::test]
  async fn counter_advances_per_day() {
    let allocator = SequenceAllocator::new(Arc::new(MemoryStore::new()), Arc::new(SystemClock), 3, Duration::ZERO);
    assert_eq!(allocator.next("20240301").await, 1);
    assert_eq!(allocator.next("20240301").await, 2);
    assert_eq!(allocator.next("20240302").await, 1);
  }

  #[tokio::test]
  async fn store_outage_yields_random_four_digit_value() {
    let allocator = SequenceAllocator::new(Arc::new(DownSequences), Arc::new(SystemClock), 3, Duration::ZERO);
    let value = allocator.next("20240301").await;
    assert!((RANDOM_SEQUENCE_MIN..=RANDOM_SEQUENCE_MAX).contains(&value));
  }
}
