// core/src/clock.rs

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

/// Source of "now". Injected wherever a timestamp ends up in persisted state
/// (order-number date prefixes, lock expiry, duplicate windows).
pub trait Clock: Send + Sync {
  fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now(&self) -> DateTime<Utc> {
    Utc::now()
  }
}

/// A clock that only moves when told to. Used by tests and replay tooling.
#[derive(Debug)]
pub struct ManualClock {
  now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
  pub fn new(start: DateTime<Utc>) -> Self {
    Self { now: Mutex::new(start) }
  }

  pub fn set(&self, at: DateTime<Utc>) {
    *self.now.lock() = at;
  }

  pub fn advance(&self, by: chrono::Duration) {
    let mut guard = self.now.lock();
    *guard += by;
  }
}

impl Clock for ManualClock {
  fn now(&self) -> DateTime<Utc> {
    *self.now.lock()
  }
}
