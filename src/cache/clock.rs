//! Wall-clock source for TTL decisions.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;

/// Source of "now" in milliseconds since the Unix epoch.
///
/// No skew correction is applied. If the system clock moves backwards,
/// stored data may expire late (or early when it jumps forward).
pub trait Clock: Send + Sync {
  fn now_millis(&self) -> i64;
}

/// The system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now_millis(&self) -> i64 {
    Utc::now().timestamp_millis()
  }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
  now: AtomicI64,
}

impl ManualClock {
  pub fn new(now_millis: i64) -> Self {
    Self {
      now: AtomicI64::new(now_millis),
    }
  }

  pub fn set(&self, now_millis: i64) {
    self.now.store(now_millis, Ordering::SeqCst);
  }

  pub fn advance(&self, by_millis: i64) {
    self.now.fetch_add(by_millis, Ordering::SeqCst);
  }
}

impl Clock for ManualClock {
  fn now_millis(&self) -> i64 {
    self.now.load(Ordering::SeqCst)
  }
}
