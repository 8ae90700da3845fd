//! Clock sources used for expiry and refresh decisions.

use once_cell::sync::Lazy;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

// The single, static reference point for the system ticker.
static CACHE_EPOCH: Lazy<Instant> = Lazy::new(Instant::now);

/// Deadline value meaning "never".
pub(crate) const NEVER: u64 = u64::MAX;

/// A monotonic nanosecond clock.
///
/// Every expiry and refresh decision reads the cache's ticker, so injecting a
/// [`FakeTicker`] makes time-based behaviour deterministic.
pub trait Ticker: Send + Sync + 'static {
  /// Returns the current reading in nanoseconds. Must never go backwards.
  fn read(&self) -> u64;
}

/// The default ticker, backed by `Instant`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTicker;

impl Ticker for SystemTicker {
  #[inline]
  fn read(&self) -> u64 {
    let elapsed = Instant::now().saturating_duration_since(*CACHE_EPOCH);
    u64::try_from(elapsed.as_nanos()).unwrap_or(NEVER - 1)
  }
}

/// A manually advanced ticker for tests.
///
/// Clones share the same reading, so a test can keep one handle and give
/// another to the cache builder.
#[derive(Clone, Default)]
pub struct FakeTicker {
  nanos: Arc<AtomicU64>,
}

impl FakeTicker {
  pub fn new() -> Self {
    Self::default()
  }

  /// Moves the clock forward.
  pub fn advance(&self, duration: Duration) {
    self.nanos.fetch_add(duration_to_nanos(duration), Ordering::SeqCst);
  }

  /// Sets the absolute reading. Callers must not move time backwards.
  pub fn set(&self, nanos: u64) {
    self.nanos.store(nanos, Ordering::SeqCst);
  }
}

impl Ticker for FakeTicker {
  #[inline]
  fn read(&self) -> u64 {
    self.nanos.load(Ordering::SeqCst)
  }
}

impl fmt::Debug for FakeTicker {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("FakeTicker").field("nanos", &self.read()).finish()
  }
}

#[inline]
pub(crate) fn duration_to_nanos(duration: Duration) -> u64 {
  u64::try_from(duration.as_nanos()).unwrap_or(NEVER - 1)
}

/// `now + duration`, saturating just below `NEVER`.
#[inline]
pub(crate) fn deadline_after(now: u64, duration: Duration) -> u64 {
  now.saturating_add(duration_to_nanos(duration)).min(NEVER - 1)
}

/// Time left until `deadline`, clamped at zero. `None` when there is no deadline.
#[inline]
pub(crate) fn remaining(deadline: u64, now: u64) -> Option<Duration> {
  if deadline == NEVER {
    None
  } else {
    Some(Duration::from_nanos(deadline.saturating_sub(now)))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn fake_ticker_clones_share_time() {
    let ticker = FakeTicker::new();
    let clone = ticker.clone();
    ticker.advance(Duration::from_secs(2));
    assert_eq!(clone.read(), 2_000_000_000);
  }

  #[test]
  fn remaining_clamps_past_deadlines() {
    assert_eq!(remaining(10, 25), Some(Duration::ZERO));
    assert_eq!(remaining(NEVER, 25), None);
    assert_eq!(remaining(30, 25), Some(Duration::from_nanos(5)));
  }

  #[test]
  fn deadline_never_reaches_sentinel() {
    assert_eq!(deadline_after(NEVER - 5, Duration::from_secs(1)), NEVER - 1);
  }

  #[test]
  fn system_ticker_is_monotonic() {
    let ticker = SystemTicker;
    let a = ticker.read();
    let b = ticker.read();
    assert!(b >= a);
  }
}
