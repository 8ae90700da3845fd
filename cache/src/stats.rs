//! Cache statistics.

use crate::listener::RemovalCause;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crossbeam_utils::CachePadded;

/// Accumulates statistics for a cache.
///
/// Every method is called on the hot path and must not block. A custom
/// counter can wrap [`ConcurrentStatsCounter`] to forward the events
/// elsewhere while keeping the snapshot.
pub trait StatsCounter: Send + Sync + 'static {
  fn record_hits(&self, count: u64);
  fn record_misses(&self, count: u64);
  fn record_load_success(&self, load_time: Duration);
  fn record_load_failure(&self, load_time: Duration);
  /// Called for every `Size` or `Expired` removal.
  fn record_eviction(&self, weight: u64, cause: RemovalCause);
  fn snapshot(&self) -> StatsSnapshot;
}

/// The default, lock-free counter set.
#[derive(Debug, Default)]
pub struct ConcurrentStatsCounter {
  hits: CachePadded<AtomicU64>,
  misses: CachePadded<AtomicU64>,
  load_successes: CachePadded<AtomicU64>,
  load_failures: CachePadded<AtomicU64>,
  total_load_nanos: CachePadded<AtomicU64>,
  evictions: CachePadded<AtomicU64>,
  eviction_weight: CachePadded<AtomicU64>,
}

// Attempts at a stable capture before settling for the latest read.
const SNAPSHOT_ATTEMPTS: usize = 4;

impl ConcurrentStatsCounter {
  pub fn new() -> Self {
    Self::default()
  }

  fn capture(&self) -> StatsSnapshot {
    StatsSnapshot {
      hit_count: self.hits.load(Ordering::Acquire),
      miss_count: self.misses.load(Ordering::Acquire),
      load_success_count: self.load_successes.load(Ordering::Acquire),
      load_failure_count: self.load_failures.load(Ordering::Acquire),
      total_load_time: Duration::from_nanos(self.total_load_nanos.load(Ordering::Acquire)),
      eviction_count: self.evictions.load(Ordering::Acquire),
      eviction_weight: self.eviction_weight.load(Ordering::Acquire),
    }
  }
}

fn nanos(duration: Duration) -> u64 {
  u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

impl StatsCounter for ConcurrentStatsCounter {
  fn record_hits(&self, count: u64) {
    self.hits.fetch_add(count, Ordering::Relaxed);
  }

  fn record_misses(&self, count: u64) {
    self.misses.fetch_add(count, Ordering::Relaxed);
  }

  fn record_load_success(&self, load_time: Duration) {
    self.load_successes.fetch_add(1, Ordering::Relaxed);
    self.total_load_nanos.fetch_add(nanos(load_time), Ordering::Relaxed);
  }

  fn record_load_failure(&self, load_time: Duration) {
    self.load_failures.fetch_add(1, Ordering::Relaxed);
    self.total_load_nanos.fetch_add(nanos(load_time), Ordering::Relaxed);
  }

  fn record_eviction(&self, weight: u64, _cause: RemovalCause) {
    self.evictions.fetch_add(1, Ordering::Relaxed);
    self.eviction_weight.fetch_add(weight, Ordering::Relaxed);
  }

  /// Reads every counter until two consecutive captures agree, so a quiet
  /// moment yields a snapshot no single update is torn across.
  fn snapshot(&self) -> StatsSnapshot {
    let mut previous = self.capture();
    for _ in 0..SNAPSHOT_ATTEMPTS {
      let current = self.capture();
      if current == previous {
        return current;
      }
      previous = current;
    }
    previous
  }
}

/// Used when statistics are disabled. Records nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledStatsCounter;

impl StatsCounter for DisabledStatsCounter {
  fn record_hits(&self, _count: u64) {}
  fn record_misses(&self, _count: u64) {}
  fn record_load_success(&self, _load_time: Duration) {}
  fn record_load_failure(&self, _load_time: Duration) {}
  fn record_eviction(&self, _weight: u64, _cause: RemovalCause) {}
  fn snapshot(&self) -> StatsSnapshot {
    StatsSnapshot::default()
  }
}

/// An immutable point-in-time view of a cache's statistics.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
  pub hit_count: u64,
  pub miss_count: u64,
  pub load_success_count: u64,
  pub load_failure_count: u64,
  pub total_load_time: Duration,
  pub eviction_count: u64,
  pub eviction_weight: u64,
}

impl StatsSnapshot {
  pub fn request_count(&self) -> u64 {
    self.hit_count.saturating_add(self.miss_count)
  }

  /// `hits / requests`, or 0 when there were no requests.
  pub fn hit_rate(&self) -> f64 {
    match self.request_count() {
      0 => 0.0,
      requests => self.hit_count as f64 / requests as f64,
    }
  }

  /// `misses / requests`, or 0 when there were no requests.
  pub fn miss_rate(&self) -> f64 {
    match self.request_count() {
      0 => 0.0,
      requests => self.miss_count as f64 / requests as f64,
    }
  }

  pub fn load_count(&self) -> u64 {
    self.load_success_count.saturating_add(self.load_failure_count)
  }

  pub fn load_failure_rate(&self) -> f64 {
    match self.load_count() {
      0 => 0.0,
      loads => self.load_failure_count as f64 / loads as f64,
    }
  }

  /// Mean time spent per load, successful or not.
  pub fn average_load_penalty(&self) -> Duration {
    match self.load_count() {
      0 => Duration::ZERO,
      loads => Duration::from_nanos(nanos(self.total_load_time) / loads),
    }
  }

  /// The difference between two snapshots, floored at zero.
  pub fn minus(&self, other: &StatsSnapshot) -> StatsSnapshot {
    StatsSnapshot {
      hit_count: self.hit_count.saturating_sub(other.hit_count),
      miss_count: self.miss_count.saturating_sub(other.miss_count),
      load_success_count: self.load_success_count.saturating_sub(other.load_success_count),
      load_failure_count: self.load_failure_count.saturating_sub(other.load_failure_count),
      total_load_time: self.total_load_time.saturating_sub(other.total_load_time),
      eviction_count: self.eviction_count.saturating_sub(other.eviction_count),
      eviction_weight: self.eviction_weight.saturating_sub(other.eviction_weight),
    }
  }

  pub fn plus(&self, other: &StatsSnapshot) -> StatsSnapshot {
    StatsSnapshot {
      hit_count: self.hit_count.saturating_add(other.hit_count),
      miss_count: self.miss_count.saturating_add(other.miss_count),
      load_success_count: self.load_success_count.saturating_add(other.load_success_count),
      load_failure_count: self.load_failure_count.saturating_add(other.load_failure_count),
      total_load_time: self.total_load_time.saturating_add(other.total_load_time),
      eviction_count: self.eviction_count.saturating_add(other.eviction_count),
      eviction_weight: self.eviction_weight.saturating_add(other.eviction_weight),
    }
  }
}

impl fmt::Debug for StatsSnapshot {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("StatsSnapshot")
      .field("hit_count", &self.hit_count)
      .field("miss_count", &self.miss_count)
      .field("hit_rate", &format!("{:.2}%", self.hit_rate() * 100.0))
      .field("load_success_count", &self.load_success_count)
      .field("load_failure_count", &self.load_failure_count)
      .field("total_load_time", &self.total_load_time)
      .field("eviction_count", &self.eviction_count)
      .field("eviction_weight", &self.eviction_weight)
      .finish()
  }
}
