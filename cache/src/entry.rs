use crate::time::NEVER;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// A single resident mapping.
///
/// The value, weight and write times never change after construction: a write
/// replaces the whole entry under the shard lock. Only access bookkeeping
/// (last access, variable deadline, timer tracking, refresh marker) is
/// mutated in place through atomics.
#[derive(Debug)]
pub(crate) struct CacheEntry<V> {
  value: Arc<V>,
  weight: u64,
  // Unique per entry; lets fired timers recognise the entry they were set for.
  id: u64,
  created_at: u64,
  written_at: u64,
  last_accessed: AtomicU64,
  // Write-based or variable deadline in ticker nanos; `NEVER` when unset.
  expires_at: AtomicU64,
  // Deadline tick of the live expiry timer, `NEVER` when none is scheduled.
  timer_tick: AtomicU64,
  refreshing: AtomicBool,
}

impl<V> CacheEntry<V> {
  pub(crate) fn new(value: Arc<V>, weight: u64, id: u64, now: u64, created_at: u64) -> Self {
    Self {
      value,
      weight,
      id,
      created_at,
      written_at: now,
      last_accessed: AtomicU64::new(now),
      expires_at: AtomicU64::new(NEVER),
      timer_tick: AtomicU64::new(NEVER),
      refreshing: AtomicBool::new(false),
    }
  }

  #[inline]
  pub(crate) fn value(&self) -> Arc<V> {
    self.value.clone()
  }

  #[inline]
  pub(crate) fn value_ref(&self) -> &V {
    &self.value
  }

  #[inline]
  pub(crate) fn weight(&self) -> u64 {
    self.weight
  }

  #[inline]
  pub(crate) fn id(&self) -> u64 {
    self.id
  }

  #[inline]
  pub(crate) fn created_at(&self) -> u64 {
    self.created_at
  }

  #[inline]
  pub(crate) fn written_at(&self) -> u64 {
    self.written_at
  }

  #[inline]
  pub(crate) fn last_accessed(&self) -> u64 {
    self.last_accessed.load(Ordering::Relaxed)
  }

  #[inline]
  pub(crate) fn touch(&self, now: u64) {
    // Concurrent readers may race; keep the latest reading.
    self.last_accessed.fetch_max(now, Ordering::Relaxed);
  }

  #[inline]
  pub(crate) fn expires_at(&self) -> u64 {
    self.expires_at.load(Ordering::Acquire)
  }

  #[inline]
  pub(crate) fn set_expires_at(&self, deadline: u64) {
    self.expires_at.store(deadline, Ordering::Release);
  }

  /// The effective deadline: the write/variable deadline or the idle
  /// deadline, whichever comes first.
  #[inline]
  pub(crate) fn deadline(&self, after_access: Option<u64>) -> u64 {
    let fixed = self.expires_at();
    match after_access {
      Some(tti) => fixed.min(self.last_accessed().saturating_add(tti).min(NEVER - 1)),
      None => fixed,
    }
  }

  #[inline]
  pub(crate) fn is_expired(&self, now: u64, after_access: Option<u64>) -> bool {
    let deadline = self.deadline(after_access);
    deadline != NEVER && now >= deadline
  }

  #[inline]
  pub(crate) fn timer_tick(&self) -> u64 {
    self.timer_tick.load(Ordering::Acquire)
  }

  #[inline]
  pub(crate) fn set_timer_tick(&self, tick: u64) {
    self.timer_tick.store(tick, Ordering::Release);
  }

  /// Claims the refresh marker. Returns false if a refresh is already running.
  #[inline]
  pub(crate) fn try_begin_refresh(&self) -> bool {
    self
      .refreshing
      .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
      .is_ok()
  }

  #[inline]
  pub(crate) fn end_refresh(&self) {
    self.refreshing.store(false, Ordering::Release);
  }

  #[inline]
  pub(crate) fn is_refreshing(&self) -> bool {
    self.refreshing.load(Ordering::Acquire)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn entry(now: u64) -> CacheEntry<&'static str> {
    CacheEntry::new(Arc::new("v"), 1, 7, now, now)
  }

  #[test]
  fn entry_without_deadline_never_expires() {
    let e = entry(0);
    assert!(!e.is_expired(u64::MAX - 1, None));
  }

  #[test]
  fn write_deadline_is_inclusive() {
    let e = entry(0);
    e.set_expires_at(100);
    assert!(!e.is_expired(99, None));
    assert!(e.is_expired(100, None));
  }

  #[test]
  fn idle_deadline_moves_with_access() {
    let e = entry(0);
    assert!(e.is_expired(50, Some(50)));
    e.touch(40);
    assert!(!e.is_expired(50, Some(50)));
    assert!(e.is_expired(90, Some(50)));
  }

  #[test]
  fn touch_never_moves_backwards() {
    let e = entry(10);
    e.touch(5);
    assert_eq!(e.last_accessed(), 10);
  }

  #[test]
  fn earliest_deadline_wins() {
    let e = entry(0);
    e.set_expires_at(30);
    assert_eq!(e.deadline(Some(100)), 30);
    assert_eq!(e.deadline(Some(10)), 10);
  }

  #[test]
  fn refresh_marker_is_exclusive() {
    let e = entry(0);
    assert!(e.try_begin_refresh());
    assert!(!e.try_begin_refresh());
    assert!(e.is_refreshing());
    e.end_refresh();
    assert!(e.try_begin_refresh());
  }
}
