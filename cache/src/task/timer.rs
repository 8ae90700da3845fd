use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::time::duration_to_nanos;

/// A scheduled expiry check for one entry.
///
/// Timers are never cancelled. When one fires, the sweeper compares `entry_id`
/// and `tick` with the live entry and drops the timer if either changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Timer<K> {
  pub(crate) key: K,
  pub(crate) entry_id: u64,
  pub(crate) tick: u64,
}

/// A hashed timing wheel driven by the cache's ticker.
///
/// Slot `tick % len` holds every timer due at `tick`, `tick + len`, ... so a
/// visit only fires the timers whose deadline tick has been reached.
pub(crate) struct TimerWheel<K> {
  wheel: Vec<Mutex<Vec<Timer<K>>>>,
  // Last fully processed tick.
  current_tick: AtomicU64,
  tick_nanos: u64,
  // Held shared by `schedule` and exclusively by `advance`, so a timer is
  // never filed into a slot that an advance has already passed.
  turn: RwLock<()>,
  // Fired timers whose shard was busy; handed out again on the next advance.
  deferred: Mutex<Vec<Timer<K>>>,
}

impl<K> TimerWheel<K> {
  pub(crate) fn new(wheel_size: usize, tick_duration: Duration, now: u64) -> Self {
    let tick_nanos = duration_to_nanos(tick_duration).max(1);
    let mut wheel = Vec::with_capacity(wheel_size);
    for _ in 0..wheel_size.max(1) {
      wheel.push(Mutex::new(Vec::new()));
    }
    Self {
      wheel,
      current_tick: AtomicU64::new(now / tick_nanos),
      tick_nanos,
      turn: RwLock::new(()),
      deferred: Mutex::new(Vec::new()),
    }
  }

  /// Converts a deadline to the first tick at or after it.
  #[inline]
  pub(crate) fn tick_for(&self, deadline: u64) -> u64 {
    deadline / self.tick_nanos + u64::from(deadline % self.tick_nanos != 0)
  }

  /// Schedules a timer for `deadline` and returns the tick it was filed under.
  pub(crate) fn schedule(&self, key: K, entry_id: u64, deadline: u64) -> u64 {
    let _turn = self.turn.read();
    let current = self.current_tick.load(Ordering::Acquire);
    let tick = self.tick_for(deadline).max(current + 1);
    let slot = (tick % self.wheel.len() as u64) as usize;
    self.wheel[slot].lock().push(Timer { key, entry_id, tick });
    tick
  }

  /// Keeps a fired timer for the next `advance` without changing its tick.
  pub(crate) fn defer(&self, timer: Timer<K>) {
    self.deferred.lock().push(timer);
  }

  /// Moves the wheel to `now` and returns every timer that came due,
  /// deferred timers first.
  ///
  /// Must not be called concurrently with itself; the cache serialises calls
  /// through its maintenance lock.
  pub(crate) fn advance(&self, now: u64) -> Vec<Timer<K>> {
    let _turn = self.turn.write();
    let mut expired = std::mem::take(&mut *self.deferred.lock());
    let target = now / self.tick_nanos;
    let previous = self.current_tick.load(Ordering::Acquire);
    if target <= previous {
      return expired;
    }

    let len = self.wheel.len() as u64;
    let steps = (target - previous).min(len);
    for step in 1..=steps {
      let slot = ((previous + step) % len) as usize;
      let mut bucket = self.wheel[slot].lock();
      let mut index = 0;
      while index < bucket.len() {
        if bucket[index].tick <= target {
          expired.push(bucket.swap_remove(index));
        } else {
          index += 1;
        }
      }
    }

    self.current_tick.store(target, Ordering::Release);
    expired
  }

  /// Number of pending timers, including stale ones.
  #[cfg(test)]
  fn len(&self) -> usize {
    let deferred = self.deferred.lock().len();
    deferred + self.wheel.iter().map(|bucket| bucket.lock().len()).sum::<usize>()
  }
}
