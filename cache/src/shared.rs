use crate::entry::CacheEntry;
use crate::error::{CapacityViolation, LoadError};
use crate::expiry::ExpiryConfig;
use crate::listener::RemovalCause;
use crate::loader::{CacheLoader, LoadFuture, LoadHandle, Loader};
use crate::policy::{AccessEvent, AdmissionDecision, CachePolicy};
use crate::runtime::{Executor, TaskSpawner};
use crate::stats::StatsCounter;
use crate::store::{ShardMap, ShardedStore};
use crate::sync::yield_now;
use crate::task::janitor::Janitor;
use crate::task::notifier::{Notification, Notifier};
use crate::task::timer::TimerWheel;
use crate::time::{duration_to_nanos, remaining, Ticker, NEVER};

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::hash::{BuildHasher, Hash};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};
use std::fmt;

use fibre::mpsc;
use futures_util::FutureExt;
use parking_lot::Mutex;

/// Computes the weight of a mapping for a `maximum_weight` cache.
pub(crate) type Weigher<K, V> = Arc<dyn Fn(&K, &V) -> u64 + Send + Sync>;

/// Capacity of the buffer that queues reads for the eviction policy.
pub(crate) const READ_BUFFER_CAPACITY: usize = 1024;

/// The result of writing one entry under its shard lock.
struct WriteOutcome<K, V> {
  /// The live value that was replaced, if any.
  previous: Option<Arc<V>>,
  /// Keys the policy asked to evict; removed once the shard lock is released.
  victims: Victims<K>,
}

/// Keys a policy chose to evict, tagged with the first entry id issued after
/// the choice. An entry at or above that id was written after the policy
/// decided and is kept.
pub(crate) struct Victims<K> {
  keys: Vec<K>,
  chosen_before: u64,
}

impl<K> Victims<K> {
  fn none() -> Self {
    Self {
      keys: Vec::new(),
      chosen_before: 0,
    }
  }

  fn is_empty(&self) -> bool {
    self.keys.is_empty()
  }
}

/// What a loading lookup found when it consulted the pending-load table.
enum Slot<V> {
  Hit(Arc<V>),
  Waiter(Arc<LoadFuture<V>>),
  Leader(Arc<LoadFuture<V>>),
}

/// The internal, thread-safe core of the cache.
pub(crate) struct CacheShared<K, V, H>
where
  K: Send + 'static,
  V: Send + Sync + 'static,
{
  pub(crate) store: ShardedStore<K, V, H>,
  pub(crate) policy: Arc<dyn CachePolicy<K>>,
  pub(crate) bounded: bool,
  pub(crate) weighted: bool,
  pub(crate) maximum: AtomicU64,
  pub(crate) weigher: Option<Weigher<K, V>>,
  pub(crate) weighted_size: AtomicU64,
  pub(crate) entry_count: AtomicU64,
  pub(crate) expiry: ExpiryConfig<K, V>,
  pub(crate) refresh_after_write: Option<Duration>,
  pub(crate) timer_wheel: Option<TimerWheel<K>>,
  /// False for the default policy of an unbounded cache, which ignores reads.
  pub(crate) track_reads: bool,
  pub(crate) read_buffer: mpsc::BoundedSender<AccessEvent<K>>,
  /// Serialises policy maintenance. Holding it gives exclusive use of the
  /// read buffer's receiving end.
  pub(crate) maintenance: Mutex<mpsc::BoundedReceiver<AccessEvent<K>>>,
  pub(crate) stats: Arc<dyn StatsCounter>,
  pub(crate) ticker: Arc<dyn Ticker>,
  pub(crate) loader: Option<Loader<K, V>>,
  pub(crate) executor: Arc<dyn Executor>,
  pub(crate) spawner: Option<Arc<dyn TaskSpawner>>,
  pub(crate) notification_sender: Option<mpsc::BoundedSender<Notification<K, V>>>,
  pub(crate) notifier_thread: Option<ThreadId>,
  pub(crate) notifier: Mutex<Option<Notifier>>,
  pub(crate) janitor: Mutex<Option<Janitor>>,
  pub(crate) next_entry_id: AtomicU64,
}

impl<K, V, H> fmt::Debug for CacheShared<K, V, H>
where
  K: Send + 'static,
  V: Send + Sync + 'static,
{
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CacheShared")
      .field("bounded", &self.bounded)
      .field("maximum", &self.maximum.load(Ordering::Relaxed))
      .field("weighted_size", &self.weighted_size.load(Ordering::Relaxed))
      .field("entry_count", &self.entry_count.load(Ordering::Relaxed))
      .field("refresh_after_write", &self.refresh_after_write)
      .field("stats", &self.stats.snapshot())
      .finish_non_exhaustive()
  }
}

impl<K, V, H> Drop for CacheShared<K, V, H>
where
  K: Send + 'static,
  V: Send + Sync + 'static,
{
  fn drop(&mut self) {
    if let Some(janitor) = self.janitor.get_mut().take() {
      janitor.stop();
    }
    // Closing the channel lets the notifier drain what is queued and exit.
    drop(self.notification_sender.take());
    if let Some(notifier) = self.notifier.get_mut().take() {
      notifier.stop();
    }
  }
}

/// A single-flight load owned by its leader.
///
/// Finishing it installs the value and completes the shared future. Dropping
/// it unfinished, because the loader panicked or its task was dropped,
/// completes the future with [`LoadError::Panicked`] so no waiter hangs.
pub(crate) struct PendingLoad<K, V, H>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  shared: Arc<CacheShared<K, V, H>>,
  pub(crate) key: K,
  future: Arc<LoadFuture<V>>,
  finished: bool,
}

impl<K, V, H> PendingLoad<K, V, H>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  pub(crate) fn finish(mut self, result: Result<V, LoadError>, elapsed: Duration) -> Result<Arc<V>, LoadError> {
    self.finished = true;
    self.shared.complete_load(&self.key, &self.future, result, elapsed)
  }
}

impl<K, V, H> Drop for PendingLoad<K, V, H>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  fn drop(&mut self) {
    if !self.finished {
      tracing::warn!("loader panicked or was dropped before completing");
      self.shared.remove_pending(&self.key, &self.future);
      self.future.complete(Err(LoadError::Panicked));
    }
  }
}

impl<K, V, H> CacheShared<K, V, H>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  #[inline]
  pub(crate) fn now(&self) -> u64 {
    self.ticker.read()
  }

  #[inline]
  fn idle(&self) -> Option<u64> {
    self.expiry.idle_nanos()
  }

  #[inline]
  fn is_live(&self, entry: &CacheEntry<V>, now: u64) -> bool {
    !entry.is_expired(now, self.idle())
  }

  fn weigh(&self, key: &K, value: &V) -> u64 {
    match &self.weigher {
      Some(weigher) => weigher(key, value),
      None => 1,
    }
  }

  pub(crate) fn entry_count(&self) -> u64 {
    self.entry_count.load(Ordering::Acquire)
  }

  pub(crate) fn weighted_size(&self) -> u64 {
    self.weighted_size.load(Ordering::Acquire)
  }

  pub(crate) fn maximum(&self) -> Option<u64> {
    self.bounded.then(|| self.maximum.load(Ordering::Acquire))
  }

  // --- Reads ---

  /// Returns the live value for `key` and records the read with the policy
  /// and expiry. Records no statistics.
  pub(crate) fn lookup(self: &Arc<Self>, key: &K, now: u64, allow_refresh: bool) -> Option<Arc<V>> {
    let entry = self.store.shard(key).map.read().get(key).cloned()?;
    if !self.is_live(&entry, now) {
      self.expire_if_current(key, &entry, now);
      return None;
    }
    self.on_hit(key, &entry, now, allow_refresh);
    Some(entry.value())
  }

  fn on_hit(self: &Arc<Self>, key: &K, entry: &Arc<CacheEntry<V>>, now: u64, allow_refresh: bool) {
    if let Some(deadline) = self.expiry.on_read(key, entry, now) {
      self.schedule_timer(key, entry, deadline);
    }
    self.record_read(key, entry.weight());
    if allow_refresh {
      self.maybe_refresh(key, entry, now);
    }
  }

  pub(crate) fn get(self: &Arc<Self>, key: &K) -> Option<Arc<V>> {
    let value = self.lookup(key, self.now(), true);
    match value {
      Some(_) => self.stats.record_hits(1),
      None => self.stats.record_misses(1),
    }
    value
  }

  /// True if a live mapping exists. Does not count as an access.
  pub(crate) fn contains_key(&self, key: &K) -> bool {
    let now = self.now();
    self
      .store
      .shard(key)
      .map
      .read()
      .get(key)
      .is_some_and(|entry| self.is_live(entry, now))
  }

  pub(crate) fn get_all_present(self: &Arc<Self>, keys: &[K]) -> HashMap<K, Arc<V>> {
    #[cfg(feature = "bulk")]
    {
      use rayon::prelude::*;
      keys
        .par_iter()
        .filter_map(|key| self.get(key).map(|value| (key.clone(), value)))
        .collect()
    }
    #[cfg(not(feature = "bulk"))]
    {
      keys
        .iter()
        .filter_map(|key| self.get(key).map(|value| (key.clone(), value)))
        .collect()
    }
  }

  /// Every live mapping, shard by shard. Not a point-in-time snapshot.
  pub(crate) fn entries(&self) -> Vec<(K, Arc<V>)> {
    let now = self.now();
    let mut entries = Vec::new();
    for shard in self.store.iter_shards() {
      let map = shard.map.read();
      entries.extend(
        map
          .iter()
          .filter(|(_, entry)| self.is_live(entry, now))
          .map(|(key, entry)| (key.clone(), entry.value())),
      );
    }
    entries
  }

  pub(crate) fn live_count(&self) -> usize {
    let now = self.now();
    self
      .store
      .iter_shards()
      .map(|shard| shard.map.read().values().filter(|entry| self.is_live(entry, now)).count())
      .sum()
  }

  /// The remaining lifetime of a live entry, `None` when it never expires.
  pub(crate) fn expires_after(&self, key: &K) -> Option<Duration> {
    let now = self.now();
    let map = self.store.shard(key).map.read();
    let entry = map.get(key).filter(|entry| self.is_live(entry, now))?;
    remaining(entry.deadline(self.idle()), now)
  }

  /// Time since the live entry was last written.
  pub(crate) fn age_of(&self, key: &K) -> Option<Duration> {
    let now = self.now();
    let map = self.store.shard(key).map.read();
    let entry = map.get(key).filter(|entry| self.is_live(entry, now))?;
    Some(Duration::from_nanos(now.saturating_sub(entry.written_at())))
  }

  // --- Policy bookkeeping ---

  fn apply_access(&self, event: AccessEvent<K>) -> AdmissionDecision<K> {
    match event {
      AccessEvent::Read(key, weight) => {
        self.policy.on_access(&key, weight);
        AdmissionDecision::Admit
      }
      AccessEvent::Write(key, weight) => self.policy.on_admit(&key, weight),
    }
  }

  fn record_read(&self, key: &K, weight: u64) {
    if !self.track_reads {
      return;
    }
    if self
      .read_buffer
      .try_send(AccessEvent::Read(key.clone(), weight))
      .is_err()
    {
      // Full: drain it and apply this read directly so order is kept. Under
      // contention the read is dropped instead.
      if let Some(rx) = self.maintenance.try_lock() {
        self.drain_reads(&rx);
        self.policy.on_access(key, weight);
      }
    }
  }

  fn drain_reads(&self, rx: &mpsc::BoundedReceiver<AccessEvent<K>>) {
    for _ in 0..READ_BUFFER_CAPACITY {
      match rx.try_recv() {
        Ok(event) => {
          self.apply_access(event);
        }
        Err(_) => break,
      }
    }
  }

  /// Replays buffered reads so the next write sees the policy up to date.
  fn drain_reads_blocking(&self) {
    if self.track_reads {
      let rx = self.maintenance.lock();
      self.drain_reads(&rx);
    }
  }

  fn schedule_timer(&self, key: &K, entry: &CacheEntry<V>, deadline: u64) {
    if deadline == NEVER {
      return;
    }
    if let Some(wheel) = &self.timer_wheel {
      let tick = wheel.schedule(key.clone(), entry.id(), deadline);
      entry.set_timer_tick(tick);
    }
  }

  // --- Writes ---

  /// Accounts for an entry that left the map. Not used for replacements.
  fn on_removed(
    &self,
    key: K,
    entry: &CacheEntry<V>,
    cause: RemovalCause,
    notifications: &mut Vec<Notification<K, V>>,
  ) {
    self.weighted_size.fetch_sub(entry.weight(), Ordering::AcqRel);
    self.entry_count.fetch_sub(1, Ordering::AcqRel);
    if cause.was_evicted() {
      self.stats.record_eviction(entry.weight(), cause);
    }
    if self.notification_sender.is_some() {
      notifications.push((key, entry.value(), cause));
    }
  }

  /// Writes a new entry for `key` into its locked shard map.
  ///
  /// `keep_deadline` carries an existing deadline over instead of computing
  /// one, which is how a refresh leaves expiry untouched.
  fn install(
    &self,
    map: &mut ShardMap<K, V, H>,
    key: K,
    value: Arc<V>,
    now: u64,
    keep_deadline: Option<u64>,
    notifications: &mut Vec<Notification<K, V>>,
  ) -> WriteOutcome<K, V> {
    let previous = map.get(&key).cloned();
    let previous_live = previous.as_ref().is_some_and(|old| self.is_live(old, now));
    let live_previous = previous.as_deref().filter(|_| previous_live);

    let weight = self.weigh(&key, &value);
    let created_at = live_previous.map_or(now, |old| old.created_at());
    let id = self.next_entry_id.fetch_add(1, Ordering::Relaxed);
    let entry = Arc::new(CacheEntry::new(value, weight, id, now, created_at));
    match keep_deadline {
      Some(deadline) => entry.set_expires_at(deadline),
      None => self.expiry.on_write(&key, &entry, live_previous, now),
    }

    map.insert(key.clone(), entry.clone());
    self.weighted_size.fetch_add(weight, Ordering::AcqRel);

    let mut replaced = None;
    match previous {
      Some(old) => {
        self.weighted_size.fetch_sub(old.weight(), Ordering::AcqRel);
        let cause = if previous_live {
          replaced = Some(old.value());
          RemovalCause::Replaced
        } else {
          self.stats.record_eviction(old.weight(), RemovalCause::Expired);
          RemovalCause::Expired
        };
        if self.notification_sender.is_some() {
          notifications.push((key.clone(), old.value(), cause));
        }
      }
      None => {
        self.entry_count.fetch_add(1, Ordering::AcqRel);
      }
    }

    self.schedule_timer(&key, &entry, entry.deadline(self.idle()));

    let victims = match self.apply_access(AccessEvent::Write(key.clone(), weight)) {
      AdmissionDecision::Admit => Victims::none(),
      AdmissionDecision::AdmitAndEvict(keys) => Victims {
        keys,
        chosen_before: self.next_entry_id.load(Ordering::Acquire),
      },
      AdmissionDecision::Reject => {
        if let Some((key, rejected)) = map.remove_entry(&key) {
          self.on_removed(key, &rejected, RemovalCause::Size, notifications);
        }
        Victims::none()
      }
    };

    WriteOutcome {
      previous: replaced,
      victims,
    }
  }

  /// Evicts the policy's victims and enforces the bound, then sends the
  /// notifications the write produced. Called with no shard lock held.
  fn finish_write(&self, victims: Victims<K>, mut notifications: Vec<Notification<K, V>>) {
    if self.bounded || !victims.is_empty() {
      let rx = self.maintenance.lock();
      self.evict_victims(&rx, victims, &mut notifications);
    }
    self.notify(notifications);
  }

  /// Like `finish_write`, but yields while another thread holds the
  /// maintenance lock.
  async fn finish_write_async(&self, victims: Victims<K>, mut notifications: Vec<Notification<K, V>>) {
    if self.bounded || !victims.is_empty() {
      let rx = loop {
        if let Some(rx) = self.maintenance.try_lock() {
          break rx;
        }
        yield_now().await;
      };
      self.evict_victims(&rx, victims, &mut notifications);
    }
    self.notify(notifications);
  }

  fn evict_victims(
    &self,
    rx: &mpsc::BoundedReceiver<AccessEvent<K>>,
    victims: Victims<K>,
    notifications: &mut Vec<Notification<K, V>>,
  ) {
    self.drain_reads(rx);
    for key in victims.keys {
      self.evict_key(&key, victims.chosen_before, notifications);
    }
    self.enforce_bound(notifications);
  }

  pub(crate) fn insert(&self, key: K, value: Arc<V>) -> Option<Arc<V>> {
    self.drain_reads_blocking();
    let mut notifications = Vec::new();
    let outcome = {
      let mut map = self.store.shard(&key).map.write();
      let now = self.now();
      self.install(&mut map, key, value, now, None, &mut notifications)
    };
    self.finish_write(outcome.victims, notifications);
    outcome.previous
  }

  /// Like `insert`, but yields instead of blocking while the shard is
  /// write-locked.
  pub(crate) async fn insert_async(&self, key: K, value: Arc<V>) -> Option<Arc<V>> {
    // Whoever holds the maintenance lock drains the buffer for us.
    if self.track_reads {
      if let Some(rx) = self.maintenance.try_lock() {
        self.drain_reads(&rx);
      }
    }
    let mut notifications = Vec::new();
    let outcome = {
      let mut map = self.store.shard(&key).map.write_async().await;
      let now = self.now();
      self.install(&mut map, key, value, now, None, &mut notifications)
    };
    self.finish_write_async(outcome.victims, notifications).await;
    outcome.previous
  }

  /// Atomically recomputes the mapping for `key`. `None` removes it.
  ///
  /// `f` runs under the shard's write lock and must not call back into the
  /// cache.
  pub(crate) fn compute<F>(&self, key: K, f: F) -> Option<Arc<V>>
  where
    F: FnOnce(&K, Option<&V>) -> Option<V>,
  {
    self.drain_reads_blocking();
    let mut notifications = Vec::new();
    let (result, victims) = {
      let mut map = self.store.shard(&key).map.write();
      let now = self.now();
      let current = map.get(&key).filter(|entry| self.is_live(entry, now)).cloned();
      match f(&key, current.as_deref().map(CacheEntry::value_ref)) {
        Some(value) => {
          let value = Arc::new(value);
          let outcome = self.install(&mut map, key, value.clone(), now, None, &mut notifications);
          (Some(value), outcome.victims)
        }
        None => {
          self.remove_locked(&mut map, &key, now, &mut notifications);
          (None, Victims::none())
        }
      }
    };
    self.finish_write(victims, notifications);
    result
  }

  // --- Removal ---

  fn remove_locked(
    &self,
    map: &mut ShardMap<K, V, H>,
    key: &K,
    now: u64,
    notifications: &mut Vec<Notification<K, V>>,
  ) -> Option<Arc<V>> {
    let (key, entry) = map.remove_entry(key)?;
    self.policy.on_remove(&key);
    let live = self.is_live(&entry, now);
    let cause = if live {
      RemovalCause::Explicit
    } else {
      RemovalCause::Expired
    };
    self.on_removed(key, &entry, cause, notifications);
    live.then(|| entry.value())
  }

  /// Removes `key`, returning its value if the mapping was live.
  pub(crate) fn remove(&self, key: &K) -> Option<Arc<V>> {
    let mut notifications = Vec::new();
    let removed = {
      let mut map = self.store.shard(key).map.write();
      let now = self.now();
      self.remove_locked(&mut map, key, now, &mut notifications)
    };
    self.notify(notifications);
    removed
  }

  pub(crate) async fn remove_async(&self, key: &K) -> Option<Arc<V>> {
    let mut notifications = Vec::new();
    let removed = {
      let mut map = self.store.shard(key).map.write_async().await;
      let now = self.now();
      self.remove_locked(&mut map, key, now, &mut notifications)
    };
    self.notify(notifications);
    removed
  }

  fn clear_locked(&self, map: &mut ShardMap<K, V, H>, now: u64, notifications: &mut Vec<Notification<K, V>>) -> usize {
    let mut removed = 0;
    for (key, entry) in map.drain() {
      self.policy.on_remove(&key);
      let cause = if self.is_live(&entry, now) {
        RemovalCause::Explicit
      } else {
        RemovalCause::Expired
      };
      self.on_removed(key, &entry, cause, notifications);
      removed += 1;
    }
    removed
  }

  pub(crate) fn invalidate_all(&self) {
    let mut notifications = Vec::new();
    let mut removed = 0;
    for shard in self.store.iter_shards() {
      let mut map = shard.map.write();
      let now = self.now();
      removed += self.clear_locked(&mut map, now, &mut notifications);
    }
    tracing::debug!(removed, "invalidated all entries");
    self.notify(notifications);
  }

  pub(crate) async fn invalidate_all_async(&self) {
    let mut notifications = Vec::new();
    let mut removed = 0;
    for shard in self.store.iter_shards() {
      let mut map = shard.map.write_async().await;
      let now = self.now();
      removed += self.clear_locked(&mut map, now, &mut notifications);
    }
    tracing::debug!(removed, "invalidated all entries");
    self.notify(notifications);
  }

  /// Removes `entry` if it is still the live mapping and has expired.
  fn expire_if_current(&self, key: &K, entry: &Arc<CacheEntry<V>>, now: u64) {
    let mut notifications = Vec::new();
    {
      let mut map = self.store.shard(key).map.write();
      let current = matches!(map.get(key), Some(live) if Arc::ptr_eq(live, entry));
      if current && !self.is_live(entry, now) {
        if let Some((key, removed)) = map.remove_entry(key) {
          self.policy.on_remove(&key);
          self.on_removed(key, &removed, RemovalCause::Expired, &mut notifications);
        }
      }
    }
    self.notify(notifications);
  }

  /// Removes a policy victim unless it was rewritten after the policy chose
  /// it. A rewrite re-registers the key with the policy, so keeping it leaves
  /// both sides in agreement.
  fn evict_key(&self, key: &K, chosen_before: u64, notifications: &mut Vec<Notification<K, V>>) {
    let mut map = self.store.shard(key).map.write();
    if !matches!(map.get(key), Some(entry) if entry.id() < chosen_before) {
      return;
    }
    if let Some((key, entry)) = map.remove_entry(key) {
      self.policy.on_remove(&key);
      let cause = if self.is_live(&entry, self.now()) {
        RemovalCause::Size
      } else {
        RemovalCause::Expired
      };
      self.on_removed(key, &entry, cause, notifications);
    }
  }

  /// Evicts until the resident weight fits the maximum. Must hold the
  /// maintenance lock.
  fn enforce_bound(&self, notifications: &mut Vec<Notification<K, V>>) {
    if !self.bounded {
      return;
    }
    let mut evicted = 0usize;
    let mut swept = false;
    loop {
      let maximum = self.maximum.load(Ordering::Acquire);
      let size = self.weighted_size.load(Ordering::Acquire);
      if size <= maximum {
        break;
      }
      if !swept {
        // Expired entries give up their space before live ones are chosen.
        swept = true;
        self.sweep_expired(notifications);
        continue;
      }
      let (victims, _) = self.policy.evict(size - maximum);
      if victims.is_empty() {
        tracing::warn!(size, maximum, "policy chose no victims while over capacity");
        break;
      }
      let chosen_before = self.next_entry_id.load(Ordering::Acquire);
      evicted += victims.len();
      for key in victims {
        self.evict_key(&key, chosen_before, notifications);
      }
      if self.weighted_size.load(Ordering::Acquire) >= size {
        // Victims were no longer resident; retry on the next write.
        break;
      }
    }
    if evicted > 0 {
      tracing::debug!(evicted, "evicted entries over capacity");
    }
  }

  /// Changes the bound and evicts down to it.
  pub(crate) fn set_maximum(&self, maximum: u64) {
    if !self.bounded {
      return;
    }
    self.maximum.store(maximum, Ordering::Release);
    self.policy.resize(maximum);
    let mut notifications = Vec::new();
    {
      let rx = self.maintenance.lock();
      self.drain_reads(&rx);
      self.enforce_bound(&mut notifications);
    }
    self.notify(notifications);
  }

  // --- Maintenance ---

  fn maintain(&self, rx: &mpsc::BoundedReceiver<AccessEvent<K>>, notifications: &mut Vec<Notification<K, V>>) {
    self.drain_reads(rx);
    self.sweep_expired(notifications);
    self.enforce_bound(notifications);
  }

  /// Drains buffered reads, sweeps due timers and enforces the bound.
  pub(crate) fn run_pending_tasks(&self) {
    let mut notifications = Vec::new();
    {
      let rx = self.maintenance.lock();
      self.maintain(&rx, &mut notifications);
    }
    self.notify(notifications);
  }

  /// One janitor pass. Skipped when another thread is already maintaining.
  pub(crate) fn background_sweep(&self) {
    let mut notifications = Vec::new();
    if let Some(rx) = self.maintenance.try_lock() {
      self.maintain(&rx, &mut notifications);
    }
    self.notify(notifications);
  }

  fn sweep_expired(&self, notifications: &mut Vec<Notification<K, V>>) {
    let Some(wheel) = &self.timer_wheel else {
      return;
    };
    let now = self.now();
    let idle = self.idle();
    let fired = wheel.advance(now);
    if fired.is_empty() {
      return;
    }

    let (mut expired, mut deferred) = (0usize, 0usize);
    for timer in fired {
      let Some(mut map) = self.store.shard(&timer.key).map.try_write() else {
        wheel.defer(timer);
        deferred += 1;
        continue;
      };
      let Some(entry) = map.get(&timer.key).cloned() else {
        continue;
      };
      if entry.id() != timer.entry_id || entry.timer_tick() != timer.tick {
        continue;
      }
      if entry.is_expired(now, idle) {
        if let Some((key, removed)) = map.remove_entry(&timer.key) {
          self.policy.on_remove(&key);
          self.on_removed(key, &removed, RemovalCause::Expired, notifications);
          expired += 1;
        }
      } else {
        // The deadline moved later since the timer was set.
        let deadline = entry.deadline(idle);
        if deadline == NEVER {
          entry.set_timer_tick(NEVER);
        } else {
          let tick = wheel.schedule(timer.key, entry.id(), deadline);
          entry.set_timer_tick(tick);
        }
      }
    }
    tracing::trace!(expired, deferred, "swept expiry timers");
  }

  pub(crate) fn check_invariants(&self) -> Result<(), CapacityViolation> {
    if !self.bounded {
      return Ok(());
    }
    let resident: u64 = self
      .store
      .iter_shards()
      .map(|shard| shard.map.read().values().map(|entry| entry.weight()).sum::<u64>())
      .sum();
    let maximum = self.maximum.load(Ordering::Acquire);
    if resident > maximum {
      return Err(CapacityViolation {
        weighted_size: resident,
        maximum,
      });
    }
    Ok(())
  }

  /// Stops the janitor. The cache keeps working without background sweeps.
  pub(crate) fn shutdown(&self) {
    let janitor = self.janitor.lock().take();
    if let Some(janitor) = janitor {
      janitor.stop();
    }
  }

  // --- Notifications ---

  fn notify(&self, notifications: Vec<Notification<K, V>>) {
    let Some(sender) = &self.notification_sender else {
      return;
    };
    // A listener that writes to the cache must not block on its own queue.
    let on_notifier = self.notifier_thread == Some(thread::current().id());
    for notification in notifications {
      let sent = if on_notifier {
        sender.try_send(notification).is_ok()
      } else {
        sender.send(notification).is_ok()
      };
      if !sent {
        tracing::warn!("removal notification dropped");
      }
    }
  }

  // --- Loading ---

  fn remove_pending(&self, key: &K, future: &Arc<LoadFuture<V>>) -> bool {
    let mut pending = self.store.shard(key).pending.lock();
    let current = matches!(pending.get(key), Some(live) if Arc::ptr_eq(live, future));
    if current {
      pending.remove(key);
    }
    current
  }

  /// Joins the in-flight load for `key`, or registers a new one led by the
  /// caller. Re-checks the store under the pending lock so a load that just
  /// finished is seen as a hit.
  fn join_or_lead(self: &Arc<Self>, key: &K) -> Slot<V> {
    let shard = self.store.shard(key);
    let mut pending = shard.pending.lock();
    if let Some(future) = pending.get(key) {
      future.attach();
      return Slot::Waiter(future.clone());
    }
    let now = self.now();
    let existing = shard
      .map
      .read()
      .get(key)
      .filter(|entry| self.is_live(entry, now))
      .cloned();
    if let Some(entry) = existing {
      drop(pending);
      self.on_hit(key, &entry, now, true);
      return Slot::Hit(entry.value());
    }
    let future = Arc::new(LoadFuture::new());
    pending.insert(key.clone(), future.clone());
    Slot::Leader(future)
  }

  /// Installs a finished load if it is still the registered one, then
  /// completes its future. Failures are handed to waiters but never cached.
  fn complete_load(
    &self,
    key: &K,
    future: &Arc<LoadFuture<V>>,
    result: Result<V, LoadError>,
    elapsed: Duration,
  ) -> Result<Arc<V>, LoadError> {
    let result = match result {
      Ok(value) => {
        self.stats.record_load_success(elapsed);
        self.drain_reads_blocking();
        Ok(Arc::new(value))
      }
      Err(err) => {
        self.stats.record_load_failure(elapsed);
        tracing::warn!(error = %err, "load failed");
        Err(err)
      }
    };

    let mut notifications = Vec::new();
    let outcome = {
      let shard = self.store.shard(key);
      let mut pending = shard.pending.lock();
      let current = matches!(pending.get(key), Some(live) if Arc::ptr_eq(live, future));
      if current {
        pending.remove(key);
      }
      match &result {
        Ok(value) if current => {
          let mut map = shard.map.write();
          let now = self.now();
          Some(self.install(&mut map, key.clone(), value.clone(), now, None, &mut notifications))
        }
        Ok(_) => {
          tracing::debug!("discarding the result of a cancelled load");
          None
        }
        Err(_) => None,
      }
    };

    future.complete(result.clone());
    if let Some(outcome) = outcome {
      self.finish_write(outcome.victims, notifications);
    }
    result
  }

  /// The blocking computeIfAbsent: one caller runs `load`, concurrent
  /// callers for the same key park until it finishes.
  pub(crate) fn get_with<F>(self: &Arc<Self>, key: &K, load: F) -> Result<Arc<V>, LoadError>
  where
    F: FnOnce(&K) -> Result<V, LoadError>,
  {
    if let Some(value) = self.lookup(key, self.now(), true) {
      self.stats.record_hits(1);
      return Ok(value);
    }
    let future = match self.join_or_lead(key) {
      Slot::Hit(value) => {
        self.stats.record_hits(1);
        return Ok(value);
      }
      Slot::Waiter(future) => {
        self.stats.record_hits(1);
        let result = future.wait();
        future.detach();
        return result;
      }
      Slot::Leader(future) => future,
    };

    self.stats.record_misses(1);
    let pending = PendingLoad {
      shared: self.clone(),
      key: key.clone(),
      future,
      finished: false,
    };
    let started = Instant::now();
    let result = load(key);
    pending.finish(result, started.elapsed())
  }

  /// Loads through the configured loader, blocking the caller.
  pub(crate) fn get_or_load(self: &Arc<Self>, key: &K) -> Result<Arc<V>, LoadError> {
    match &self.loader {
      Some(Loader::Sync(loader)) => {
        let loader = loader.clone();
        self.get_with(key, |key| loader.load(key))
      }
      Some(Loader::Async(_)) => self.load_handle(key.clone()).wait(),
      None => Err(LoadError::NoLoader),
    }
  }

  /// The non-blocking computeIfAbsent. `start` is called only by the leader
  /// and must eventually finish or drop the `PendingLoad`.
  pub(crate) fn load_handle_with<F>(self: &Arc<Self>, key: K, start: F) -> LoadHandle<V>
  where
    F: FnOnce(PendingLoad<K, V, H>),
  {
    if let Some(value) = self.lookup(&key, self.now(), true) {
      self.stats.record_hits(1);
      return LoadHandle::ready(Ok(value));
    }
    match self.join_or_lead(&key) {
      Slot::Hit(value) => {
        self.stats.record_hits(1);
        LoadHandle::ready(Ok(value))
      }
      Slot::Waiter(future) => {
        self.stats.record_hits(1);
        LoadHandle::pending(future.clone(), self.canceller(key, future))
      }
      Slot::Leader(future) => {
        self.stats.record_misses(1);
        let handle = LoadHandle::pending(future.clone(), self.canceller(key.clone(), future.clone()));
        start(PendingLoad {
          shared: self.clone(),
          key,
          future,
          finished: false,
        });
        handle
      }
    }
  }

  /// Loads through the configured loader without blocking: async loaders run
  /// on the spawner, blocking loaders on the executor.
  pub(crate) fn load_handle(self: &Arc<Self>, key: K) -> LoadHandle<V> {
    let Some(loader) = self.loader.clone() else {
      return LoadHandle::ready(Err(LoadError::NoLoader));
    };
    self.load_handle_with(key, |pending| match loader {
      Loader::Async(load) => {
        let future = load(pending.key.clone());
        self.spawn_load(pending, future);
      }
      Loader::Sync(loader) => self.execute_load(pending, loader),
    })
  }

  pub(crate) fn spawn_load<Fut>(&self, pending: PendingLoad<K, V, H>, future: Fut)
  where
    Fut: Future<Output = Result<V, LoadError>> + Send + 'static,
  {
    let Some(spawner) = &self.spawner else {
      let _ = pending.finish(Err(LoadError::message("no task spawner is configured")), Duration::ZERO);
      return;
    };
    spawner.spawn(Box::pin(async move {
      let started = Instant::now();
      let result = future.await;
      let _ = pending.finish(result, started.elapsed());
    }));
  }

  fn execute_load(&self, pending: PendingLoad<K, V, H>, loader: Arc<dyn CacheLoader<K, V>>) {
    self.executor.execute(Box::new(move || {
      let started = Instant::now();
      let result = loader.load(&pending.key);
      let _ = pending.finish(result, started.elapsed());
    }));
  }

  fn canceller(self: &Arc<Self>, key: K, future: Arc<LoadFuture<V>>) -> Box<dyn FnOnce() -> bool + Send> {
    let weak = Arc::downgrade(self);
    Box::new(move || {
      weak
        .upgrade()
        .is_some_and(|shared| shared.cancel_load(&key, &future))
    })
  }

  fn cancel_load(&self, key: &K, future: &Arc<LoadFuture<V>>) -> bool {
    let mut pending = self.store.shard(key).pending.lock();
    if !matches!(pending.get(key), Some(live) if Arc::ptr_eq(live, future)) {
      return false;
    }
    if !future.try_cancel() {
      return false;
    }
    pending.remove(key);
    tracing::debug!("load cancelled");
    true
  }

  /// Looks up every key, loading the missing ones through the bulk hook or
  /// one single-flight load per key. Successful loads are cached even when
  /// a sibling fails; the first failure is returned after all were tried.
  pub(crate) fn get_all<I>(self: &Arc<Self>, keys: I) -> Result<HashMap<K, Arc<V>>, LoadError>
  where
    I: IntoIterator<Item = K>,
  {
    let now = self.now();
    let mut found = HashMap::new();
    let mut seen = HashSet::new();
    let mut missing = Vec::new();
    for key in keys {
      if !seen.insert(key.clone()) {
        continue;
      }
      match self.lookup(&key, now, true) {
        Some(value) => {
          found.insert(key, value);
        }
        None => missing.push(key),
      }
    }
    self.stats.record_hits(found.len() as u64);
    if missing.is_empty() {
      return Ok(found);
    }

    let bulk = match &self.loader {
      Some(Loader::Sync(loader)) => {
        let started = Instant::now();
        match loader.load_all(&missing) {
          Err(LoadError::BulkUnsupported) => None,
          outcome => Some((outcome, started.elapsed())),
        }
      }
      Some(Loader::Async(_)) => None,
      None => return Err(LoadError::NoLoader),
    };

    let mut first_error = None;
    match bulk {
      Some((Ok(mut loaded), elapsed)) => {
        self.stats.record_misses(missing.len() as u64);
        self.stats.record_load_success(elapsed);
        for key in missing {
          match loaded.remove(&key) {
            Some(value) => {
              let value = Arc::new(value);
              self.insert(key.clone(), value.clone());
              found.insert(key, value);
            }
            None => {
              first_error.get_or_insert(LoadError::Missing);
            }
          }
        }
        // Extra mappings the loader chose to return are cached as well.
        for (key, value) in loaded {
          self.insert(key, Arc::new(value));
        }
      }
      Some((Err(err), elapsed)) => {
        self.stats.record_misses(missing.len() as u64);
        self.stats.record_load_failure(elapsed);
        tracing::warn!(error = %err, keys = missing.len(), "bulk load failed");
        return Err(err);
      }
      None => {
        for key in missing {
          match self.get_or_load(&key) {
            Ok(value) => {
              found.insert(key, value);
            }
            Err(err) => {
              first_error.get_or_insert(err);
            }
          }
        }
      }
    }

    match first_error {
      Some(err) => Err(err),
      None => Ok(found),
    }
  }

  // --- Refresh ---

  fn maybe_refresh(self: &Arc<Self>, key: &K, entry: &Arc<CacheEntry<V>>, now: u64) {
    let Some(threshold) = self.refresh_after_write else {
      return;
    };
    if now.saturating_sub(entry.written_at()) < duration_to_nanos(threshold) {
      return;
    }
    if entry.is_refreshing() || !entry.try_begin_refresh() {
      return;
    }
    self.start_refresh(key.clone(), entry.clone());
  }

  /// Forces a reload of `key`, or a load when it is absent.
  pub(crate) fn refresh(self: &Arc<Self>, key: K) -> Result<(), LoadError> {
    if self.loader.is_none() {
      return Err(LoadError::NoLoader);
    }
    let now = self.now();
    let entry = self
      .store
      .shard(&key)
      .map
      .read()
      .get(&key)
      .filter(|entry| self.is_live(entry, now))
      .cloned();
    match entry {
      Some(entry) => {
        if entry.try_begin_refresh() {
          self.start_refresh(key, entry);
        }
      }
      None => drop(self.load_handle(key)),
    }
    Ok(())
  }

  /// Runs a reload in the background. The caller holds the entry's refresh
  /// marker.
  fn start_refresh(self: &Arc<Self>, key: K, entry: Arc<CacheEntry<V>>) {
    let Some(loader) = self.loader.clone() else {
      entry.end_refresh();
      return;
    };
    let shared = self.clone();
    match loader {
      Loader::Sync(loader) => self.executor.execute(Box::new(move || {
        let started = Instant::now();
        let result = panic::catch_unwind(AssertUnwindSafe(|| loader.reload(&key, entry.value_ref())))
          .unwrap_or(Err(LoadError::Panicked));
        shared.complete_refresh(key, entry, result, started.elapsed());
      })),
      Loader::Async(load) => match &self.spawner {
        Some(spawner) => {
          let reload = load(key.clone());
          spawner.spawn(Box::pin(async move {
            let started = Instant::now();
            let result = AssertUnwindSafe(reload)
              .catch_unwind()
              .await
              .unwrap_or(Err(LoadError::Panicked));
            shared.complete_refresh(key, entry, result, started.elapsed());
          }));
        }
        None => {
          entry.end_refresh();
          tracing::warn!("refresh skipped: no task spawner is configured");
        }
      },
    }
  }

  /// Swaps in a reloaded value if `old` is still the live entry. The new
  /// entry keeps `old`'s deadline.
  fn complete_refresh(&self, key: K, old: Arc<CacheEntry<V>>, result: Result<V, LoadError>, elapsed: Duration) {
    let value = match result {
      Ok(value) => value,
      Err(err) => {
        old.end_refresh();
        self.stats.record_load_failure(elapsed);
        tracing::warn!(error = %err, "refresh failed");
        return;
      }
    };
    self.stats.record_load_success(elapsed);
    self.drain_reads_blocking();

    let mut notifications = Vec::new();
    let outcome = {
      let mut map = self.store.shard(&key).map.write();
      let current = matches!(map.get(&key), Some(live) if Arc::ptr_eq(live, &old));
      if current {
        let now = self.now();
        Some(self.install(&mut map, key, Arc::new(value), now, Some(old.expires_at()), &mut notifications))
      } else {
        None
      }
    };

    match outcome {
      Some(outcome) => {
        tracing::debug!("refreshed entry");
        self.finish_write(outcome.victims, notifications);
      }
      None => {
        old.end_refresh();
        tracing::debug!("discarded a refresh of an entry that changed meanwhile");
      }
    }
  }
}
