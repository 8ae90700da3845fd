use crate::error::{BuildError, LoadError};
use crate::expiry::{Expiry, ExpiryConfig};
use crate::handles::{AsyncCache, Cache};
use crate::listener::RemovalListener;
use crate::loader::{CacheLoader, Loader};
use crate::policy::lru::Lru;
use crate::policy::null::NullPolicy;
use crate::policy::tinylfu::TinyLfuPolicy;
use crate::policy::{AccessEvent, CachePolicy, EvictionPolicy};
use crate::runtime::{Executor, TaskSpawner, ThreadExecutor};
use crate::shared::{CacheShared, Weigher, READ_BUFFER_CAPACITY};
use crate::stats::{ConcurrentStatsCounter, DisabledStatsCounter, StatsCounter};
use crate::store::ShardedStore;
use crate::task::janitor::Janitor;
use crate::task::notifier::Notifier;
use crate::task::timer::TimerWheel;
use crate::time::{SystemTicker, Ticker};

use core::fmt;
use std::future::Future;
use std::hash::{BuildHasher, Hash};
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Duration;

use fibre::mpsc;
use futures_util::future::BoxFuture;
use parking_lot::Mutex;

const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(1);
const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(1);

/// Defines preset configurations for the cache's internal timer wheel,
/// which schedules the eager purge of expired entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerWheelMode {
  /// A general-purpose configuration suitable for a wide range of workloads.
  ///
  /// - Granularity: 1 second
  /// - Wheel Size: 60 slots (1-minute cycle)
  Default,

  /// Optimized for caches where items have very short lifetimes (e.g., milliseconds).
  /// Provides high-precision expiration at the cost of slightly more overhead.
  ///
  /// - Granularity: 10 milliseconds
  /// - Wheel Size: 100 slots (1-second cycle)
  HighPrecisionShortLived,

  /// Optimized for caches where items have very long lifetimes (e.g., many minutes or hours).
  /// Reduces periodic work by using a coarse granularity.
  ///
  /// - Granularity: 30 seconds
  /// - Wheel Size: 120 slots (1-hour cycle)
  LowPrecisionLongLived,
}

/// A builder for creating `Cache` and `AsyncCache` instances.
///
/// Every option is checked by `build`/`build_async` before any background
/// thread starts; an invalid combination is reported as a [`BuildError`].
pub struct CacheBuilder<K, V, H = ahash::RandomState> {
  maximum_size: Option<u64>,
  maximum_weight: Option<u64>,
  weigher: Option<Weigher<K, V>>,
  expire_after_write: Option<Duration>,
  expire_after_access: Option<Duration>,
  expiry: Option<Arc<dyn Expiry<K, V>>>,
  refresh_after_write: Option<Duration>,
  record_stats: bool,
  stats_counter: Option<Arc<dyn StatsCounter>>,
  listener: Option<Arc<dyn RemovalListener<K, V>>>,
  ticker: Option<Arc<dyn Ticker>>,
  executor: Option<Arc<dyn Executor>>,
  spawner: Option<Arc<dyn TaskSpawner>>,
  loader: Option<Loader<K, V>>,
  eviction_policy: EvictionPolicy,
  cache_policy: Option<Arc<dyn CachePolicy<K>>>,
  shards: usize,
  hasher: H,
  sweep_interval: Option<Duration>,
  background_sweep: bool,
  timer_wheel_tick_duration: Option<Duration>,
  timer_wheel_size: Option<usize>,
  initial_capacity: usize,
}

// Manual Debug implementation for CacheBuilder.
impl<K, V, H> fmt::Debug for CacheBuilder<K, V, H> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CacheBuilder")
      .field("maximum_size", &self.maximum_size)
      .field("maximum_weight", &self.maximum_weight)
      .field("expire_after_write", &self.expire_after_write)
      .field("expire_after_access", &self.expire_after_access)
      .field("has_variable_expiry", &self.expiry.is_some())
      .field("refresh_after_write", &self.refresh_after_write)
      .field("shards", &self.shards)
      .field("has_listener", &self.listener.is_some())
      .field("has_loader", &self.loader.is_some())
      .finish_non_exhaustive()
  }
}

// --- General Configuration Methods ---
impl<K, V, H> CacheBuilder<K, V, H>
where
  K: Send + Sync + 'static,
  V: Send + Sync + 'static,
{
  /// Bounds the cache to `maximum` entries.
  pub fn maximum_size(mut self, maximum: u64) -> Self {
    self.maximum_size = Some(maximum);
    self
  }

  /// Bounds the total weight of the cache. Requires a [`weigher`].
  ///
  /// [`weigher`]: CacheBuilder::weigher
  pub fn maximum_weight(mut self, maximum: u64) -> Self {
    self.maximum_weight = Some(maximum);
    self
  }

  /// Sets the function that weighs each mapping. A weight is computed once,
  /// when the value is written.
  pub fn weigher<F>(mut self, weigher: F) -> Self
  where
    F: Fn(&K, &V) -> u64 + Send + Sync + 'static,
  {
    self.weigher = Some(Arc::new(weigher));
    self
  }

  /// Expires each entry `duration` after it was created or last replaced.
  pub fn expire_after_write(mut self, duration: Duration) -> Self {
    self.expire_after_write = Some(duration);
    self
  }

  /// Expires each entry `duration` after it was last read or written.
  pub fn expire_after_access(mut self, duration: Duration) -> Self {
    self.expire_after_access = Some(duration);
    self
  }

  /// Computes every entry's lifetime with a custom hook. Cannot be combined
  /// with the fixed expiry options.
  pub fn expire_after<E>(mut self, expiry: E) -> Self
  where
    E: Expiry<K, V>,
  {
    self.expiry = Some(Arc::new(expiry));
    self
  }

  /// Reloads an entry in the background on the first read after it has been
  /// resident for `duration`. The stale value is served meanwhile.
  ///
  /// Requires a loader.
  pub fn refresh_after_write(mut self, duration: Duration) -> Self {
    self.refresh_after_write = Some(duration);
    self
  }

  /// Enables the built-in statistics counters.
  pub fn record_stats(mut self) -> Self {
    self.record_stats = true;
    self
  }

  /// Records statistics into a custom counter. Implies `record_stats`.
  pub fn stats_counter<S>(mut self, counter: S) -> Self
  where
    S: StatsCounter,
  {
    self.record_stats = true;
    self.stats_counter = Some(Arc::new(counter));
    self
  }

  /// Sets the listener notified of every removal.
  pub fn removal_listener<L>(mut self, listener: L) -> Self
  where
    L: RemovalListener<K, V> + 'static,
  {
    self.listener = Some(Arc::new(listener));
    self
  }

  /// Sets the clock used for expiry and refresh. Defaults to the system
  /// clock.
  pub fn ticker<T>(mut self, ticker: T) -> Self
  where
    T: Ticker,
  {
    self.ticker = Some(Arc::new(ticker));
    self
  }

  /// Sets where blocking reloads run. Defaults to a new thread per reload.
  pub fn executor<E>(mut self, executor: E) -> Self
  where
    E: Executor,
  {
    self.executor = Some(Arc::new(executor));
    self
  }

  pub fn spawner(mut self, spawner: Arc<dyn TaskSpawner>) -> Self {
    self.spawner = Some(spawner);
    self
  }

  /// Sets the blocking loader used by `get_or_load`, `get_all` and refresh.
  pub fn loader<L>(mut self, loader: L) -> Self
  where
    L: CacheLoader<K, V>,
  {
    self.loader = Some(Loader::Sync(Arc::new(loader)));
    self
  }

  /// Sets an asynchronous loader. Its futures run on the task spawner.
  pub fn async_loader<F, Fut>(mut self, f: F) -> Self
  where
    F: Fn(K) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<V, LoadError>> + Send + 'static,
  {
    let load = move |key: K| -> BoxFuture<'static, Result<V, LoadError>> { Box::pin(f(key)) };
    self.loader = Some(Loader::Async(Arc::new(load)));
    self
  }

  /// Chooses the built-in eviction policy of a bounded cache.
  ///
  /// By default, a bounded cache uses `Lru`.
  pub fn eviction_policy(mut self, policy: EvictionPolicy) -> Self {
    self.eviction_policy = policy;
    self
  }

  /// Sets a custom eviction policy for the cache, overriding
  /// `eviction_policy`.
  pub fn cache_policy<P>(mut self, policy: P) -> Self
  where
    P: CachePolicy<K> + 'static,
  {
    self.cache_policy = Some(Arc::new(policy));
    self
  }

  /// Sets the number of concurrent shards, rounded up to a power of two.
  pub fn shards(mut self, shards: usize) -> Self {
    self.shards = shards;
    self
  }

  /// Sets how often the background janitor sweeps expired entries.
  pub fn sweep_interval(mut self, interval: Duration) -> Self {
    self.sweep_interval = Some(interval);
    self
  }

  /// Starts no janitor. Expired entries stay resident until a lookup touches
  /// them or `run_pending_tasks` is called.
  pub fn disable_background_sweep(mut self) -> Self {
    self.background_sweep = false;
    self
  }

  /// Sets the timer wheel configuration using a convenient preset.
  ///
  /// This will set both the `tick_duration` and `wheel_size` internally.
  /// Any subsequent calls to `.timer_tick_duration()` or `.timer_wheel_size()`
  /// will override the values set by this preset.
  pub fn timer_mode(mut self, mode: TimerWheelMode) -> Self {
    let (size, duration) = match mode {
      TimerWheelMode::Default => (60, Duration::from_secs(1)),
      TimerWheelMode::HighPrecisionShortLived => (100, Duration::from_millis(10)),
      TimerWheelMode::LowPrecisionLongLived => (120, Duration::from_secs(30)),
    };

    self.timer_wheel_size = Some(size);
    self.timer_wheel_tick_duration = Some(duration);
    self
  }

  /// Sets the granularity of the timer wheel.
  ///
  /// Eager purges happen on tick boundaries. Lookups always check the exact
  /// deadline, so a coarse tick never serves an expired value.
  ///
  /// Defaults to `1 second` if not set.
  pub fn timer_tick_duration(mut self, duration: Duration) -> Self {
    self.timer_wheel_tick_duration = Some(duration);
    self
  }

  /// Sets the number of slots in the timer wheel.
  ///
  /// Defaults to `60` slots if not set.
  pub fn timer_wheel_size(mut self, size: usize) -> Self {
    self.timer_wheel_size = Some(size);
    self
  }

  /// Pre-sizes the shard maps for about `capacity` entries in total.
  pub fn initial_capacity(mut self, capacity: usize) -> Self {
    self.initial_capacity = capacity;
    self
  }
}

// --- Default Constructor ---
impl<K, V, H: BuildHasher + Default> CacheBuilder<K, V, H> {
  /// Creates a new `CacheBuilder` with default settings: unbounded, no
  /// expiry, no statistics.
  pub fn new() -> Self {
    Self {
      maximum_size: None,
      maximum_weight: None,
      weigher: None,
      expire_after_write: None,
      expire_after_access: None,
      expiry: None,
      refresh_after_write: None,
      record_stats: false,
      stats_counter: None,
      listener: None,
      ticker: None,
      executor: None,
      spawner: None,
      loader: None,
      eviction_policy: EvictionPolicy::default(),
      cache_policy: None,
      shards: (num_cpus::get() * 4).max(1).next_power_of_two(),
      hasher: H::default(),
      sweep_interval: None,
      background_sweep: true,
      timer_wheel_tick_duration: None,
      timer_wheel_size: None,
      initial_capacity: 0,
    }
  }
}

impl<K, V> Default for CacheBuilder<K, V, ahash::RandomState> {
  fn default() -> Self {
    Self::new()
  }
}

// --- Build Methods ---
// This impl block contains the full set of trait bounds required to actually
// construct the cache.
impl<K, V, H> CacheBuilder<K, V, H>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  /// Sets the hasher for the cache.
  pub fn hasher(mut self, hasher: H) -> Self {
    self.hasher = hasher;
    self
  }

  /// Builds a synchronous `Cache`.
  pub fn build(mut self) -> Result<Cache<K, V, H>, BuildError> {
    self.validate()?;
    let shared = self.build_shared_core(false)?;
    Ok(Cache { shared })
  }

  /// Builds an asynchronous `AsyncCache`.
  ///
  /// Without an explicit spawner, the current Tokio runtime is used when the
  /// `tokio` feature is enabled.
  pub fn build_async(mut self) -> Result<AsyncCache<K, V, H>, BuildError> {
    self.validate()?;
    let shared = self.build_shared_core(true)?;
    Ok(AsyncCache { shared })
  }

  fn resolve_spawner(&mut self, for_async: bool) -> Result<Option<Arc<dyn TaskSpawner>>, BuildError> {
    if let Some(spawner) = self.spawner.take() {
      return Ok(Some(spawner));
    }
    let required = matches!(self.loader, Some(Loader::Async(_)));
    if !required && !for_async {
      return Ok(None);
    }
    #[cfg(feature = "tokio")]
    {
      match tokio::runtime::Handle::try_current() {
        Ok(handle) => Ok(Some(Arc::new(crate::runtime::TokioSpawner::with_handle(handle)))),
        Err(_) if required => Err(BuildError::SpawnerRequired),
        Err(_) => Ok(None),
      }
    }
    #[cfg(not(feature = "tokio"))]
    {
      if required {
        Err(BuildError::SpawnerRequired)
      } else {
        Ok(None)
      }
    }
  }

  /// Central logic to construct the shared core of the cache.
  pub(crate) fn build_shared_core(&mut self, for_async: bool) -> Result<Arc<CacheShared<K, V, H>>, BuildError> {
    let spawner = self.resolve_spawner(for_async)?;

    let maximum = self.maximum_size.or(self.maximum_weight);
    let bounded = maximum.is_some();
    let custom_policy = self.cache_policy.is_some();
    let policy: Arc<dyn CachePolicy<K>> = match (self.cache_policy.take(), maximum) {
      (Some(policy), _) => policy,
      (None, Some(maximum)) => match self.eviction_policy {
        EvictionPolicy::Lru => Arc::new(Lru::new()),
        EvictionPolicy::TinyLfu => Arc::new(TinyLfuPolicy::new(maximum)),
      },
      // An unbounded cache never evicts, so it tracks nothing.
      (None, None) => Arc::new(NullPolicy),
    };

    let expiry = match self.expiry.take() {
      Some(hook) => ExpiryConfig::Variable(hook),
      None if self.expire_after_write.is_some() || self.expire_after_access.is_some() => ExpiryConfig::Fixed {
        after_write: self.expire_after_write,
        after_access: self.expire_after_access,
      },
      None => ExpiryConfig::None,
    };

    let ticker = self.ticker.take().unwrap_or_else(|| Arc::new(SystemTicker));
    let timer_wheel = expiry.is_enabled().then(|| {
      let tick_duration = self
        .timer_wheel_tick_duration
        .unwrap_or(Duration::from_secs(1));
      let wheel_size = self.timer_wheel_size.unwrap_or(60);
      TimerWheel::new(wheel_size, tick_duration, ticker.read())
    });

    let stats: Arc<dyn StatsCounter> = match self.stats_counter.take() {
      Some(counter) => counter,
      None if self.record_stats => Arc::new(ConcurrentStatsCounter::new()),
      None => Arc::new(DisabledStatsCounter),
    };

    let (notifier, notification_sender) = match self.listener.take() {
      Some(listener) => {
        let (notifier, sender) = Notifier::spawn(listener).map_err(|err| {
          tracing::warn!(error = %err, "failed to start the notifier");
          BuildError::ThreadSpawn("notifier")
        })?;
        (Some(notifier), Some(sender))
      }
      None => (None, None),
    };
    let notifier_thread = notifier.as_ref().map(Notifier::thread_id);

    let (read_buffer, read_receiver): (
      mpsc::BoundedSender<AccessEvent<K>>,
      mpsc::BoundedReceiver<AccessEvent<K>>,
    ) = mpsc::bounded(READ_BUFFER_CAPACITY);

    let shards = self.shards.next_power_of_two();
    let shared = Arc::new(CacheShared {
      store: ShardedStore::new(shards, self.hasher.clone(), self.initial_capacity),
      policy,
      bounded,
      weighted: self.maximum_weight.is_some(),
      maximum: AtomicU64::new(maximum.unwrap_or(u64::MAX)),
      weigher: self.weigher.take(),
      weighted_size: AtomicU64::new(0),
      entry_count: AtomicU64::new(0),
      expiry,
      refresh_after_write: self.refresh_after_write,
      timer_wheel,
      track_reads: bounded || custom_policy,
      read_buffer,
      maintenance: Mutex::new(read_receiver),
      stats,
      ticker,
      loader: self.loader.take(),
      executor: self.executor.take().unwrap_or_else(|| Arc::new(ThreadExecutor)),
      spawner,
      notification_sender,
      notifier_thread,
      notifier: Mutex::new(notifier),
      janitor: Mutex::new(None),
      next_entry_id: AtomicU64::new(1),
    });

    if shared.expiry.is_enabled() && self.background_sweep {
      let interval = self
        .sweep_interval
        .unwrap_or(DEFAULT_SWEEP_INTERVAL)
        .max(MIN_SWEEP_INTERVAL);
      let weak = Arc::downgrade(&shared);
      let janitor = Janitor::spawn(interval, move || match weak.upgrade() {
        Some(shared) => {
          shared.background_sweep();
          true
        }
        None => false,
      })
      .map_err(|err| {
        tracing::warn!(error = %err, "failed to start the janitor");
        BuildError::ThreadSpawn("janitor")
      })?;
      *shared.janitor.lock() = Some(janitor);
    }

    tracing::debug!(
      shards,
      bounded,
      maximum = ?maximum,
      expiry = shared.expiry.is_enabled(),
      refresh = ?shared.refresh_after_write,
      "cache built"
    );
    Ok(shared)
  }

  /// Validates the builder configuration.
  pub(crate) fn validate(&self) -> Result<(), BuildError> {
    if self.maximum_size.is_some() && self.maximum_weight.is_some() {
      return Err(BuildError::SizeAndWeight);
    }
    if self.maximum_size == Some(0) || self.maximum_weight == Some(0) {
      return Err(BuildError::ZeroCapacity);
    }
    if self.weigher.is_some() && self.maximum_weight.is_none() {
      return Err(BuildError::WeigherWithoutMaximumWeight);
    }
    if self.maximum_weight.is_some() && self.weigher.is_none() {
      return Err(BuildError::MaximumWeightWithoutWeigher);
    }
    if self.shards == 0 {
      return Err(BuildError::ZeroShards);
    }
    if self.expiry.is_some() && (self.expire_after_write.is_some() || self.expire_after_access.is_some()) {
      return Err(BuildError::ConflictingExpiry);
    }
    if self.refresh_after_write.is_some() && self.loader.is_none() {
      return Err(BuildError::RefreshWithoutLoader);
    }
    if self.timer_wheel_size == Some(0) || self.timer_wheel_tick_duration == Some(Duration::ZERO) {
      return Err(BuildError::ZeroTimerWheel);
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn builder() -> CacheBuilder<u32, u32> {
    CacheBuilder::new()
  }

  #[test]
  fn rejects_invalid_bounds() {
    assert_eq!(builder().maximum_size(0).build().unwrap_err(), BuildError::ZeroCapacity);
    assert_eq!(
      builder().maximum_size(1).maximum_weight(1).build().unwrap_err(),
      BuildError::SizeAndWeight
    );
    assert_eq!(
      builder().weigher(|_, _| 1).build().unwrap_err(),
      BuildError::WeigherWithoutMaximumWeight
    );
    assert_eq!(
      builder().maximum_weight(10).build().unwrap_err(),
      BuildError::MaximumWeightWithoutWeigher
    );
    assert_eq!(builder().shards(0).build().unwrap_err(), BuildError::ZeroShards);
  }

  #[test]
  fn rejects_conflicting_expiry_and_orphan_refresh() {
    let hook = |_: crate::ExpiryEvent, _: &u32, _: &u32, _: u64, _: Option<Duration>| None;
    assert_eq!(
      builder()
        .expire_after_write(Duration::from_secs(1))
        .expire_after(hook)
        .build()
        .unwrap_err(),
      BuildError::ConflictingExpiry
    );
    assert_eq!(
      builder().refresh_after_write(Duration::from_secs(1)).build().unwrap_err(),
      BuildError::RefreshWithoutLoader
    );
    assert_eq!(builder().timer_wheel_size(0).build().unwrap_err(), BuildError::ZeroTimerWheel);
  }

  #[test]
  fn shard_count_is_rounded_to_a_power_of_two() {
    let cache = builder().shards(3).build().unwrap();
    assert_eq!(cache.shared.store.iter_shards().count(), 4);
  }

  #[test]
  fn janitor_only_runs_with_expiry() {
    let plain = builder().build().unwrap();
    assert!(plain.shared.janitor.lock().is_none());
    let expiring = builder().expire_after_write(Duration::from_secs(5)).build().unwrap();
    assert!(expiring.shared.janitor.lock().is_some());
    let lazy = builder()
      .expire_after_write(Duration::from_secs(5))
      .disable_background_sweep()
      .build()
      .unwrap();
    assert!(lazy.shared.janitor.lock().is_none());
  }
}
