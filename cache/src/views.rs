//! Secondary views of a cache: a plain map interface and policy
//! introspection.

use crate::shared::CacheShared;

use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;
use std::time::Duration;

/// A concurrent map view of a cache.
///
/// Reads here never load, never trigger a refresh and record no statistics.
/// They still count as accesses for eviction and expire-after-access. Writes
/// behave exactly like the cache's own writes.
pub struct MapView<K, V, H = ahash::RandomState>
where
  K: Send + 'static,
  V: Send + Sync + 'static,
{
  shared: Arc<CacheShared<K, V, H>>,
}

impl<K, V, H> fmt::Debug for MapView<K, V, H>
where
  K: Send + 'static,
  V: Send + Sync + 'static,
{
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("MapView").finish_non_exhaustive()
  }
}

impl<K, V, H> MapView<K, V, H>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  pub(crate) fn new(shared: Arc<CacheShared<K, V, H>>) -> Self {
    Self { shared }
  }

  pub fn get(&self, key: &K) -> Option<Arc<V>> {
    self.shared.lookup(key, self.shared.now(), false)
  }

  pub fn contains_key(&self, key: &K) -> bool {
    self.shared.contains_key(key)
  }

  /// Inserts a mapping and returns the live value it replaced.
  pub fn insert(&self, key: K, value: V) -> Option<Arc<V>> {
    self.shared.insert(key, Arc::new(value))
  }

  /// Removes a mapping and returns its value if it was live.
  pub fn remove(&self, key: &K) -> Option<Arc<V>> {
    self.shared.remove(key)
  }

  /// Atomically replaces the mapping for `key` with the result of `f`.
  ///
  /// `f` receives the current live value, if any. Returning `None` removes
  /// the mapping. No other write to `key` can interleave with `f`, which
  /// runs while the key's shard is locked and so must not use this cache.
  pub fn compute<F>(&self, key: K, f: F) -> Option<Arc<V>>
  where
    F: FnOnce(&K, Option<&V>) -> Option<V>,
  {
    self.shared.compute(key, f)
  }

  /// The number of live mappings. Walks every shard.
  pub fn len(&self) -> usize {
    self.shared.live_count()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn keys(&self) -> Vec<K> {
    self.shared.entries().into_iter().map(|(key, _)| key).collect()
  }

  /// Every live mapping. Concurrent writes may or may not be reflected.
  pub fn entries(&self) -> Vec<(K, Arc<V>)> {
    self.shared.entries()
  }
}

/// Read access to a cache's configuration, plus the few knobs that can be
/// changed at runtime.
pub struct PolicyView<K, V, H = ahash::RandomState>
where
  K: Send + 'static,
  V: Send + Sync + 'static,
{
  shared: Arc<CacheShared<K, V, H>>,
}

impl<K, V, H> fmt::Debug for PolicyView<K, V, H>
where
  K: Send + 'static,
  V: Send + Sync + 'static,
{
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("PolicyView").finish_non_exhaustive()
  }
}

impl<K, V, H> PolicyView<K, V, H>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  pub(crate) fn new(shared: Arc<CacheShared<K, V, H>>) -> Self {
    Self { shared }
  }

  /// The size or weight bound, or `None` for an unbounded cache.
  pub fn eviction(&self) -> Option<EvictionView<K, V, H>> {
    self.shared.bounded.then(|| EvictionView {
      shared: self.shared.clone(),
    })
  }

  pub fn expire_after_write(&self) -> Option<Duration> {
    self.shared.expiry.after_write()
  }

  pub fn expire_after_access(&self) -> Option<Duration> {
    self.shared.expiry.after_access()
  }

  pub fn is_variable_expiry(&self) -> bool {
    self.shared.expiry.is_variable()
  }

  /// The remaining lifetime of `key`'s live entry. `None` when the key is
  /// absent or its entry never expires.
  pub fn expires_after(&self, key: &K) -> Option<Duration> {
    self.shared.expires_after(key)
  }

  /// How long ago `key`'s live entry was last written.
  pub fn age_of(&self, key: &K) -> Option<Duration> {
    self.shared.age_of(key)
  }

  pub fn refresh_after_write(&self) -> Option<Duration> {
    self.shared.refresh_after_write
  }
}

/// The bound of a `maximum_size` or `maximum_weight` cache.
pub struct EvictionView<K, V, H = ahash::RandomState>
where
  K: Send + 'static,
  V: Send + Sync + 'static,
{
  shared: Arc<CacheShared<K, V, H>>,
}

impl<K, V, H> fmt::Debug for EvictionView<K, V, H>
where
  K: Send + 'static,
  V: Send + Sync + 'static,
{
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("EvictionView").finish_non_exhaustive()
  }
}

impl<K, V, H> EvictionView<K, V, H>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  pub fn maximum(&self) -> u64 {
    self.shared.maximum().unwrap_or(u64::MAX)
  }

  pub fn weighted_size(&self) -> u64 {
    self.shared.weighted_size()
  }

  /// True when the bound is a weight rather than an entry count.
  pub fn is_weighted(&self) -> bool {
    self.shared.weighted
  }

  /// Changes the bound, evicting immediately if the cache is now over it.
  pub fn set_maximum(&self, maximum: u64) {
    self.shared.set_maximum(maximum);
  }
}
