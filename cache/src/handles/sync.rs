use crate::error::{CapacityViolation, LoadError};
use crate::shared::CacheShared;
use crate::stats::StatsSnapshot;
use crate::views::{MapView, PolicyView};
use crate::AsyncCache;

use std::collections::HashMap;
use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;

/// A thread-safe, synchronous cache.
///
/// Cloning a `Cache` is cheap and yields another handle to the same entries.
/// Background threads stop once the last handle is dropped.
pub struct Cache<K, V, H = ahash::RandomState>
where
  K: Send + 'static,
  V: Send + Sync + 'static,
{
  pub(crate) shared: Arc<CacheShared<K, V, H>>,
}

impl<K, V, H> Clone for Cache<K, V, H>
where
  K: Send + 'static,
  V: Send + Sync + 'static,
{
  fn clone(&self) -> Self {
    Self {
      shared: self.shared.clone(),
    }
  }
}

impl<K, V, H> fmt::Debug for Cache<K, V, H>
where
  K: Send + 'static,
  V: Send + Sync + 'static,
{
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Cache").field("shared", &self.shared).finish()
  }
}

impl<K, V, H> Cache<K, V, H>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  /// Converts this synchronous `Cache` into an asynchronous `AsyncCache`.
  /// This is a zero-cost conversion.
  pub fn to_async(&self) -> AsyncCache<K, V, H> {
    AsyncCache {
      shared: self.shared.clone(),
    }
  }

  /// Retrieves a value from the cache.
  ///
  /// Returns `None` if the key is absent or its entry has expired. An expired
  /// entry found here is removed with [`RemovalCause::Expired`].
  ///
  /// [`RemovalCause::Expired`]: crate::RemovalCause::Expired
  pub fn get(&self, key: &K) -> Option<Arc<V>> {
    self.shared.get(key)
  }

  /// Returns the value for `key`, computing it with `load` if it is absent.
  ///
  /// Concurrent callers for the same missing key share a single call to
  /// `load`; the others block until it finishes and receive the same value
  /// or error. An error is returned to every waiter and nothing is cached.
  pub fn get_with<F>(&self, key: &K, load: F) -> Result<Arc<V>, LoadError>
  where
    F: FnOnce(&K) -> Result<V, LoadError>,
  {
    self.shared.get_with(key, load)
  }

  /// Returns the value for `key`, loading it through the configured loader.
  ///
  /// Fails with [`LoadError::NoLoader`] when the cache was built without one.
  pub fn get_or_load(&self, key: &K) -> Result<Arc<V>, LoadError> {
    self.shared.get_or_load(key)
  }

  /// Returns the values for `keys`, loading the missing ones.
  ///
  /// Missing keys go to the loader's bulk hook when it has one, otherwise
  /// each is loaded on its own. Every successful load is cached even if
  /// another key fails, in which case the first failure is returned.
  pub fn get_all<I>(&self, keys: I) -> Result<HashMap<K, Arc<V>>, LoadError>
  where
    I: IntoIterator<Item = K>,
  {
    self.shared.get_all(keys)
  }

  /// Returns the live values among `keys` without loading anything.
  ///
  /// With the `bulk` feature the lookups run in parallel.
  pub fn get_all_present(&self, keys: &[K]) -> HashMap<K, Arc<V>> {
    self.shared.get_all_present(keys)
  }

  /// Inserts a key-value pair, replacing any existing value.
  ///
  /// If the cache is bounded, entries may be evicted before this returns.
  pub fn insert(&self, key: K, value: V) {
    self.shared.insert(key, Arc::new(value));
  }

  /// Removes an entry from the cache, returning `true` if a live entry was
  /// removed.
  pub fn invalidate(&self, key: &K) -> bool {
    self.shared.remove(key).is_some()
  }

  /// Removes every key in `keys`.
  pub fn invalidate_many<'a, I>(&self, keys: I)
  where
    I: IntoIterator<Item = &'a K>,
    K: 'a,
  {
    for key in keys {
      self.shared.remove(key);
    }
  }

  /// Removes all entries. Each one is reported to the removal listener as
  /// an explicit removal.
  pub fn invalidate_all(&self) {
    self.shared.invalidate_all();
  }

  /// Reloads `key` in the background, or loads it if absent.
  ///
  /// The current value stays visible until the reload replaces it.
  pub fn refresh(&self, key: K) -> Result<(), LoadError> {
    self.shared.refresh(key)
  }

  /// True if a live entry exists. Does not count as an access.
  pub fn contains_key(&self, key: &K) -> bool {
    self.shared.contains_key(key)
  }

  /// The approximate number of entries, which may include expired entries
  /// that have not been swept yet.
  pub fn entry_count(&self) -> u64 {
    self.shared.entry_count()
  }

  /// The total weight of resident entries. Equals `entry_count` when no
  /// weigher is configured.
  pub fn weighted_size(&self) -> u64 {
    self.shared.weighted_size()
  }

  /// A snapshot of the cache's statistics. All zero unless stats recording
  /// was enabled at build time.
  pub fn stats(&self) -> StatsSnapshot {
    self.shared.stats.snapshot()
  }

  /// A map-like view of the cache that bypasses the loader and records no
  /// statistics.
  pub fn as_map(&self) -> MapView<K, V, H> {
    MapView::new(self.shared.clone())
  }

  /// Inspects and adjusts the cache's eviction and expiry configuration.
  pub fn policy(&self) -> PolicyView<K, V, H> {
    PolicyView::new(self.shared.clone())
  }

  /// Runs maintenance now: replays buffered reads, sweeps expired entries
  /// and evicts down to the bound.
  pub fn run_pending_tasks(&self) {
    self.shared.run_pending_tasks();
  }

  /// Verifies that the resident weight does not exceed the maximum.
  pub fn check_invariants(&self) -> Result<(), CapacityViolation> {
    self.shared.check_invariants()
  }

  /// Stops the background janitor. The cache remains usable; expired
  /// entries are then purged only by lookups and `run_pending_tasks`.
  pub fn shutdown(&self) {
    self.shared.shutdown();
  }
}

#[cfg(test)]
mod tests {
  use crate::{AsyncCache, Cache, CacheBuilder, LoadError};

  fn assert_send_sync<T: Send + Sync>() {}

  #[test]
  fn handles_cross_threads() {
    assert_send_sync::<Cache<String, Vec<u8>>>();
    assert_send_sync::<AsyncCache<u64, String>>();
    let cache = CacheBuilder::<String, u32>::new().maximum_size(4).build().unwrap();
    let other = cache.clone();
    std::thread::spawn(move || other.insert("k".to_string(), 1)).join().unwrap();
    assert_eq!(cache.get(&"k".to_string()).as_deref(), Some(&1));
  }

  #[test]
  fn clones_share_entries() {
    let cache = CacheBuilder::<u32, String>::new().build().unwrap();
    let other = cache.clone();
    cache.insert(1, "one".to_string());
    assert_eq!(other.get(&1).as_deref().map(String::as_str), Some("one"));
    assert!(other.invalidate(&1));
    assert!(!cache.contains_key(&1));
  }

  #[test]
  fn get_with_does_not_cache_failures() {
    let cache = CacheBuilder::<u32, u32>::new().build().unwrap();
    let err = cache.get_with(&1, |_| Err(LoadError::Missing)).unwrap_err();
    assert!(matches!(err, LoadError::Missing));
    assert_eq!(*cache.get_with(&1, |k| Ok(k + 1)).unwrap(), 2);
  }

  #[test]
  fn get_or_load_without_loader_fails() {
    let cache = CacheBuilder::<u32, u32>::new().build().unwrap();
    assert!(matches!(cache.get_or_load(&1), Err(LoadError::NoLoader)));
    assert!(matches!(cache.refresh(1), Err(LoadError::NoLoader)));
  }
}
