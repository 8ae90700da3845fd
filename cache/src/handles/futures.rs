use crate::error::LoadError;
use crate::loader::LoadHandle;
use crate::shared::CacheShared;
use crate::stats::StatsSnapshot;
use crate::views::{MapView, PolicyView};
use crate::Cache;

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;

use futures_util::future;

/// A thread-safe, asynchronous cache.
///
/// Loads run on the configured [`TaskSpawner`] and are observed through a
/// [`LoadHandle`]. Writes yield instead of blocking while a shard is locked.
///
/// [`TaskSpawner`]: crate::TaskSpawner
pub struct AsyncCache<K, V, H = ahash::RandomState>
where
  K: Send + 'static,
  V: Send + Sync + 'static,
{
  pub(crate) shared: Arc<CacheShared<K, V, H>>,
}

impl<K, V, H> Clone for AsyncCache<K, V, H>
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

impl<K, V, H> fmt::Debug for AsyncCache<K, V, H>
where
  K: Send + 'static,
  V: Send + Sync + 'static,
{
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("AsyncCache").field("shared", &self.shared).finish()
  }
}

impl<K, V, H> AsyncCache<K, V, H>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  /// Returns a blocking view of the same cache.
  /// This is a zero-cost conversion.
  pub fn synchronous(&self) -> Cache<K, V, H> {
    Cache {
      shared: self.shared.clone(),
    }
  }

  /// Retrieves a value from the cache.
  pub fn get(&self, key: &K) -> Option<Arc<V>> {
    self.shared.get(key)
  }

  /// Returns a handle to the value for `key`, starting `load` on the task
  /// spawner if the key is absent and no load is in flight.
  ///
  /// `load` is only called by the first caller for a missing key. Later
  /// callers attach to the same load and observe the same outcome.
  pub fn get_with<F, Fut>(&self, key: K, load: F) -> LoadHandle<V>
  where
    F: FnOnce(K) -> Fut,
    Fut: Future<Output = Result<V, LoadError>> + Send + 'static,
  {
    self.shared.load_handle_with(key, |pending| {
      let future = load(pending.key.clone());
      self.shared.spawn_load(pending, future);
    })
  }

  /// Returns a handle to the value for `key`, loading it through the
  /// configured loader if absent.
  ///
  /// A blocking loader runs on the cache's executor so the caller never
  /// blocks.
  pub fn get_or_load(&self, key: K) -> LoadHandle<V> {
    self.shared.load_handle(key)
  }

  /// Returns the values for `keys`, loading the missing ones concurrently.
  ///
  /// Every successful load is cached even if another key fails, in which
  /// case the first failure is returned.
  pub async fn get_all<I>(&self, keys: I) -> Result<HashMap<K, Arc<V>>, LoadError>
  where
    I: IntoIterator<Item = K>,
  {
    let now = self.shared.now();
    let mut seen = HashSet::new();
    let mut found = HashMap::new();
    let mut missing = Vec::new();
    for key in keys {
      if !seen.insert(key.clone()) {
        continue;
      }
      match self.shared.lookup(&key, now, true) {
        Some(value) => {
          found.insert(key, value);
        }
        None => missing.push(key),
      }
    }
    self.shared.stats.record_hits(found.len() as u64);
    if missing.is_empty() {
      return Ok(found);
    }

    let handles = missing.iter().cloned().map(|key| self.shared.load_handle(key));
    let outcomes = future::join_all(handles).await;

    let mut first_error = None;
    for (key, outcome) in missing.into_iter().zip(outcomes) {
      match outcome {
        Ok(value) => {
          found.insert(key, value);
        }
        Err(err) => {
          first_error.get_or_insert(err);
        }
      }
    }
    match first_error {
      Some(err) => Err(err),
      None => Ok(found),
    }
  }

  /// Inserts a key-value pair, replacing any existing value.
  ///
  /// Waits asynchronously if the key's shard is locked by another writer.
  pub async fn insert(&self, key: K, value: V) {
    self.shared.insert_async(key, Arc::new(value)).await;
  }

  /// Inserts the value `value` resolves to, once it resolves.
  ///
  /// The future runs on the task spawner. A failed future leaves the cache
  /// untouched.
  pub fn insert_future<Fut>(&self, key: K, value: Fut)
  where
    Fut: Future<Output = Result<V, LoadError>> + Send + 'static,
  {
    let Some(spawner) = self.shared.spawner.clone() else {
      tracing::warn!("insert_future ignored: no task spawner is configured");
      return;
    };
    let shared = self.shared.clone();
    spawner.spawn(Box::pin(async move {
      match value.await {
        Ok(value) => {
          shared.insert_async(key, Arc::new(value)).await;
        }
        Err(err) => tracing::warn!(error = %err, "discarding a failed insert_future"),
      }
    }));
  }

  /// Removes an entry from the cache, returning `true` if a live entry was
  /// removed.
  pub async fn invalidate(&self, key: &K) -> bool {
    self.shared.remove_async(key).await.is_some()
  }

  /// Removes all entries.
  pub async fn invalidate_all(&self) {
    self.shared.invalidate_all_async().await;
  }

  pub fn stats(&self) -> StatsSnapshot {
    self.shared.stats.snapshot()
  }

  /// A map-like view of the cache that bypasses the loader and records no
  /// statistics.
  pub fn as_map(&self) -> MapView<K, V, H> {
    MapView::new(self.shared.clone())
  }

  pub fn policy(&self) -> PolicyView<K, V, H> {
    PolicyView::new(self.shared.clone())
  }

  /// Runs maintenance now. Blocks briefly on the maintenance lock.
  pub fn run_pending_tasks(&self) {
    self.shared.run_pending_tasks();
  }
}
