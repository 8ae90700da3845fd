use crate::entry::CacheEntry;
use crate::loader::LoadFuture;
use crate::sync::HybridRwLock;

use core::fmt;
use std::collections::HashMap;
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;

use crossbeam_utils::CachePadded;
use parking_lot::Mutex;

pub(crate) type ShardMap<K, V, H> = HashMap<K, Arc<CacheEntry<V>>, H>;

/// Hashes a key with the store's `BuildHasher`.
#[inline]
pub(crate) fn hash_key<K: Hash, H: BuildHasher>(hasher: &H, key: &K) -> u64 {
  hasher.hash_one(key)
}

/// One independently locked partition of the store.
pub(crate) struct Shard<K, V, H> {
  pub(crate) map: HybridRwLock<ShardMap<K, V, H>>,
  /// In-flight loads for keys of this shard. May be held while taking
  /// `map`, never the other way round.
  pub(crate) pending: Mutex<ahash::HashMap<K, Arc<LoadFuture<V>>>>,
}

/// A cache store that is partitioned into multiple, independently locked shards.
///
/// This design allows for high concurrency by ensuring that operations on
/// different keys are unlikely to contend for the same lock.
pub(crate) struct ShardedStore<K, V, H> {
  shards: Box<[CachePadded<Shard<K, V, H>>]>,
  hasher: H,
  mask: usize,
}

impl<K, V, H> fmt::Debug for ShardedStore<K, V, H> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ShardedStore")
      .field("num_shards", &self.shards.len())
      .finish()
  }
}

impl<K, V, H> ShardedStore<K, V, H>
where
  K: Eq + Hash,
  H: BuildHasher + Clone,
{
  /// Creates a store with `num_shards` shards, a power of two validated by
  /// the builder. `initial_capacity` is spread evenly across the shards.
  pub(crate) fn new(num_shards: usize, hasher: H, initial_capacity: usize) -> Self {
    let per_shard = initial_capacity.div_ceil(num_shards.max(1));
    let mut shards = Vec::with_capacity(num_shards);
    for _ in 0..num_shards {
      let map = HashMap::with_capacity_and_hasher(per_shard, hasher.clone());
      shards.push(CachePadded::new(Shard {
        map: HybridRwLock::new(map),
        pending: Mutex::new(ahash::HashMap::default()),
      }));
    }

    Self {
      shards: shards.into_boxed_slice(),
      hasher,
      mask: num_shards.saturating_sub(1),
    }
  }

  #[inline]
  pub(crate) fn shard_index(&self, key: &K) -> usize {
    hash_key(&self.hasher, key) as usize & self.mask
  }

  /// The shard owning `key`.
  #[inline]
  pub(crate) fn shard(&self, key: &K) -> &Shard<K, V, H> {
    &self.shards[self.shard_index(key)]
  }

  #[cfg(test)]
  pub(crate) fn len(&self) -> usize {
    self.shards.len()
  }

  /// Iterates every shard, for whole-cache operations such as `invalidate_all`.
  pub(crate) fn iter_shards(&self) -> impl Iterator<Item = &Shard<K, V, H>> {
    self.shards.iter().map(|padded| &**padded)
  }
}
