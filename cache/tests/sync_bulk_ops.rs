use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use weft_cache::{CacheBuilder, CacheLoader, LoadError};

// Squares keys; key 13 is unlucky and never resolves.
#[derive(Clone, Default)]
struct SquareLoader {
  single_loads: Arc<AtomicUsize>,
  bulk_loads: Arc<AtomicUsize>,
  bulk: bool,
}

impl CacheLoader<u32, u32> for SquareLoader {
  fn load(&self, key: &u32) -> Result<u32, LoadError> {
    self.single_loads.fetch_add(1, Ordering::SeqCst);
    if *key == 13 {
      return Err(LoadError::Missing);
    }
    Ok(key * key)
  }

  fn load_all(&self, keys: &[u32]) -> Result<HashMap<u32, u32>, LoadError> {
    if !self.bulk {
      return Err(LoadError::BulkUnsupported);
    }
    self.bulk_loads.fetch_add(1, Ordering::SeqCst);
    let mut loaded: HashMap<u32, u32> = keys.iter().filter(|k| **k != 13).map(|k| (*k, k * k)).collect();
    // Loaders may return more than was asked for.
    loaded.insert(100, 10_000);
    Ok(loaded)
  }
}

#[test]
fn test_get_all_uses_the_bulk_hook_once() {
  let loader = SquareLoader {
    bulk: true,
    ..Default::default()
  };
  let cache = CacheBuilder::<u32, u32>::new()
    .record_stats()
    .loader(loader.clone())
    .build()
    .unwrap();
  cache.insert(1, 1);

  let values = cache.get_all([1, 2, 3, 3]).unwrap();
  assert_eq!(values.len(), 3);
  assert_eq!(*values[&2], 4);
  assert_eq!(*values[&3], 9);
  assert_eq!(loader.bulk_loads.load(Ordering::SeqCst), 1);
  assert_eq!(loader.single_loads.load(Ordering::SeqCst), 0);

  // The extra mapping was cached too.
  assert_eq!(*cache.get(&100).unwrap(), 10_000);
  let stats = cache.stats();
  assert_eq!(stats.hit_count, 2);
  assert_eq!(stats.miss_count, 2);
}

#[test]
fn test_get_all_falls_back_to_single_loads() {
  let loader = SquareLoader::default();
  let cache = CacheBuilder::<u32, u32>::new().loader(loader.clone()).build().unwrap();

  let values = cache.get_all(vec![2, 4, 6]).unwrap();
  assert_eq!(values.len(), 3);
  assert_eq!(loader.single_loads.load(Ordering::SeqCst), 3);
  assert_eq!(loader.bulk_loads.load(Ordering::SeqCst), 0);
}

#[test]
fn test_get_all_caches_siblings_of_a_failure() {
  let loader = SquareLoader::default();
  let cache = CacheBuilder::<u32, u32>::new().loader(loader).build().unwrap();

  let err = cache.get_all([12, 13, 14]).unwrap_err();
  assert!(matches!(err, LoadError::Missing));
  assert_eq!(*cache.get(&12).unwrap(), 144);
  assert_eq!(*cache.get(&14).unwrap(), 196);
  assert!(!cache.contains_key(&13));
}

#[test]
fn test_bulk_hook_missing_key_is_reported() {
  let loader = SquareLoader {
    bulk: true,
    ..Default::default()
  };
  let cache = CacheBuilder::<u32, u32>::new().loader(loader).build().unwrap();

  assert!(matches!(cache.get_all([5, 13]), Err(LoadError::Missing)));
  assert!(cache.contains_key(&5));
}

#[test]
fn test_get_all_without_loader_only_returns_hits() {
  let cache = CacheBuilder::<u32, u32>::new().build().unwrap();
  cache.insert(1, 1);
  assert_eq!(cache.get_all([1]).unwrap().len(), 1);
  assert!(matches!(cache.get_all([1, 2]), Err(LoadError::NoLoader)));
}
