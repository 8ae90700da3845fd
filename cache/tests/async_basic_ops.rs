use std::sync::Arc;
use std::time::Duration;
use weft_cache::{AsyncCache, CacheBuilder, FakeTicker, RemovalCause};

// Helper to create a new bounded async cache with statistics.
fn new_test_cache(maximum: u64) -> AsyncCache<String, i32> {
  CacheBuilder::<String, i32>::new()
    .maximum_size(maximum)
    .record_stats()
    .build_async()
    .unwrap()
}

#[tokio::test]
async fn test_async_insert_and_get() {
  let cache = new_test_cache(100);
  cache.insert("key1".to_string(), 10).await;

  // Test get hit
  assert_eq!(cache.get(&"key1".to_string()), Some(Arc::new(10)));

  // Test get miss
  assert!(cache.get(&"non-existent".to_string()).is_none());

  let stats = cache.stats();
  assert_eq!(stats.hit_count, 1);
  assert_eq!(stats.miss_count, 1);
  assert_eq!(cache.synchronous().entry_count(), 1);
}

#[tokio::test]
async fn test_async_invalidate_and_invalidate_all() {
  let cache = new_test_cache(100);
  cache.insert("key1".to_string(), 10).await;
  cache.insert("key2".to_string(), 20).await;

  // Test invalidate
  assert!(cache.invalidate(&"key1".to_string()).await);
  assert!(
    !cache.invalidate(&"key1".to_string()).await,
    "Double invalidate should find nothing"
  );
  assert!(cache.get(&"key1".to_string()).is_none());
  assert_eq!(cache.synchronous().entry_count(), 1, "key2 should remain");

  // Test invalidate_all
  cache.invalidate_all().await;
  assert!(cache.get(&"key2".to_string()).is_none());
  assert_eq!(cache.synchronous().entry_count(), 0);
}

#[tokio::test]
async fn test_async_replacement() {
  let cache = new_test_cache(100);
  cache.insert("key1".to_string(), 10).await;
  cache.insert("key1".to_string(), 20).await;
  assert_eq!(cache.get(&"key1".to_string()), Some(Arc::new(20)));
  assert_eq!(cache.synchronous().entry_count(), 1, "replacement keeps one entry");
}

#[tokio::test]
async fn test_async_capacity_eviction() {
  let cache = new_test_cache(2);
  cache.insert("a".to_string(), 1).await;
  cache.insert("b".to_string(), 2).await;
  cache.get(&"a".to_string());
  cache.insert("c".to_string(), 3).await;

  assert!(cache.get(&"b".to_string()).is_none());
  assert!(cache.get(&"a".to_string()).is_some());
  assert_eq!(cache.stats().eviction_count, 1);
}

#[tokio::test]
async fn test_async_expiry_with_fake_ticker() {
  let ticker = FakeTicker::new();
  let removed = Arc::new(parking_lot::Mutex::new(Vec::new()));
  let cache = CacheBuilder::<u32, u32>::new()
    .expire_after_write(Duration::from_secs(10))
    .ticker(ticker.clone())
    .removal_listener({
      let removed = removed.clone();
      move |key: u32, _: Arc<u32>, cause: RemovalCause| removed.lock().push((key, cause))
    })
    .build_async()
    .unwrap();

  cache.insert(1, 1).await;
  ticker.advance(Duration::from_secs(10));
  assert!(cache.get(&1).is_none());

  for _ in 0..100 {
    if !removed.lock().is_empty() {
      break;
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
  }
  assert_eq!(removed.lock().as_slice(), &[(1, RemovalCause::Expired)]);
}

#[tokio::test]
async fn test_async_map_view_compute() {
  let cache = new_test_cache(100);
  cache.insert("key1".to_string(), 50).await;

  let map = cache.as_map();
  let doubled = map.compute("key1".to_string(), |_, current| current.map(|v| v * 2));
  assert_eq!(doubled, Some(Arc::new(100)));
  assert_eq!(cache.get(&"key1".to_string()), Some(Arc::new(100)));

  // Computing over a missing key may decline to create it.
  assert!(map.compute("missing".to_string(), |_, current| current.copied()).is_none());
  assert!(!map.contains_key(&"missing".to_string()));
}

#[tokio::test]
async fn test_async_handle_conversion() {
  let cache = new_test_cache(100);
  cache.insert("shared_key".to_string(), 999).await;

  // Convert to sync and check if the state is shared
  let sync_handle = cache.synchronous();
  assert_eq!(sync_handle.get(&"shared_key".to_string()), Some(Arc::new(999)));

  // Invalidate from the sync handle
  sync_handle.invalidate(&"shared_key".to_string());

  // Check from the original async handle that it's gone
  assert!(cache.get(&"shared_key".to_string()).is_none());

  // And back again.
  let async_again = sync_handle.to_async();
  async_again.insert("other".to_string(), 1).await;
  assert!(cache.get(&"other".to_string()).is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_async_concurrent_writers() {
  let cache = new_test_cache(256);
  let tasks: Vec<_> = (0..8)
    .map(|t| {
      let cache = cache.clone();
      tokio::spawn(async move {
        for i in 0..500 {
          let key = format!("{t}-{i}");
          cache.insert(key.clone(), i).await;
          cache.get(&key);
          if i % 3 == 0 {
            cache.invalidate(&key).await;
          }
        }
      })
    })
    .collect();
  for task in tasks {
    task.await.unwrap();
  }

  cache.run_pending_tasks();
  let sync = cache.synchronous();
  sync.check_invariants().unwrap();
  assert!(sync.entry_count() <= 256);
}
