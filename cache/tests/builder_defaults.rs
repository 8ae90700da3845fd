use std::time::Duration;
use weft_cache::{BuildError, CacheBuilder, EvictionPolicy, LoadError, TimerWheelMode};

#[test]
fn test_unbounded_cache_with_ttl() {
  // Unbounded caches track no eviction order at all.
  let cache = CacheBuilder::<i32, i32>::new()
    .expire_after_write(Duration::from_secs(1))
    .build()
    .unwrap();

  cache.insert(1, 1);
  assert!(cache.get(&1).is_some());
  assert!(cache.policy().eviction().is_none());
  assert_eq!(cache.policy().expire_after_write(), Some(Duration::from_secs(1)));
}

#[tokio::test]
async fn test_unbounded_async_cache_with_tti() {
  let cache = CacheBuilder::<i32, i32>::new()
    .shards(1)
    .expire_after_access(Duration::from_secs(1))
    .build_async()
    .unwrap();

  cache.insert(1, 1).await;
  assert!(cache.get(&1).is_some());
  assert_eq!(cache.policy().expire_after_access(), Some(Duration::from_secs(1)));
}

#[test]
fn test_bounded_cache_defaults_to_lru() {
  let cache = CacheBuilder::<i32, i32>::new()
    .shards(1)
    .maximum_size(2)
    .build()
    .unwrap();

  cache.insert(1, 1);
  cache.insert(2, 2);
  // Item 1 becomes the most recently used.
  cache.get(&1);
  cache.insert(3, 3);

  assert_eq!(cache.entry_count(), 2);
  assert!(cache.get(&1).is_some(), "recently read item survives");
  assert!(cache.get(&2).is_none(), "least recently used item is evicted");
  assert!(cache.get(&3).is_some());

  let eviction = cache.policy().eviction().unwrap();
  assert_eq!(eviction.maximum(), 2);
  assert!(!eviction.is_weighted());
}

#[test]
fn test_tinylfu_respects_the_bound() {
  let cache = CacheBuilder::<i32, i32>::new()
    .maximum_size(16)
    .eviction_policy(EvictionPolicy::TinyLfu)
    .build()
    .unwrap();
  for i in 0..200 {
    cache.insert(i, i);
  }
  cache.run_pending_tasks();
  assert!(cache.entry_count() <= 16);
  cache.check_invariants().unwrap();
}

#[test]
fn test_every_timer_mode_builds() {
  for mode in [
    TimerWheelMode::Default,
    TimerWheelMode::HighPrecisionShortLived,
    TimerWheelMode::LowPrecisionLongLived,
  ] {
    let cache = CacheBuilder::<i32, i32>::new()
      .expire_after_write(Duration::from_secs(60))
      .timer_mode(mode)
      .initial_capacity(1_024)
      .build()
      .unwrap();
    cache.insert(1, 1);
    assert!(cache.contains_key(&1));
  }
}

#[test]
fn test_async_loader_needs_a_spawner_outside_a_runtime() {
  let result = CacheBuilder::<i32, i32>::new()
    .async_loader(|key: i32| async move { Ok::<_, LoadError>(key) })
    .build();
  assert_eq!(result.unwrap_err(), BuildError::SpawnerRequired);
}

#[test]
fn test_build_errors_are_reported_before_anything_starts() {
  let err = CacheBuilder::<i32, i32>::new()
    .maximum_size(10)
    .maximum_weight(10)
    .build()
    .unwrap_err();
  assert_eq!(err, BuildError::SizeAndWeight);
  assert_eq!(err.to_string(), "maximum_size and maximum_weight are mutually exclusive");

  let err = CacheBuilder::<i32, i32>::new()
    .timer_tick_duration(Duration::ZERO)
    .build_async()
    .unwrap_err();
  assert_eq!(err, BuildError::ZeroTimerWheel);
}
