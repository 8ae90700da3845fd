mod common;

use common::{channel_listener, expect_no_removal, expect_removals};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use weft_cache::{CacheBuilder, FakeTicker, RemovalCause};

#[test]
fn test_sync_listener_for_capacity() {
  let (listener, rx) = channel_listener();
  let cache = CacheBuilder::<i32, String>::new()
    .maximum_size(2)
    .shards(1)
    .removal_listener(listener)
    .build()
    .unwrap();

  cache.insert(1, "one".to_string());
  cache.insert(2, "two".to_string());
  cache.insert(3, "three".to_string());

  let (key, value, cause) = expect_removals(&rx, 1).remove(0);
  assert_eq!(key, 1);
  assert_eq!(*value, "one");
  assert_eq!(cause, RemovalCause::Size);
  assert!(cause.was_evicted());
  expect_no_removal(&rx);
}

#[test]
fn test_sync_listener_for_invalidation() {
  let (listener, rx) = channel_listener();
  let cache = CacheBuilder::<i32, String>::new()
    .removal_listener(listener)
    .build()
    .unwrap();

  cache.insert(1, "one".to_string());
  assert!(cache.invalidate(&1));
  // Invalidating an absent key produces nothing.
  assert!(!cache.invalidate(&1));

  let (key, value, cause) = expect_removals(&rx, 1).remove(0);
  assert_eq!(key, 1);
  assert_eq!(*value, "one");
  assert_eq!(cause, RemovalCause::Explicit);
  assert!(!cause.was_evicted());
  expect_no_removal(&rx);
}

#[test]
fn test_sync_listener_for_replacement() {
  let (listener, rx) = channel_listener();
  let cache = CacheBuilder::<i32, String>::new()
    .removal_listener(listener)
    .build()
    .unwrap();

  cache.insert(1, "one".to_string());
  cache.insert(1, "uno".to_string());

  let (key, value, cause) = expect_removals(&rx, 1).remove(0);
  assert_eq!(key, 1);
  assert_eq!(*value, "one");
  assert_eq!(cause, RemovalCause::Replaced);
}

#[test]
fn test_sync_listener_for_expiry() {
  let ticker = FakeTicker::new();
  let (listener, rx) = channel_listener();
  let cache = CacheBuilder::<i32, String>::new()
    .expire_after_write(Duration::from_secs(1))
    .ticker(ticker.clone())
    .removal_listener(listener)
    .build()
    .unwrap();

  cache.insert(1, "one".to_string());
  ticker.advance(Duration::from_secs(1));
  cache.run_pending_tasks();

  let (key, _, cause) = expect_removals(&rx, 1).remove(0);
  assert_eq!(key, 1);
  assert_eq!(cause, RemovalCause::Expired);
  // The janitor or a later lookup must not report it again.
  assert!(cache.get(&1).is_none());
  expect_no_removal(&rx);
}

#[test]
fn test_invalidate_all_reports_every_entry() {
  let (listener, rx) = channel_listener();
  let cache = CacheBuilder::<i32, i32>::new()
    .removal_listener(listener)
    .build()
    .unwrap();
  for i in 0..50 {
    cache.insert(i, i);
  }
  cache.invalidate_all();

  let mut keys: Vec<i32> = expect_removals(&rx, 50).into_iter().map(|(key, _, cause)| {
    assert_eq!(cause, RemovalCause::Explicit);
    key
  }).collect();
  keys.sort_unstable();
  assert_eq!(keys, (0..50).collect::<Vec<_>>());
  expect_no_removal(&rx);
}

#[test]
fn test_notifications_arrive_in_removal_order() {
  let (listener, rx) = channel_listener();
  let cache = CacheBuilder::<i32, i32>::new()
    .removal_listener(listener)
    .build()
    .unwrap();
  for i in 0..20 {
    cache.insert(i, i);
    cache.invalidate(&i);
  }
  let keys: Vec<i32> = expect_removals(&rx, 20).into_iter().map(|(key, _, _)| key).collect();
  assert_eq!(keys, (0..20).collect::<Vec<_>>());
}

#[test]
fn test_panicking_listener_does_not_stop_delivery() {
  let delivered = Arc::new(AtomicUsize::new(0));
  let cache = CacheBuilder::<i32, i32>::new()
    .removal_listener({
      let delivered = delivered.clone();
      move |key: i32, _: Arc<i32>, _: RemovalCause| {
        if key == 0 {
          panic!("listener failure");
        }
        delivered.fetch_add(1, Ordering::SeqCst);
      }
    })
    .build()
    .unwrap();

  for i in 0..3 {
    cache.insert(i, i);
    cache.invalidate(&i);
  }
  for _ in 0..200 {
    if delivered.load(Ordering::SeqCst) == 2 {
      break;
    }
    std::thread::sleep(Duration::from_millis(10));
  }
  assert_eq!(delivered.load(Ordering::SeqCst), 2);
}

#[test]
fn test_listener_may_write_to_the_cache() {
  let (listener, rx) = channel_listener::<i32, i32>();
  let cache = CacheBuilder::<i32, i32>::new()
    .removal_listener(listener)
    .build()
    .unwrap();
  let echo = CacheBuilder::<i32, i32>::new()
    .removal_listener({
      let cache = cache.clone();
      move |key: i32, value: Arc<i32>, _: RemovalCause| cache.insert(key, *value)
    })
    .build()
    .unwrap();

  echo.insert(5, 50);
  echo.invalidate(&5);
  for _ in 0..200 {
    if cache.contains_key(&5) {
      break;
    }
    std::thread::sleep(Duration::from_millis(10));
  }
  assert_eq!(*cache.get(&5).unwrap(), 50);
  expect_no_removal(&rx);
}
