use std::sync::{
  atomic::{AtomicUsize, Ordering},
  Arc,
};
use tokio::time::{sleep, Duration};
use weft_cache::{CacheBuilder, LoadError};

// A simulated database or slow external service.
async fn fetch_from_database(key: i32, load_count: Arc<AtomicUsize>) -> Result<String, LoadError> {
  println!("--- Database: Received request for key {}. Simulating slow query...", key);
  load_count.fetch_add(1, Ordering::SeqCst);
  sleep(Duration::from_millis(500)).await;
  let value = format!("value_for_{}", key);
  println!("--- Database: Responding with '{}' for key {}.", value, key);
  Ok(value)
}

#[tokio::main]
async fn main() {
  let load_counter = Arc::new(AtomicUsize::new(0));

  // The loader runs on the current Tokio runtime.
  let cache = CacheBuilder::<i32, String>::new()
    .maximum_size(10)
    .record_stats()
    .async_loader({
      let counter = load_counter.clone();
      move |key: i32| fetch_from_database(key, counter.clone())
    })
    .build_async()
    .expect("Failed to build async cache");

  println!("--- Thundering Herd Demonstration ---");
  println!("Spawning 10 tasks to request the same key '42' at once.\n");

  let mut tasks = Vec::new();
  for i in 0..10 {
    let cache_clone = cache.clone();
    tasks.push(tokio::spawn(async move {
      println!("[Task {}] Requesting key 42...", i);
      let value = cache_clone.get_or_load(42).await.expect("load failed");
      println!("[Task {}] Received value: {}", i, value);
      assert_eq!(*value, "value_for_42");
    }));
  }

  for task in tasks {
    task.await.unwrap();
  }

  println!("\n--- Verification ---");
  println!(
    "Database function was called {} time(s).",
    load_counter.load(Ordering::SeqCst)
  );
  assert_eq!(load_counter.load(Ordering::SeqCst), 1);

  println!("\n--- Cancellation ---");
  let handle = cache.get_or_load(7);
  println!("Started loading key 7, cancelling it: {}", handle.cancel());
  sleep(Duration::from_millis(600)).await;
  println!("Key 7 present after the cancelled load finished: {}", cache.get(&7).is_some());

  println!("\nCache stats: {:#?}", cache.stats());
}
