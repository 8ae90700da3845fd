use std::sync::{
  atomic::{AtomicUsize, Ordering},
  Arc,
};
use std::thread;
use std::time::Duration;
use weft_cache::{CacheBuilder, LoadError, RemovalCause};

#[derive(Debug, Clone, PartialEq)]
struct Data {
  version: usize,
  content: String,
}

fn main() {
  let load_counter = Arc::new(AtomicUsize::new(0));

  // Entries older than 1s are reloaded on their next read; they expire
  // outright 10s after they were first written.
  let cache = CacheBuilder::<String, Data>::new()
    .refresh_after_write(Duration::from_secs(1))
    .expire_after_write(Duration::from_secs(10))
    .removal_listener(|key: String, value: Arc<Data>, cause: RemovalCause| {
      println!("[Listener] '{}' v{} removed: {}", key, value.version, cause);
    })
    .loader({
      let counter = load_counter.clone();
      move |key: &String| -> Result<Data, LoadError> {
        let version = counter.fetch_add(1, Ordering::SeqCst) + 1;
        println!("[Loader] Loading version {} for key '{}'...", version, key);
        thread::sleep(Duration::from_millis(500)); // Simulate slow load
        Ok(Data {
          version,
          content: format!("Content for {} - version {}", key, version),
        })
      }
    })
    .build()
    .unwrap();

  let key = "my-data".to_string();

  println!("--- Step 1: Initial Load ---");
  let value = cache.get_or_load(&key).unwrap();
  println!("Received: {:?}", *value);
  assert_eq!(value.version, 1);

  println!("\n--- Step 2: Wait past the refresh threshold ---");
  thread::sleep(Duration::from_millis(1_500));

  println!("\n--- Step 3: Stale Read ---");
  let value = cache.get(&key).unwrap();
  println!("IMMEDIATELY Received (stale): {:?}", *value);
  assert_eq!(value.version, 1, "Should return stale version 1 immediately");

  println!("\n--- Step 4: Wait for the background reload ---");
  thread::sleep(Duration::from_secs(1));
  assert_eq!(load_counter.load(Ordering::SeqCst), 2);

  let value = cache.get(&key).unwrap();
  println!("Received (refreshed): {:?}", *value);
  assert_eq!(value.version, 2, "Should now have the refreshed version 2");
}
