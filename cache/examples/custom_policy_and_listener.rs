use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use weft_cache::{AdmissionDecision, CacheBuilder, CachePolicy, RemovalCause, RemovalListener};

// Evicts strictly in insertion order; reads change nothing.
#[derive(Default)]
struct FifoPolicy {
  queue: Mutex<VecDeque<i32>>,
}

impl CachePolicy<i32> for FifoPolicy {
  fn on_access(&self, _key: &i32, _weight: u64) {}

  fn on_admit(&self, key: &i32, _weight: u64) -> AdmissionDecision<i32> {
    let mut queue = self.queue.lock();
    if !queue.contains(key) {
      queue.push_back(*key);
    }
    AdmissionDecision::Admit
  }

  fn on_remove(&self, key: &i32) {
    self.queue.lock().retain(|queued| queued != key);
  }

  fn evict(&self, weight_to_free: u64) -> (Vec<i32>, u64) {
    let mut queue = self.queue.lock();
    let victims: Vec<i32> = (0..weight_to_free).map_while(|_| queue.pop_front()).collect();
    let freed = victims.len() as u64;
    (victims, freed)
  }

  fn clear(&self) {
    self.queue.lock().clear();
  }
}

// A simple listener that just prints removed entries.
struct PrintingListener;

impl RemovalListener<i32, String> for PrintingListener {
  fn on_removal(&self, key: i32, value: Arc<String>, cause: RemovalCause) {
    println!("[Listener] Key: {}, Value: '{}', Cause: {}", key, value, cause);
  }
}

fn main() {
  println!("--- Cache with a Custom FIFO Policy and Removal Listener ---");

  let cache = CacheBuilder::<i32, String>::new()
    .maximum_size(3)
    .cache_policy(FifoPolicy::default())
    .removal_listener(PrintingListener)
    .build()
    .expect("Failed to build cache");

  cache.insert(1, "one".to_string());
  cache.insert(2, "two".to_string());
  cache.insert(3, "three".to_string());
  println!("\nInserted keys 1, 2, 3. Cache is full.");

  // Reading key 1 would save it under LRU, but not under FIFO.
  cache.get(&1);

  println!("\nInserting key 4. This triggers an eviction.");
  cache.insert(4, "four".to_string());
  println!("Replacing key 3. This notifies a replacement.");
  cache.insert(3, "THREE".to_string());
  cache.invalidate(&2);

  // Notifications are delivered on a background thread.
  thread::sleep(Duration::from_millis(100));

  assert!(cache.get(&1).is_none(), "Key 1 was inserted first");
  assert!(cache.get(&3).is_some());
  assert!(cache.get(&4).is_some());
  println!("\nResident entries: {}", cache.entry_count());
}
