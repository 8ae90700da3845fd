use std::thread;
use std::time::Duration;
use weft_cache::CacheBuilder;

fn main() {
  // Entries expire once they have gone 2 seconds without a read or write.
  let cache = CacheBuilder::<&str, &str>::new()
    .expire_after_access(Duration::from_secs(2))
    .sweep_interval(Duration::from_millis(500))
    .record_stats()
    .build()
    .expect("Failed to build cache");

  println!("--- Expire-After-Access Demonstration ---");
  cache.insert("my_key", "my_value");
  println!("Inserted ('my_key', 'my_value'). It will expire in 2 seconds if not accessed.");

  println!("\n--- Part 1: Resetting the Idle Timer ---");
  for i in 1..=4 {
    thread::sleep(Duration::from_secs(1));
    // Each read restarts the 2-second idle window.
    assert!(cache.get(&"my_key").is_some());
    println!("[Cycle {}] Accessed 'my_key'. Its idle timer has been reset.", i);
  }

  println!("\n--- Part 2: Letting the Item Expire ---");
  println!("Waiting for 3 seconds without accessing the key...");
  thread::sleep(Duration::from_secs(3));

  assert!(cache.get(&"my_key").is_none(), "Item should be expired now.");
  println!("'my_key' has expired due to being idle for more than 2 seconds.");

  println!("\nFinal stats: {:#?}", cache.stats());
  assert_eq!(cache.stats().eviction_count, 1);
}
