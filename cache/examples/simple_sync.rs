use std::thread;
use std::time::Duration;
use weft_cache::CacheBuilder;

fn main() {
  // A cache of at most 100 entries, each living 2 seconds after it is
  // written, swept every 500ms.
  let cache = CacheBuilder::<String, u32>::new()
    .maximum_size(100)
    .expire_after_write(Duration::from_secs(2))
    .sweep_interval(Duration::from_millis(500))
    .record_stats()
    .build()
    .expect("Failed to build cache");

  println!("Inserting ('key1', 100) into the cache.");
  cache.insert("key1".to_string(), 100);

  match cache.get(&"key1".to_string()) {
    Some(value) => println!("Found value for key1: {}", value),
    None => println!("Value for key1 not found."),
  }
  println!(
    "key1 expires in {:?}",
    cache.policy().expires_after(&"key1".to_string())
  );

  println!("\nWaiting 3 seconds for the entry to expire...");
  thread::sleep(Duration::from_secs(3));

  // The janitor has purged the entry by now, even without a read.
  println!("Resident entries: {}", cache.entry_count());
  match cache.get(&"key1".to_string()) {
    Some(value) => println!("Found value for key1: {}", value),
    None => println!("Value for key1 not found (as expected after expiry)."),
  }

  println!("\nCache stats: {:#?}", cache.stats());
}
