#![allow(dead_code)]

use std::hash::{BuildHasher, Hasher};
use std::sync::{mpsc, Arc};
use std::time::Duration;

use weft_cache::{Cache, CacheBuilder, RemovalCause, RemovalListener};

// A custom hasher that allows us to control which shard a key is assigned to.
// It simply uses the integer value of the key as its hash.
// For a 4-shard cache:
// - key 0 -> shard 0 (0 % 4 = 0)
// - key 1 -> shard 1 (1 % 4 = 1)
// - key 4 -> shard 0 (4 % 4 = 0)
#[derive(Clone, Default)]
pub struct ShardControllingHasher;
impl BuildHasher for ShardControllingHasher {
  type Hasher = TestHasher;
  fn build_hasher(&self) -> Self::Hasher {
    TestHasher(0)
  }
}
pub struct TestHasher(u64);
impl Hasher for TestHasher {
  fn finish(&self) -> u64 {
    self.0
  }
  fn write(&mut self, _: &[u8]) {
    unimplemented!()
  }
  fn write_i32(&mut self, i: i32) {
    self.0 = i as u64;
  }
}

pub fn build_test_cache(shards: usize) -> Cache<i32, String, ShardControllingHasher> {
  CacheBuilder::new()
    .shards(shards)
    .hasher(ShardControllingHasher)
    .build()
    .unwrap()
}

// Helper to build a size-bounded cache for testing purposes.
pub fn build_test_cache_with_max(shards: usize, maximum: u64) -> Cache<i32, String, ShardControllingHasher> {
  CacheBuilder::new()
    .shards(shards)
    .maximum_size(maximum)
    .hasher(ShardControllingHasher)
    .build()
    .unwrap()
}

pub type Removal<K, V> = (K, Arc<V>, RemovalCause);

// Forwards every removal into a std channel so tests can wait on it.
pub struct ChannelListener<K, V> {
  sender: mpsc::Sender<Removal<K, V>>,
}

impl<K, V> RemovalListener<K, V> for ChannelListener<K, V>
where
  K: Send,
  V: Send + Sync,
{
  fn on_removal(&self, key: K, value: Arc<V>, cause: RemovalCause) {
    // The receiver may already be gone at the end of a test.
    let _ = self.sender.send((key, value, cause));
  }
}

pub fn channel_listener<K, V>() -> (ChannelListener<K, V>, mpsc::Receiver<Removal<K, V>>) {
  let (sender, receiver) = mpsc::channel();
  (ChannelListener { sender }, receiver)
}

/// Receives exactly `count` removals, failing if they take too long.
pub fn expect_removals<K, V>(rx: &mpsc::Receiver<Removal<K, V>>, count: usize) -> Vec<Removal<K, V>> {
  (0..count)
    .map(|_| rx.recv_timeout(Duration::from_secs(2)).expect("removal notification"))
    .collect()
}

/// Asserts that no further removal arrives shortly.
pub fn expect_no_removal<K, V>(rx: &mpsc::Receiver<Removal<K, V>>) {
  assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
}
