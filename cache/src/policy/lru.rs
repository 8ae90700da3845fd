use super::lru_list::LruList;
use super::{AdmissionDecision, CachePolicy};

use parking_lot::Mutex;
use std::hash::Hash;

/// An eviction policy that evicts the least recently used entries.
///
/// A write counts as a use. Keys that were never read leave in insertion
/// order, so ties between untouched keys are broken by age.
#[derive(Debug)]
pub struct Lru<K: Eq + Hash + Clone> {
  list: Mutex<LruList<K>>,
}

impl<K: Eq + Hash + Clone> Lru<K> {
  pub fn new() -> Self {
    Self {
      list: Mutex::new(LruList::new()),
    }
  }

  /// Tracked keys from most to least recently used.
  pub fn keys_by_recency(&self) -> Vec<K> {
    self.list.lock().keys_as_vec()
  }
}

impl<K: Eq + Hash + Clone> Default for Lru<K> {
  fn default() -> Self {
    Self::new()
  }
}

impl<K> CachePolicy<K> for Lru<K>
where
  K: Eq + Hash + Clone + Send + Sync,
{
  fn on_access(&self, key: &K, _weight: u64) {
    self.list.lock().touch(key);
  }

  fn on_admit(&self, key: &K, weight: u64) -> AdmissionDecision<K> {
    self.list.lock().push_front(key.clone(), weight);
    AdmissionDecision::Admit
  }

  fn on_remove(&self, key: &K) {
    self.list.lock().remove(key);
  }

  fn evict(&self, weight_to_free: u64) -> (Vec<K>, u64) {
    let mut list = self.list.lock();
    let mut victims = Vec::new();
    let mut freed = 0u64;
    while freed < weight_to_free {
      match list.pop_back() {
        Some((key, weight)) => {
          freed += weight;
          victims.push(key);
        }
        None => break,
      }
    }
    (victims, freed)
  }

  fn clear(&self) {
    self.list.lock().clear();
  }
}
