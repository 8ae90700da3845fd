use crate::policy::lru_list::LruList;

use std::hash::Hash;

/// Segmented LRU: new keys enter probation, a second use promotes them to the
/// protected segment, and protected overflow is demoted back to probation.
/// Victims come from probation first.
#[derive(Debug)]
pub(crate) struct SlruState<K: Eq + Hash + Clone> {
  pub(crate) probationary: LruList<K>,
  pub(crate) protected: LruList<K>,
  protected_capacity: u64,
}

/// Share of the segment reserved for probation.
const PROBATION_RATIO: f64 = 0.20;

pub(crate) fn protected_capacity_for(capacity: u64) -> u64 {
  if capacity == 0 {
    return 0;
  }
  let probation = ((capacity as f64 * PROBATION_RATIO).round() as u64).max(1);
  capacity.saturating_sub(probation)
}

impl<K: Eq + Hash + Clone> SlruState<K> {
  pub(crate) fn new(capacity: u64) -> Self {
    Self {
      probationary: LruList::new(),
      protected: LruList::new(),
      protected_capacity: protected_capacity_for(capacity),
    }
  }

  pub(crate) fn resize(&mut self, capacity: u64) {
    self.protected_capacity = protected_capacity_for(capacity);
    self.demote_overflow();
  }

  pub(crate) fn contains(&self, key: &K) -> bool {
    self.probationary.contains(key) || self.protected.contains(key)
  }

  #[cfg(test)]
  pub(crate) fn total_weight(&self) -> u64 {
    self.probationary.total_weight() + self.protected.total_weight()
  }

  fn demote_overflow(&mut self) {
    while self.protected.total_weight() > self.protected_capacity {
      match self.protected.pop_back() {
        Some((key, weight)) => self.probationary.push_front(key, weight),
        None => break,
      }
    }
  }

  /// The key `evict` would choose first.
  pub(crate) fn peek_victim(&self) -> Option<&K> {
    self.probationary.peek_back().or_else(|| self.protected.peek_back())
  }

  pub(crate) fn admit(&mut self, key: K, weight: u64) {
    if self.protected.contains(&key) {
      self.protected.push_front(key, weight);
      self.demote_overflow();
    } else {
      self.probationary.push_front(key, weight);
    }
  }

  /// Records a use. Returns false when the key is not tracked here.
  pub(crate) fn access(&mut self, key: &K, weight: u64) -> bool {
    if self.protected.contains(key) {
      self.protected.push_front(key.clone(), weight);
      self.demote_overflow();
      return true;
    }
    if self.probationary.remove(key).is_some() {
      self.protected.push_front(key.clone(), weight);
      self.demote_overflow();
      return true;
    }
    false
  }

  pub(crate) fn remove(&mut self, key: &K) -> bool {
    self.probationary.remove(key).is_some() || self.protected.remove(key).is_some()
  }

  pub(crate) fn evict(&mut self, weight_to_free: u64) -> (Vec<K>, u64) {
    let mut victims = Vec::new();
    let mut freed = 0u64;

    for segment in [&mut self.probationary, &mut self.protected] {
      while freed < weight_to_free {
        match segment.pop_back() {
          Some((key, weight)) => {
            freed += weight;
            victims.push(key);
          }
          None => break,
        }
      }
    }

    (victims, freed)
  }

  pub(crate) fn clear(&mut self) {
    self.probationary.clear();
    self.protected.clear();
  }
}
