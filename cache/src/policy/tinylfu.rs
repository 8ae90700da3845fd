use super::lru_list::LruList;
use super::slru::SlruState;
use super::{AdmissionDecision, CachePolicy};

use parking_lot::Mutex;
use std::hash::Hash;

/// The unified mutable state of W-TinyLFU, held under a single lock.
#[derive(Debug)]
struct TinyLfuState<K: Eq + Hash + Clone> {
  window: LruList<K>,
  main: SlruState<K>,
  sketch: cms::CountMinSketch,
  window_capacity: u64,
}

/// Window TinyLFU.
///
/// New keys enter a small LRU window (1% of the bound). Keys pushed out of the
/// window compete with the main segment's next victim: the candidate is
/// admitted only if the frequency sketch estimates it at least as popular,
/// otherwise it is returned for immediate eviction. Capacity eviction takes
/// from the main segment's probation first, then its protected part.
#[derive(Debug)]
pub struct TinyLfuPolicy<K: Eq + Hash + Clone> {
  state: Mutex<TinyLfuState<K>>,
}

fn window_capacity_for(capacity: u64) -> u64 {
  if capacity == 0 {
    0
  } else {
    ((capacity as f64 * 0.01).round() as u64).max(1)
  }
}

impl<K: Eq + Hash + Clone> TinyLfuPolicy<K> {
  pub fn new(capacity: u64) -> Self {
    let window_capacity = window_capacity_for(capacity);
    let sample_size = capacity.saturating_mul(10).clamp(100, 1 << 24) as usize;
    Self {
      state: Mutex::new(TinyLfuState {
        window: LruList::new(),
        main: SlruState::new(capacity.saturating_sub(window_capacity)),
        sketch: cms::CountMinSketch::new(sample_size),
        window_capacity,
      }),
    }
  }

  /// The sketch's frequency estimate for `key`.
  pub fn frequency(&self, key: &K) -> usize {
    self.state.lock().sketch.estimate(key)
  }
}

impl<K> CachePolicy<K> for TinyLfuPolicy<K>
where
  K: Eq + Hash + Clone + Send + Sync,
{
  fn on_access(&self, key: &K, weight: u64) {
    let mut state = self.state.lock();
    state.sketch.increment(key);
    if !state.window.touch(key) {
      state.main.access(key, weight);
    }
  }

  fn on_admit(&self, key: &K, weight: u64) -> AdmissionDecision<K> {
    let mut state = self.state.lock();
    state.sketch.increment(key);

    // An update of a key already in the main segment counts as a use.
    if state.main.contains(key) {
      state.main.access(key, weight);
      return AdmissionDecision::Admit;
    }

    state.window.push_front(key.clone(), weight);

    let mut rejected = Vec::new();
    while state.window.total_weight() > state.window_capacity {
      let Some((candidate, candidate_weight)) = state.window.pop_back() else {
        break;
      };

      let admit = match state.main.peek_victim() {
        Some(victim) => state.sketch.estimate(&candidate) >= state.sketch.estimate(victim),
        None => true,
      };

      if admit {
        state.main.admit(candidate, candidate_weight);
      } else {
        rejected.push(candidate);
      }
    }

    if rejected.is_empty() {
      AdmissionDecision::Admit
    } else {
      AdmissionDecision::AdmitAndEvict(rejected)
    }
  }

  fn on_remove(&self, key: &K) {
    let mut state = self.state.lock();
    if state.window.remove(key).is_none() {
      state.main.remove(key);
    }
  }

  fn evict(&self, weight_to_free: u64) -> (Vec<K>, u64) {
    if weight_to_free == 0 {
      return (Vec::new(), 0);
    }
    let mut state = self.state.lock();
    let (mut victims, mut freed) = state.main.evict(weight_to_free);
    // Everything may still sit in the window when the bound is tiny.
    while freed < weight_to_free {
      match state.window.pop_back() {
        Some((key, weight)) => {
          freed += weight;
          victims.push(key);
        }
        None => break,
      }
    }
    (victims, freed)
  }

  fn resize(&self, maximum: u64) {
    let mut state = self.state.lock();
    state.window_capacity = window_capacity_for(maximum);
    let main_capacity = maximum.saturating_sub(state.window_capacity);
    state.main.resize(main_capacity);
  }

  fn clear(&self) {
    let mut state = self.state.lock();
    state.window.clear();
    state.main.clear();
    state.sketch.clear();
  }
}

mod cms {
  use std::hash::Hash;

  const DEPTH: usize = 4;

  /// A count-min sketch whose counters halve every `sample_size` increments,
  /// so the estimate tracks recent popularity rather than all-time counts.
  #[derive(Debug)]
  pub(super) struct CountMinSketch {
    // Plain counters; the outer TinyLfuState mutex serialises access.
    counters: Vec<Vec<u32>>,
    hashers: Vec<ahash::RandomState>,
    mask: usize,
    additions: usize,
    sample_size: usize,
  }

  impl CountMinSketch {
    pub fn new(sample_size: usize) -> Self {
      let width = (sample_size * 2 / DEPTH).max(256).next_power_of_two();
      Self {
        counters: (0..DEPTH).map(|_| vec![0u32; width]).collect(),
        hashers: (0..DEPTH).map(|_| ahash::RandomState::new()).collect(),
        mask: width - 1,
        additions: 0,
        sample_size,
      }
    }

    #[inline]
    fn slot<K: Hash>(&self, row: usize, key: &K) -> usize {
      self.hashers[row].hash_one(key) as usize & self.mask
    }

    pub fn increment<K: Hash>(&mut self, key: &K) {
      for row in 0..DEPTH {
        let slot = self.slot(row, key);
        let counter = &mut self.counters[row][slot];
        *counter = counter.saturating_add(1);
      }
      self.additions += 1;
      if self.additions >= self.sample_size {
        self.age();
      }
    }

    pub fn estimate<K: Hash>(&self, key: &K) -> usize {
      (0..DEPTH)
        .map(|row| self.counters[row][self.slot(row, key)] as usize)
        .min()
        .unwrap_or(0)
    }

    fn age(&mut self) {
      self.additions /= 2;
      for row in &mut self.counters {
        for counter in row.iter_mut() {
          *counter /= 2;
        }
      }
    }

    pub fn clear(&mut self) {
      self.additions = 0;
      for row in &mut self.counters {
        row.fill(0);
      }
    }
  }

}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn new_key_enters_the_window() {
    let policy: TinyLfuPolicy<i32> = TinyLfuPolicy::new(101);
    assert_eq!(policy.on_admit(&1, 1), AdmissionDecision::Admit);
    let state = policy.state.lock();
    assert!(state.window.contains(&1));
    assert!(!state.main.contains(&1));
  }

  #[test]
  fn cold_candidate_is_rejected_against_hot_victim() {
    let policy: TinyLfuPolicy<i32> = TinyLfuPolicy::new(101); // window=1

    {
      let mut state = policy.state.lock();
      state.main.admit(100, 1);
      for _ in 0..5 {
        state.sketch.increment(&100);
      }
    }

    policy.on_admit(&1, 1);
    let decision = policy.on_admit(&2, 1);
    assert_eq!(decision, AdmissionDecision::AdmitAndEvict(vec![1]));

    let state = policy.state.lock();
    assert!(state.window.contains(&2));
    assert!(!state.window.contains(&1));
    assert!(!state.main.contains(&1));
  }

  #[test]
  fn hot_candidate_is_admitted_to_main() {
    let policy: TinyLfuPolicy<i32> = TinyLfuPolicy::new(101);
    {
      let mut state = policy.state.lock();
      state.main.admit(100, 1);
      state.sketch.increment(&100);
    }

    policy.on_admit(&1, 1);
    for _ in 0..5 {
      policy.on_access(&1, 1);
    }
    assert_eq!(policy.on_admit(&2, 1), AdmissionDecision::Admit);
    assert!(policy.state.lock().main.probationary.contains(&1));
  }

  #[test]
  fn update_of_main_key_is_a_use() {
    let policy: TinyLfuPolicy<i32> = TinyLfuPolicy::new(101);
    policy.on_admit(&1, 1);
    policy.on_admit(&2, 1); // pushes 1 into main probation
    assert!(policy.state.lock().main.probationary.contains(&1));

    assert_eq!(policy.on_admit(&1, 5), AdmissionDecision::Admit);
    let state = policy.state.lock();
    assert!(state.main.protected.contains(&1));
    assert_eq!(state.main.protected.weight_of(&1), Some(5));
  }

  #[test]
  fn evict_falls_back_to_the_window() {
    let policy: TinyLfuPolicy<i32> = TinyLfuPolicy::new(2); // window=1, main=1
    policy.on_admit(&1, 1);
    policy.on_admit(&2, 1);
    policy.on_admit(&3, 1);
    let (victims, freed) = policy.evict(3);
    assert_eq!(freed, 3);
    assert_eq!(victims.len(), 3);
  }

  #[test]
  fn on_remove_forgets_the_key() {
    let policy: TinyLfuPolicy<i32> = TinyLfuPolicy::new(101);
    policy.on_admit(&1, 1);
    policy.on_remove(&1);
    assert!(policy.evict(1).0.is_empty());
  }
}
