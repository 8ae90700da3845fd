use std::hash::Hash;

use ahash::HashMap;
use generational_arena::{Arena, Index};

#[derive(Debug)]
pub(crate) struct Node<K> {
  pub(crate) key: K,
  pub(crate) weight: u64,
  pub(crate) next: Option<Index>,
  pub(crate) prev: Option<Index>,
}

/// A weighted recency list: head is the most recently used key, tail the
/// least. Nodes live in an arena so relinking never allocates.
#[derive(Debug)]
pub(crate) struct LruList<K: Eq + Hash + Clone> {
  nodes: Arena<Node<K>>,
  lookup: HashMap<K, Index>,
  head: Option<Index>,
  tail: Option<Index>,
  total_weight: u64,
}

impl<K: Eq + Hash + Clone> LruList<K> {
  pub fn new() -> Self {
    Self {
      nodes: Arena::new(),
      lookup: HashMap::default(),
      head: None,
      tail: None,
      total_weight: 0,
    }
  }

  // Detaches a node from its neighbours without freeing it.
  fn unlink(&mut self, index: Index) {
    let (prev, next) = {
      let node = &self.nodes[index];
      (node.prev, node.next)
    };

    match prev {
      Some(prev) => self.nodes[prev].next = next,
      None => self.head = next,
    }
    match next {
      Some(next) => self.nodes[next].prev = prev,
      None => self.tail = prev,
    }
  }

  fn link_front(&mut self, index: Index) {
    let old_head = self.head;
    self.nodes[index].next = old_head;
    self.nodes[index].prev = None;
    self.head = Some(index);

    if let Some(old_head) = old_head {
      self.nodes[old_head].prev = Some(index);
    }
    if self.tail.is_none() {
      self.tail = Some(index);
    }
  }

  pub fn contains(&self, key: &K) -> bool {
    self.lookup.contains_key(key)
  }

  #[cfg(test)]
  pub fn len(&self) -> usize {
    self.lookup.len()
  }

  pub fn total_weight(&self) -> u64 {
    self.total_weight
  }

  #[cfg(test)]
  pub fn weight_of(&self, key: &K) -> Option<u64> {
    self.lookup.get(key).map(|&index| self.nodes[index].weight)
  }

  /// Inserts `key` at the head, or moves it there and updates its weight.
  pub fn push_front(&mut self, key: K, weight: u64) {
    if let Some(&index) = self.lookup.get(&key) {
      let old = self.nodes[index].weight;
      self.total_weight = self.total_weight.saturating_sub(old) + weight;
      self.nodes[index].weight = weight;
      if self.head != Some(index) {
        self.unlink(index);
        self.link_front(index);
      }
      return;
    }

    let index = self.nodes.insert(Node {
      key: key.clone(),
      weight,
      next: None,
      prev: None,
    });
    self.lookup.insert(key, index);
    self.total_weight += weight;
    self.link_front(index);
  }

  /// Moves an existing key to the head. Unknown keys are ignored.
  pub fn touch(&mut self, key: &K) -> bool {
    match self.lookup.get(key) {
      Some(&index) => {
        if self.head != Some(index) {
          self.unlink(index);
          self.link_front(index);
        }
        true
      }
      None => false,
    }
  }

  /// The least recently used key, without removing it.
  pub fn peek_back(&self) -> Option<&K> {
    self.tail.map(|index| &self.nodes[index].key)
  }

  pub fn pop_back(&mut self) -> Option<(K, u64)> {
    let tail = self.tail?;
    let key = self.nodes.get(tail)?.key.clone();
    let weight = self.remove(&key)?;
    Some((key, weight))
  }

  pub fn remove(&mut self, key: &K) -> Option<u64> {
    let index = self.lookup.remove(key)?;
    self.unlink(index);
    let node = self.nodes.remove(index)?;
    self.total_weight = self.total_weight.saturating_sub(node.weight);
    Some(node.weight)
  }

  pub fn clear(&mut self) {
    self.nodes.clear();
    self.lookup.clear();
    self.head = None;
    self.tail = None;
    self.total_weight = 0;
  }

  /// Keys from most to least recently used.
  pub(crate) fn keys_as_vec(&self) -> Vec<K> {
    let mut keys = Vec::with_capacity(self.lookup.len());
    let mut current = self.head;
    while let Some(index) = current {
      keys.push(self.nodes[index].key.clone());
      current = self.nodes[index].next;
    }
    keys
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn new_list_is_empty() {
    let list = LruList::<i32>::new();
    assert!(list.keys_as_vec().is_empty());
    assert_eq!(list.len(), 0);
    assert_eq!(list.total_weight(), 0);
    assert!(list.peek_back().is_none());
  }

  #[test]
  fn push_front_orders_newest_first() {
    let mut list = LruList::new();
    list.push_front(10, 5);
    list.push_front(20, 2);
    assert_eq!(list.keys_as_vec(), vec![20, 10]);
    assert_eq!(list.total_weight(), 7);
    assert_eq!(list.peek_back(), Some(&10));
  }

  #[test]
  fn repush_moves_to_front_and_reweighs() {
    let mut list = LruList::new();
    list.push_front(1, 10);
    list.push_front(2, 20);
    list.push_front(3, 30);

    list.push_front(1, 5);
    assert_eq!(list.keys_as_vec(), vec![1, 3, 2]);
    assert_eq!(list.total_weight(), 55);
    assert_eq!(list.weight_of(&1), Some(5));
  }

  #[test]
  fn touch_only_moves_known_keys() {
    let mut list = LruList::new();
    list.push_front(1, 1);
    list.push_front(2, 1);
    assert!(list.touch(&1));
    assert!(!list.touch(&9));
    assert_eq!(list.keys_as_vec(), vec![1, 2]);
  }

  #[test]
  fn pop_back_returns_lru_with_weight() {
    let mut list = LruList::new();
    list.push_front(1, 1);
    list.push_front(2, 2);
    list.push_front(3, 3);

    assert_eq!(list.pop_back(), Some((1, 1)));
    assert_eq!(list.total_weight(), 5);
    assert_eq!(list.keys_as_vec(), vec![3, 2]);
  }

  #[test]
  fn pop_back_until_empty() {
    let mut list = LruList::new();
    list.push_front(1, 10);
    assert_eq!(list.pop_back(), Some((1, 10)));
    assert_eq!(list.pop_back(), None);
    assert_eq!(list.total_weight(), 0);
  }

  #[test]
  fn remove_from_middle_relinks_neighbours() {
    let mut list = LruList::new();
    list.push_front(1, 1);
    list.push_front(2, 2);
    list.push_front(3, 3);

    assert_eq!(list.remove(&2), Some(2));
    assert_eq!(list.remove(&99), None);
    assert_eq!(list.keys_as_vec(), vec![3, 1]);
    assert_eq!(list.total_weight(), 4);
  }

  #[test]
  fn remove_head_and_tail() {
    let mut list = LruList::new();
    list.push_front(1, 1);
    list.push_front(2, 1);
    list.push_front(3, 1);
    list.remove(&3);
    list.remove(&1);
    assert_eq!(list.keys_as_vec(), vec![2]);
    assert_eq!(list.peek_back(), Some(&2));
  }

  #[test]
  fn clear_resets_everything() {
    let mut list = LruList::new();
    list.push_front(1, 10);
    list.push_front(2, 20);
    list.clear();
    assert!(list.keys_as_vec().is_empty());
    assert_eq!(list.total_weight(), 0);
    assert!(!list.contains(&1));
  }
}
