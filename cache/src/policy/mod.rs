//! Eviction policies.
//!
//! A policy tracks recency and frequency for every resident key and picks
//! victims when the cache is over its bound. The cache drives it with
//! [`AccessEvent`]s: writes are applied under the key's shard lock, reads are
//! buffered and replayed in order before the next write or maintenance pass.

pub mod lru;
pub(crate) mod lru_list;
pub mod null;
pub(crate) mod slru;
pub mod tinylfu;

/// An access recorded against the policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum AccessEvent<K> {
  Read(K, u64),
  Write(K, u64),
}

/// The policy's verdict on a write.
#[derive(Debug, PartialEq, Eq)]
pub enum AdmissionDecision<K> {
  /// Keep the written key.
  Admit,
  /// Do not keep the written key; the cache evicts it immediately.
  Reject,
  /// Keep the written key but evict the listed keys, which the policy has
  /// already stopped tracking.
  AdmitAndEvict(Vec<K>),
}

/// Which built-in policy a bounded cache uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EvictionPolicy {
  /// Strict least-recently-used order, ties broken by insertion order.
  #[default]
  Lru,
  /// Window TinyLFU: an LRU admission window in front of a segmented LRU,
  /// guarded by a frequency sketch.
  TinyLfu,
}

/// A trait for implementing cache admission/eviction policies.
///
/// Implementations synchronise internally; every method may be called from
/// any thread. Calls for a given key are already serialised by the cache.
pub trait CachePolicy<K>: Send + Sync {
  /// A resident key was read.
  fn on_access(&self, key: &K, weight: u64);

  /// A key was inserted or its value replaced.
  fn on_admit(&self, key: &K, weight: u64) -> AdmissionDecision<K>;

  /// A key left the cache for any reason other than `evict`.
  fn on_remove(&self, key: &K);

  /// Chooses victims totalling at least `weight_to_free`, in eviction order,
  /// and stops tracking them. Returns the victims and the weight they free.
  fn evict(&self, weight_to_free: u64) -> (Vec<K>, u64);

  /// The cache's maximum changed.
  fn resize(&self, _maximum: u64) {}

  /// Clears all state from the policy.
  fn clear(&self);
}
