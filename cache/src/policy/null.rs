use crate::policy::{AdmissionDecision, CachePolicy};

/// The policy of an unbounded cache. It tracks nothing and never evicts.
#[derive(Debug, Default)]
pub struct NullPolicy;

impl<K> CachePolicy<K> for NullPolicy
where
  K: Send + Sync,
{
  fn on_access(&self, _key: &K, _weight: u64) {}

  fn on_admit(&self, _key: &K, _weight: u64) -> AdmissionDecision<K> {
    AdmissionDecision::Admit
  }

  fn on_remove(&self, _key: &K) {}

  fn evict(&self, _weight_to_free: u64) -> (Vec<K>, u64) {
    (Vec::new(), 0)
  }

  fn clear(&self) {}
}
