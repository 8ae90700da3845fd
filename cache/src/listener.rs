use std::fmt;
use std::sync::Arc;

/// Describes the reason an entry was removed from the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemovalCause {
  /// The entry was removed by `invalidate`, `invalidate_all` or `as_map().remove`.
  Explicit,
  /// The entry's value was overwritten by a put, compute or refresh.
  Replaced,
  /// The entry's expiry deadline passed.
  Expired,
  /// The entry was evicted to satisfy the size or weight bound.
  Size,
}

impl RemovalCause {
  /// True for removals the cache decided on itself.
  pub fn was_evicted(&self) -> bool {
    matches!(self, RemovalCause::Expired | RemovalCause::Size)
  }
}

impl fmt::Display for RemovalCause {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      RemovalCause::Explicit => write!(f, "explicitly removed"),
      RemovalCause::Replaced => write!(f, "replaced"),
      RemovalCause::Expired => write!(f, "expired"),
      RemovalCause::Size => write!(f, "evicted due to size"),
    }
  }
}

/// A listener registered with the cache to observe every removal.
///
/// Each removal produces exactly one call. Calls are made in removal order on
/// a dedicated background thread, so a slow listener delays later
/// notifications but never a cache operation.
pub trait RemovalListener<K, V>: Send + Sync {
  fn on_removal(&self, key: K, value: Arc<V>, cause: RemovalCause);
}

impl<K, V, F> RemovalListener<K, V> for F
where
  F: Fn(K, Arc<V>, RemovalCause) + Send + Sync,
{
  fn on_removal(&self, key: K, value: Arc<V>, cause: RemovalCause) {
    self(key, value, cause)
  }
}
