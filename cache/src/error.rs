use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// Errors that can occur when building a cache.
///
/// Every variant describes a configuration that cannot be honoured. They are
/// reported by `build`/`build_async` before any background thread is started.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
  /// A bounded cache was configured with a maximum of zero.
  #[error("bounded cache capacity cannot be zero")]
  ZeroCapacity,
  /// The cache was configured with zero shards.
  #[error("shard count cannot be zero")]
  ZeroShards,
  /// A variable `expire_after` hook was combined with a fixed expiry.
  #[error("variable expiry cannot be combined with expire_after_write or expire_after_access")]
  ConflictingExpiry,
  /// Both `maximum_size` and `maximum_weight` were configured.
  #[error("maximum_size and maximum_weight are mutually exclusive")]
  SizeAndWeight,
  /// A weigher was supplied without `maximum_weight`.
  #[error("a weigher requires maximum_weight to be set")]
  WeigherWithoutMaximumWeight,
  /// `maximum_weight` was set without a weigher.
  #[error("maximum_weight requires a weigher")]
  MaximumWeightWithoutWeigher,
  /// `refresh_after_write` was set but no loader can perform the reload.
  #[error("refresh_after_write requires a loader")]
  RefreshWithoutLoader,
  /// An async loader was provided, but no `TaskSpawner` was configured
  /// and the `tokio` feature is not enabled.
  #[error("an async loader requires a task spawner or the 'tokio' feature")]
  SpawnerRequired,
  /// The timer wheel was configured with zero slots or a zero tick.
  #[error("timer wheel size and tick duration must be non-zero")]
  ZeroTimerWheel,
  /// The operating system refused to start a background thread.
  #[error("failed to spawn the {0} thread")]
  ThreadSpawn(&'static str),
}

/// The failure reported to every caller attached to a load.
///
/// `LoadError` is cheap to clone so a single failed load can be handed to all
/// waiters. A failed load is never cached; the next lookup retries it.
#[derive(Debug, Clone, Error)]
pub enum LoadError {
  /// The loader had no value for the key.
  #[error("loader returned no value for the key")]
  Missing,
  /// The loader failed.
  #[error("loader failed: {0}")]
  Failed(#[source] Arc<dyn StdError + Send + Sync>),
  /// A loading lookup was made on a cache without a configured loader.
  #[error("no loader is configured for this cache")]
  NoLoader,
  /// The load was cancelled by its only caller.
  #[error("the load was cancelled")]
  Cancelled,
  /// The loader panicked before producing a value.
  #[error("the loader panicked")]
  Panicked,
  /// The loader does not implement bulk loading.
  #[error("bulk loading is not supported by this loader")]
  BulkUnsupported,
}

impl LoadError {
  /// Wraps an arbitrary error as a loader failure.
  pub fn failed<E>(error: E) -> Self
  where
    E: StdError + Send + Sync + 'static,
  {
    LoadError::Failed(Arc::new(error))
  }

  /// Creates a loader failure from a plain message.
  pub fn message(message: impl Into<String>) -> Self {
    LoadError::Failed(Arc::new(MessageError(message.into())))
  }
}

#[derive(Debug)]
struct MessageError(String);

impl fmt::Display for MessageError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl StdError for MessageError {}

/// Reported by `check_invariants` when the resident weight exceeds the
/// configured maximum after maintenance has run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("resident weight {weighted_size} exceeds the maximum of {maximum}")]
pub struct CapacityViolation {
  pub weighted_size: u64,
  pub maximum: u64,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn load_error_message_is_displayed() {
    let err = LoadError::message("database offline");
    assert_eq!(err.to_string(), "loader failed: database offline");
    assert!(err.source().is_some());
  }

  #[test]
  fn load_error_clones_share_the_source() {
    let err = LoadError::failed(std::io::Error::new(std::io::ErrorKind::Other, "boom"));
    let clone = err.clone();
    match (err, clone) {
      (LoadError::Failed(a), LoadError::Failed(b)) => assert!(Arc::ptr_eq(&a, &b)),
      _ => panic!("expected Failed variants"),
    }
  }
}
