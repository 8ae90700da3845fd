//! A concurrent, in-process cache with bounded size, expiry, loading and
//! refresh.
//!
//! # Features
//! - **High Concurrency**: Built with a sharded architecture to minimize lock contention.
//! - **Sync & Async**: [`Cache`] and [`AsyncCache`] are two facades over one
//!   core and convert into each other for free.
//! - **Non-Clone Support**: Stores values in an `Arc<V>`, avoiding `V: Clone` bounds.
//! - **Eviction**: `maximum_size` or `maximum_weight` bounds with an LRU or
//!   Window TinyLFU policy, or a custom [`CachePolicy`].
//! - **Expiry**: expire-after-write, expire-after-access or a per-entry
//!   [`Expiry`] hook, purged lazily on lookup and eagerly by a timer wheel.
//! - **Loading**: single-flight `get_with`/`get_or_load`, bulk `get_all` and
//!   refresh-after-write that serves the stale value while reloading.
//! - **Observability**: removal notifications with a [`RemovalCause`] and
//!   opt-in [`StatsSnapshot`] statistics.
//!
//! ```
//! use weft_cache::CacheBuilder;
//!
//! let cache = CacheBuilder::<&str, u32>::new().maximum_size(100).build().unwrap();
//! cache.insert("answer", 42);
//! assert_eq!(cache.get(&"answer").as_deref(), Some(&42));
//! ```

// Public modules that form the API
pub mod builder;
pub mod error;
pub mod expiry;
pub mod handles;
pub mod listener;
pub mod loader;
pub mod policy;
pub mod runtime;
pub mod stats;
pub mod time;
pub mod views;

// Internal, crate-only modules
mod entry;
mod shared;
mod store;
mod sync;
mod task;

// Re-export the primary user-facing types for convenience
pub use builder::{CacheBuilder, TimerWheelMode};
pub use error::{BuildError, CapacityViolation, LoadError};
pub use expiry::{Expiry, ExpiryEvent};
pub use handles::{AsyncCache, Cache};
pub use listener::{RemovalCause, RemovalListener};
pub use loader::{CacheLoader, LoadHandle};
pub use policy::{AdmissionDecision, CachePolicy, EvictionPolicy};
pub use runtime::{Executor, InlineExecutor, TaskSpawner, ThreadExecutor};
#[cfg(feature = "tokio")]
pub use runtime::TokioSpawner;
pub use stats::{ConcurrentStatsCounter, DisabledStatsCounter, StatsCounter, StatsSnapshot};
pub use time::{FakeTicker, SystemTicker, Ticker};
pub use views::{EvictionView, MapView, PolicyView};
