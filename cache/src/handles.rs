//! The user-facing cache handles.
//!
//! [`Cache`] and [`AsyncCache`] are thin, cloneable handles over the same
//! shared core. Converting between them is free, so a program can mix
//! blocking and `async` callers on one cache.

mod futures;
mod sync;

pub use futures::AsyncCache;
pub use sync::Cache;
