//! Background work for the cache: the janitor that sweeps expired entries,
//! the notifier that calls the removal listener, and the timer wheel the
//! janitor advances.

pub(crate) mod janitor;
pub(crate) mod notifier;
pub(crate) mod timer;
