//! Expiration modes and the variable per-entry expiry hook.

use crate::entry::CacheEntry;
use crate::time::{deadline_after, duration_to_nanos, remaining, NEVER};

use std::sync::Arc;
use std::time::Duration;

/// The point in an entry's life at which an [`Expiry`] hook is consulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExpiryEvent {
  /// The key had no live mapping and one was created.
  Create,
  /// An existing mapping's value was replaced.
  Update,
  /// A lookup returned the mapping.
  Read,
}

/// A per-entry expiry policy.
///
/// The hook is a pure function of the event, the mapping, the current ticker
/// reading and the entry's remaining lifetime before the event. It returns the
/// new remaining lifetime, `None` meaning the entry does not expire.
///
/// `current` is `None` on [`ExpiryEvent::Create`] and for entries without a
/// deadline; otherwise it is the remaining time, clamped at zero. Returning
/// `current` unchanged keeps the existing deadline.
pub trait Expiry<K, V>: Send + Sync + 'static {
  fn expire_after(
    &self,
    event: ExpiryEvent,
    key: &K,
    value: &V,
    now: u64,
    current: Option<Duration>,
  ) -> Option<Duration>;
}

impl<K, V, F> Expiry<K, V> for F
where
  F: Fn(ExpiryEvent, &K, &V, u64, Option<Duration>) -> Option<Duration> + Send + Sync + 'static,
{
  fn expire_after(
    &self,
    event: ExpiryEvent,
    key: &K,
    value: &V,
    now: u64,
    current: Option<Duration>,
  ) -> Option<Duration> {
    self(event, key, value, now, current)
  }
}

/// How the cache assigns deadlines. Fixed and variable expiry are exclusive.
pub(crate) enum ExpiryConfig<K, V> {
  None,
  Fixed {
    after_write: Option<Duration>,
    after_access: Option<Duration>,
  },
  Variable(Arc<dyn Expiry<K, V>>),
}

impl<K: 'static, V: 'static> ExpiryConfig<K, V> {
  pub(crate) fn is_enabled(&self) -> bool {
    !matches!(self, ExpiryConfig::None)
  }

  pub(crate) fn after_write(&self) -> Option<Duration> {
    match self {
      ExpiryConfig::Fixed { after_write, .. } => *after_write,
      _ => None,
    }
  }

  pub(crate) fn after_access(&self) -> Option<Duration> {
    match self {
      ExpiryConfig::Fixed { after_access, .. } => *after_access,
      _ => None,
    }
  }

  /// The idle window in nanos, used by `CacheEntry::is_expired`.
  #[inline]
  pub(crate) fn idle_nanos(&self) -> Option<u64> {
    self.after_access().map(duration_to_nanos)
  }

  pub(crate) fn is_variable(&self) -> bool {
    matches!(self, ExpiryConfig::Variable(_))
  }

  /// Assigns the write-side deadline of a freshly constructed entry.
  ///
  /// `previous` is the entry being replaced, if any, which turns the event
  /// into an update for the variable hook.
  pub(crate) fn on_write(
    &self,
    key: &K,
    entry: &CacheEntry<V>,
    previous: Option<&CacheEntry<V>>,
    now: u64,
  ) {
    let deadline = match self {
      ExpiryConfig::None => NEVER,
      ExpiryConfig::Fixed { after_write, .. } => match after_write {
        Some(ttl) => deadline_after(now, *ttl),
        None => NEVER,
      },
      ExpiryConfig::Variable(hook) => {
        let (event, current) = match previous {
          Some(old) => (ExpiryEvent::Update, remaining(old.expires_at(), now)),
          None => (ExpiryEvent::Create, None),
        };
        match hook.expire_after(event, key, entry.value_ref(), now, current) {
          Some(duration) => deadline_after(now, duration),
          None => NEVER,
        }
      }
    };
    entry.set_expires_at(deadline);
  }

  /// Applies read-side bookkeeping. Returns the new effective deadline when it
  /// moved earlier than the entry's scheduled timer, so the caller can arm a
  /// timer for it.
  pub(crate) fn on_read(&self, key: &K, entry: &CacheEntry<V>, now: u64) -> Option<u64> {
    match self {
      ExpiryConfig::None => None,
      ExpiryConfig::Fixed { after_access, .. } => {
        if after_access.is_some() {
          entry.touch(now);
        }
        // Idle deadlines only move later; the fired timer reschedules itself.
        None
      }
      ExpiryConfig::Variable(hook) => {
        let current = remaining(entry.expires_at(), now);
        let deadline = match hook.expire_after(ExpiryEvent::Read, key, entry.value_ref(), now, current) {
          Some(duration) => deadline_after(now, duration),
          None => NEVER,
        };
        entry.touch(now);
        let previous = entry.expires_at();
        if deadline == previous {
          return None;
        }
        entry.set_expires_at(deadline);
        (deadline < previous).then_some(deadline)
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn fixed(after_write: Option<u64>, after_access: Option<u64>) -> ExpiryConfig<u32, u32> {
    ExpiryConfig::Fixed {
      after_write: after_write.map(Duration::from_nanos),
      after_access: after_access.map(Duration::from_nanos),
    }
  }

  fn entry(now: u64) -> CacheEntry<u32> {
    CacheEntry::new(Arc::new(1), 1, 1, now, now)
  }

  #[test]
  fn after_write_sets_deadline_from_write_time() {
    let config = fixed(Some(50), None);
    let e = entry(10);
    config.on_write(&1, &e, None, 10);
    assert_eq!(e.expires_at(), 60);
  }

  #[test]
  fn after_access_resets_on_read() {
    let config = fixed(None, Some(50));
    let e = entry(0);
    config.on_write(&1, &e, None, 0);
    assert_eq!(e.expires_at(), NEVER);
    config.on_read(&1, &e, 30);
    assert!(!e.is_expired(70, config.idle_nanos()));
    assert!(e.is_expired(80, config.idle_nanos()));
  }

  #[test]
  fn variable_hook_sees_each_event() {
    let hook = |event: ExpiryEvent, _: &u32, _: &u32, _: u64, current: Option<Duration>| match event {
      ExpiryEvent::Create => Some(Duration::from_nanos(100)),
      ExpiryEvent::Update => current.map(|d| d * 2),
      ExpiryEvent::Read => current,
    };
    let config: ExpiryConfig<u32, u32> = ExpiryConfig::Variable(Arc::new(hook));

    let first = entry(0);
    config.on_write(&1, &first, None, 0);
    assert_eq!(first.expires_at(), 100);

    // Reading with "keep current" leaves the deadline alone.
    assert_eq!(config.on_read(&1, &first, 40), None);
    assert_eq!(first.expires_at(), 100);

    // Update at t=40 sees 60ns remaining and doubles it.
    let second = entry(40);
    config.on_write(&1, &second, Some(&first), 40);
    assert_eq!(second.expires_at(), 160);
  }

  #[test]
  fn variable_hook_shortening_reports_new_deadline() {
    let hook = |event: ExpiryEvent, _: &u32, _: &u32, _: u64, _: Option<Duration>| match event {
      ExpiryEvent::Read => Some(Duration::from_nanos(5)),
      _ => Some(Duration::from_nanos(1_000)),
    };
    let config: ExpiryConfig<u32, u32> = ExpiryConfig::Variable(Arc::new(hook));
    let e = entry(0);
    config.on_write(&1, &e, None, 0);
    assert_eq!(config.on_read(&1, &e, 10), Some(15));
  }

  #[test]
  fn variable_hook_returning_none_disables_expiry() {
    let hook = |_: ExpiryEvent, _: &u32, _: &u32, _: u64, _: Option<Duration>| None;
    let config: ExpiryConfig<u32, u32> = ExpiryConfig::Variable(Arc::new(hook));
    let e = entry(0);
    config.on_write(&1, &e, None, 0);
    assert_eq!(e.expires_at(), NEVER);
  }
}
