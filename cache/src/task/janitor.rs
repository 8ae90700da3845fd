use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// The background thread that periodically sweeps expired entries and
/// retries eviction.
///
/// The tick closure holds only a weak reference to the cache and returns
/// false once the cache is gone, which ends the thread.
pub(crate) struct Janitor {
  handle: JoinHandle<()>,
  stop_flag: Arc<AtomicBool>,
}

impl Janitor {
  /// Spawns a new janitor thread that calls `tick` every `interval`.
  pub(crate) fn spawn<F>(interval: Duration, mut tick: F) -> io::Result<Self>
  where
    F: FnMut() -> bool + Send + 'static,
  {
    let stop_flag = Arc::new(AtomicBool::new(false));
    let stop = stop_flag.clone();

    let handle = thread::Builder::new()
      .name("weft-cache-janitor".into())
      .spawn(move || {
        tracing::debug!(?interval, "janitor started");
        loop {
          thread::park_timeout(interval);
          if stop.load(Ordering::Acquire) || !tick() {
            break;
          }
        }
        tracing::debug!("janitor stopped");
      })?;

    Ok(Self { handle, stop_flag })
  }

  /// Signals the janitor thread to stop and waits for it, unless called from
  /// the janitor thread itself.
  pub(crate) fn stop(self) {
    self.stop_flag.store(true, Ordering::Release);
    self.handle.thread().unpark();
    if self.handle.thread().id() == thread::current().id() {
      return;
    }
    if self.handle.join().is_err() {
      tracing::warn!("janitor thread terminated abnormally");
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::AtomicUsize;

  #[test]
  fn ticks_until_stopped() {
    let ticks = Arc::new(AtomicUsize::new(0));
    let counter = ticks.clone();
    let janitor = Janitor::spawn(Duration::from_millis(5), move || {
      counter.fetch_add(1, Ordering::SeqCst);
      true
    })
    .unwrap();
    thread::sleep(Duration::from_millis(60));
    janitor.stop();
    let seen = ticks.load(Ordering::SeqCst);
    assert!(seen > 0);
    thread::sleep(Duration::from_millis(20));
    assert_eq!(ticks.load(Ordering::SeqCst), seen);
  }

  #[test]
  fn exits_when_tick_reports_the_cache_gone() {
    let janitor = Janitor::spawn(Duration::from_millis(1), || false).unwrap();
    thread::sleep(Duration::from_millis(20));
    assert!(janitor.handle.is_finished());
    janitor.stop();
  }
}
