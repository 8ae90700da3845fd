use crate::listener::{RemovalCause, RemovalListener};

use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};

use fibre::mpsc;

/// A message sent to the notifier task.
pub(crate) type Notification<K, V> = (K, Arc<V>, RemovalCause);

const NOTIFICATION_CHANNEL_CAPACITY: usize = 1024;

/// The background thread that calls the user's removal listener.
///
/// Notifications are delivered in the order they were queued. The thread
/// exits once every sender is dropped and the queue is drained.
pub(crate) struct Notifier {
  handle: JoinHandle<()>,
}

impl Notifier {
  pub(crate) fn spawn<K, V>(
    listener: Arc<dyn RemovalListener<K, V>>,
  ) -> io::Result<(Self, mpsc::BoundedSender<Notification<K, V>>)>
  where
    K: Send + 'static,
    V: Send + Sync + 'static,
  {
    let (tx, rx): (
      mpsc::BoundedSender<Notification<K, V>>,
      mpsc::BoundedReceiver<Notification<K, V>>,
    ) = mpsc::bounded(NOTIFICATION_CHANNEL_CAPACITY);

    let handle = thread::Builder::new()
      .name("weft-cache-notifier".into())
      .spawn(move || {
        while let Ok((key, value, cause)) = rx.recv() {
          let delivered =
            panic::catch_unwind(AssertUnwindSafe(|| listener.on_removal(key, value, cause)));
          if delivered.is_err() {
            tracing::warn!(%cause, "removal listener panicked");
          }
        }
        tracing::debug!("notifier stopped");
      })?;

    Ok((Self { handle }, tx))
  }

  pub(crate) fn thread_id(&self) -> ThreadId {
    self.handle.thread().id()
  }

  /// Waits for queued notifications to be delivered. The caller must have
  /// dropped its sender first.
  pub(crate) fn stop(self) {
    if self.thread_id() == thread::current().id() {
      return;
    }
    if self.handle.join().is_err() {
      tracing::warn!("notifier thread terminated abnormally");
    }
  }
}
