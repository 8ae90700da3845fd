use crate::error::LoadError;

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::thread::{self, Thread};

/// Computes values for keys that are missing or due for refresh.
///
/// Closures of the form `Fn(&K) -> Result<V, LoadError>` implement this trait
/// with the default `reload` and no bulk hook.
pub trait CacheLoader<K, V>: Send + Sync + 'static {
  /// Computes the value for `key`. An `Err` is returned to every caller
  /// attached to this load and is never cached.
  fn load(&self, key: &K) -> Result<V, LoadError>;

  /// Computes a replacement for a value that is due for refresh.
  fn reload(&self, key: &K, old_value: &V) -> Result<V, LoadError> {
    let _ = old_value;
    self.load(key)
  }

  /// Loads many keys in one call. Keys missing from the returned map are
  /// reported as [`LoadError::Missing`]. The default reports
  /// [`LoadError::BulkUnsupported`], which makes `get_all` load each key on
  /// its own.
  fn load_all(&self, keys: &[K]) -> Result<HashMap<K, V>, LoadError> {
    let _ = keys;
    Err(LoadError::BulkUnsupported)
  }
}

impl<K, V, F> CacheLoader<K, V> for F
where
  F: Fn(&K) -> Result<V, LoadError> + Send + Sync + 'static,
{
  fn load(&self, key: &K) -> Result<V, LoadError> {
    self(key)
  }
}

pub(crate) type AsyncLoadFn<K, V> =
  Arc<dyn Fn(K) -> BoxFuture<'static, Result<V, LoadError>> + Send + Sync>;

/// The cache-wide loader: a blocking `CacheLoader` or an async function.
pub(crate) enum Loader<K, V> {
  Sync(Arc<dyn CacheLoader<K, V>>),
  Async(AsyncLoadFn<K, V>),
}

impl<K, V> Clone for Loader<K, V> {
  fn clone(&self) -> Self {
    match self {
      Loader::Sync(loader) => Loader::Sync(loader.clone()),
      Loader::Async(f) => Loader::Async(f.clone()),
    }
  }
}

/// Represents a waiter in the queue for a `LoadFuture`.
enum Waiter {
  Sync(Thread),
  Async(Waker),
}

impl Waiter {
  fn wake(self) {
    match self {
      Waiter::Sync(thread) => thread.unpark(),
      Waiter::Async(waker) => waker.wake(),
    }
  }
}

enum State<V> {
  Computing,
  Complete(Result<Arc<V>, LoadError>),
}

struct Inner<V> {
  state: State<V>,
  waiters: VecDeque<Waiter>,
  // Callers currently interested in the outcome, the leader included.
  attached: usize,
}

/// The single-flight slot for one key.
///
/// Every caller that finds the key loading attaches to the same `LoadFuture`
/// and receives the same outcome. It completes exactly once.
pub(crate) struct LoadFuture<V> {
  inner: Mutex<Inner<V>>,
}

impl<V> LoadFuture<V> {
  /// Creates a future in the computing state with its leader attached.
  pub(crate) fn new() -> Self {
    Self {
      inner: Mutex::new(Inner {
        state: State::Computing,
        waiters: VecDeque::new(),
        attached: 1,
      }),
    }
  }

  /// Registers another interested caller. Called under the pending-load lock.
  pub(crate) fn attach(&self) {
    self.inner.lock().attached += 1;
  }

  pub(crate) fn detach(&self) {
    let mut inner = self.inner.lock();
    inner.attached = inner.attached.saturating_sub(1);
  }

  /// Stores the outcome and wakes every waiter. Returns false if the future
  /// was already complete, for instance because it was cancelled.
  pub(crate) fn complete(&self, result: Result<Arc<V>, LoadError>) -> bool {
    let waiters = {
      let mut inner = self.inner.lock();
      if !matches!(inner.state, State::Computing) {
        return false;
      }
      inner.state = State::Complete(result);
      std::mem::take(&mut inner.waiters)
    };
    for waiter in waiters {
      waiter.wake();
    }
    true
  }

  /// Cancels the load if exactly one caller is attached and it is still
  /// running. The outcome becomes [`LoadError::Cancelled`].
  pub(crate) fn try_cancel(&self) -> bool {
    let waiters = {
      let mut inner = self.inner.lock();
      if inner.attached != 1 || !matches!(inner.state, State::Computing) {
        return false;
      }
      inner.state = State::Complete(Err(LoadError::Cancelled));
      std::mem::take(&mut inner.waiters)
    };
    for waiter in waiters {
      waiter.wake();
    }
    true
  }

  #[cfg(test)]
  pub(crate) fn is_cancelled(&self) -> bool {
    matches!(self.inner.lock().state, State::Complete(Err(LoadError::Cancelled)))
  }

  pub(crate) fn is_complete(&self) -> bool {
    matches!(self.inner.lock().state, State::Complete(_))
  }

  /// Parks the calling thread until the outcome is known.
  pub(crate) fn wait(&self) -> Result<Arc<V>, LoadError> {
    loop {
      {
        let mut inner = self.inner.lock();
        if let State::Complete(result) = &inner.state {
          return result.clone();
        }
        inner.waiters.push_back(Waiter::Sync(thread::current()));
      }
      // Spurious wakeups loop back to the state check.
      thread::park();
    }
  }

  fn poll_outcome(&self, cx: &mut Context<'_>) -> Poll<Result<Arc<V>, LoadError>> {
    let mut inner = self.inner.lock();
    match &inner.state {
      State::Complete(result) => Poll::Ready(result.clone()),
      State::Computing => {
        let waker = cx.waker();
        let registered = inner
          .waiters
          .iter()
          .any(|w| matches!(w, Waiter::Async(existing) if existing.will_wake(waker)));
        if !registered {
          inner.waiters.push_back(Waiter::Async(waker.clone()));
        }
        Poll::Pending
      }
    }
  }
}

type Canceller = Box<dyn FnOnce() -> bool + Send>;

enum HandleState<V> {
  Ready(Result<Arc<V>, LoadError>),
  Pending(Arc<LoadFuture<V>>),
}

/// The future returned by the async cache's loading lookups.
///
/// It resolves exactly once to the loaded value or the load's error. All
/// callers of the same key share one underlying load.
#[must_use = "futures do nothing unless you .await or poll them"]
pub struct LoadHandle<V> {
  state: HandleState<V>,
  canceller: Option<Canceller>,
}

impl<V> LoadHandle<V> {
  pub(crate) fn ready(result: Result<Arc<V>, LoadError>) -> Self {
    Self {
      state: HandleState::Ready(result),
      canceller: None,
    }
  }

  pub(crate) fn pending(future: Arc<LoadFuture<V>>, canceller: Canceller) -> Self {
    Self {
      state: HandleState::Pending(future),
      canceller: Some(canceller),
    }
  }

  /// True once the outcome is available without waiting.
  pub fn is_complete(&self) -> bool {
    match &self.state {
      HandleState::Ready(_) => true,
      HandleState::Pending(future) => future.is_complete(),
    }
  }

  /// Parks the calling thread until the outcome is known.
  pub(crate) fn wait(self) -> Result<Arc<V>, LoadError> {
    match &self.state {
      HandleState::Ready(result) => result.clone(),
      HandleState::Pending(future) => future.wait(),
    }
  }

  /// Cancels the underlying load.
  ///
  /// Succeeds only while this handle is the sole caller attached to the
  /// load and the load has not finished. A cancelled load's eventual result
  /// is discarded and the key stays absent.
  pub fn cancel(mut self) -> bool {
    match self.canceller.take() {
      Some(cancel) if matches!(self.state, HandleState::Pending(_)) => cancel(),
      _ => false,
    }
  }
}

impl<V> Drop for LoadHandle<V> {
  fn drop(&mut self) {
    if let HandleState::Pending(future) = &self.state {
      future.detach();
    }
  }
}

impl<V> Future for LoadHandle<V> {
  type Output = Result<Arc<V>, LoadError>;

  fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
    match &self.state {
      HandleState::Ready(result) => Poll::Ready(result.clone()),
      HandleState::Pending(future) => future.poll_outcome(cx),
    }
  }
}

impl<V> fmt::Debug for LoadHandle<V> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("LoadHandle")
      .field("complete", &self.is_complete())
      .finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::time::Duration;

  #[test]
  fn waiters_receive_the_same_value() {
    let future = Arc::new(LoadFuture::new());
    let mut handles = Vec::new();
    for _ in 0..4 {
      future.attach();
      let future = future.clone();
      handles.push(thread::spawn(move || future.wait()));
    }
    thread::sleep(Duration::from_millis(20));
    assert!(future.complete(Ok(Arc::new(5))));
    for handle in handles {
      assert_eq!(*handle.join().unwrap().unwrap(), 5);
    }
  }

  #[test]
  fn completes_only_once() {
    let future = LoadFuture::new();
    assert!(future.complete(Ok(Arc::new(1))));
    assert!(!future.complete(Ok(Arc::new(2))));
    assert_eq!(*future.wait().unwrap(), 1);
  }

  #[test]
  fn cancel_requires_a_single_attached_caller() {
    let future: LoadFuture<u8> = LoadFuture::new();
    future.attach();
    assert!(!future.try_cancel());
    future.detach();
    assert!(future.try_cancel());
    assert!(future.is_cancelled());
    assert!(matches!(future.wait(), Err(LoadError::Cancelled)));
    assert!(!future.complete(Ok(Arc::new(1))));
  }

  #[test]
  fn handle_resolves_after_completion() {
    let future = Arc::new(LoadFuture::new());
    let handle = LoadHandle::pending(future.clone(), Box::new(|| false));
    assert!(!handle.is_complete());
    future.complete(Ok(Arc::new("v")));
    let value = futures_executor::block_on(handle).unwrap();
    assert_eq!(*value, "v");
  }

  #[test]
  fn errors_reach_every_waiter() {
    let future: Arc<LoadFuture<u8>> = Arc::new(LoadFuture::new());
    future.attach();
    let waiter = {
      let future = future.clone();
      thread::spawn(move || future.wait())
    };
    future.complete(Err(LoadError::Missing));
    assert!(matches!(waiter.join().unwrap(), Err(LoadError::Missing)));
  }
}
