use std::{future::Future, pin::Pin, thread};

/// A trait for spawning a future onto an asynchronous runtime.
///
/// Async loads, async refreshes and `insert_future` run on the spawner.
pub trait TaskSpawner: Send + Sync + 'static {
  /// Spawns a type-erased future.
  fn spawn(&self, future: Pin<Box<dyn Future<Output = ()> + Send>>);
}

#[cfg(feature = "tokio")]
#[derive(Debug, Clone)]
pub struct TokioSpawner(tokio::runtime::Handle);

#[cfg(feature = "tokio")]
impl TokioSpawner {
  /// Creates a spawner that uses the current Tokio runtime context.
  /// Panics if called outside of a Tokio runtime.
  pub fn new() -> Self {
    Self(tokio::runtime::Handle::current())
  }

  /// Creates a spawner bound to an explicit runtime handle.
  pub fn with_handle(handle: tokio::runtime::Handle) -> Self {
    Self(handle)
  }
}

#[cfg(feature = "tokio")]
impl Default for TokioSpawner {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(feature = "tokio")]
impl TaskSpawner for TokioSpawner {
  fn spawn(&self, future: Pin<Box<dyn Future<Output = ()> + Send>>) {
    self.0.spawn(future);
  }
}

/// Runs blocking background work for the synchronous cache, currently the
/// reloads started by `refresh_after_write` and `refresh`.
pub trait Executor: Send + Sync + 'static {
  fn execute(&self, task: Box<dyn FnOnce() + Send>);
}

/// Runs each task on a freshly spawned OS thread. The default executor.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadExecutor;

impl Executor for ThreadExecutor {
  fn execute(&self, task: Box<dyn FnOnce() + Send>) {
    let spawned = thread::Builder::new()
      .name("weft-cache-refresh".into())
      .spawn(task);
    if let Err(err) = spawned {
      tracing::warn!(error = %err, "failed to spawn refresh thread");
    }
  }
}

/// Runs each task on the calling thread before returning.
///
/// Useful in tests, where a refresh should be complete by the time the
/// triggering lookup returns.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineExecutor;

impl Executor for InlineExecutor {
  fn execute(&self, task: Box<dyn FnOnce() + Send>) {
    task();
  }
}
