use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::collections::VecDeque;
use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll, Waker};

/// A hybrid reader-writer lock that uses a fast, blocking `parking_lot::RwLock`
/// internally but provides a non-thread-blocking `async` interface for acquiring
/// a write lock under contention.
///
/// Every guard wakes one queued async writer when it is released, whether it
/// was a reader or a writer that held the lock.
#[derive(Debug, Default)]
pub(crate) struct HybridRwLock<T> {
  inner: RwLock<T>,
  writer_waiters: parking_lot::Mutex<VecDeque<Waker>>,
  // Number of queued async writers, checked before touching the queue.
  queued: AtomicUsize,
}

impl<T> HybridRwLock<T> {
  pub fn new(data: T) -> Self {
    Self {
      inner: RwLock::new(data),
      writer_waiters: parking_lot::Mutex::new(VecDeque::new()),
      queued: AtomicUsize::new(0),
    }
  }

  /// Acquires a shared read lock (blocking).
  pub fn read(&self) -> HybridRwLockReadGuard<'_, T> {
    HybridRwLockReadGuard {
      lock: self,
      guard: Some(self.inner.read()),
    }
  }

  /// Acquires the write lock synchronously (blocking).
  pub fn write(&self) -> HybridRwLockWriteGuard<'_, T> {
    HybridRwLockWriteGuard {
      lock: self,
      guard: Some(self.inner.write()),
    }
  }

  /// Attempts the write lock without blocking. Used by background sweeps.
  pub fn try_write(&self) -> Option<HybridRwLockWriteGuard<'_, T>> {
    self.inner.try_write().map(|guard| HybridRwLockWriteGuard {
      lock: self,
      guard: Some(guard),
    })
  }

  /// Acquires the write lock asynchronously.
  ///
  /// This will not block the OS thread. If the lock is contended, the future
  /// will yield until it is woken up.
  pub fn write_async(&self) -> WriteFuture<'_, T> {
    WriteFuture { lock: self }
  }

  fn wake_one(&self) {
    if self.queued.load(Ordering::SeqCst) == 0 {
      return;
    }
    let waker = {
      let mut waiters = self.writer_waiters.lock();
      let waker = waiters.pop_front();
      if waker.is_some() {
        self.queued.fetch_sub(1, Ordering::SeqCst);
      }
      waker
    };
    if let Some(waker) = waker {
      waker.wake();
    }
  }
}

/// RAII read guard. Releasing it may hand the lock to a queued async writer.
pub(crate) struct HybridRwLockReadGuard<'a, T> {
  lock: &'a HybridRwLock<T>,
  guard: Option<RwLockReadGuard<'a, T>>,
}

impl<'a, T> Drop for HybridRwLockReadGuard<'a, T> {
  fn drop(&mut self) {
    // Release the inner lock before waking anyone.
    drop(self.guard.take());
    self.lock.wake_one();
  }
}

impl<'a, T> Deref for HybridRwLockReadGuard<'a, T> {
  type Target = T;
  fn deref(&self) -> &Self::Target {
    match &self.guard {
      Some(guard) => guard,
      None => unreachable!("read guard used after release"),
    }
  }
}

/// RAII write guard. Its `Drop` wakes the next pending async writer.
pub(crate) struct HybridRwLockWriteGuard<'a, T> {
  lock: &'a HybridRwLock<T>,
  guard: Option<RwLockWriteGuard<'a, T>>,
}

impl<'a, T> Drop for HybridRwLockWriteGuard<'a, T> {
  fn drop(&mut self) {
    drop(self.guard.take());
    self.lock.wake_one();
  }
}

// Allow the guard to be used like a normal `&mut T`.
impl<'a, T> Deref for HybridRwLockWriteGuard<'a, T> {
  type Target = T;
  fn deref(&self) -> &Self::Target {
    match &self.guard {
      Some(guard) => guard,
      None => unreachable!("write guard used after release"),
    }
  }
}

impl<'a, T> DerefMut for HybridRwLockWriteGuard<'a, T> {
  fn deref_mut(&mut self) -> &mut Self::Target {
    match &mut self.guard {
      Some(guard) => guard,
      None => unreachable!("write guard used after release"),
    }
  }
}

/// The `Future` returned by `HybridRwLock::write_async()`.
#[must_use = "futures do nothing unless you .await or poll them"]
pub(crate) struct WriteFuture<'a, T> {
  lock: &'a HybridRwLock<T>,
}

impl<'a, T> Future for WriteFuture<'a, T> {
  type Output = HybridRwLockWriteGuard<'a, T>;

  fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
    let lock = self.lock;
    // Fast path: Try to acquire the lock without parking.
    if let Some(guard) = lock.try_write() {
      return Poll::Ready(guard);
    }

    // Slow path: The lock is contended. Park this task.
    let mut waiters = lock.writer_waiters.lock();
    if !waiters.iter().any(|w| w.will_wake(cx.waker())) {
      waiters.push_back(cx.waker().clone());
      lock.queued.fetch_add(1, Ordering::SeqCst);
    }

    // The holder may have released between the first attempt and queueing.
    // Re-check so the wakeup is not lost.
    if let Some(guard) = lock.inner.try_write() {
      if let Some(pos) = waiters.iter().position(|w| w.will_wake(cx.waker())) {
        waiters.remove(pos);
        lock.queued.fetch_sub(1, Ordering::SeqCst);
      }
      drop(waiters);
      return Poll::Ready(HybridRwLockWriteGuard {
        lock,
        guard: Some(guard),
      });
    }

    Poll::Pending
  }
}

/// Yields to the executor once. Used to retry a `try_lock` without
/// blocking the worker thread.
pub(crate) fn yield_now() -> YieldNow {
  YieldNow { yielded: false }
}

#[must_use = "futures do nothing unless you .await or poll them"]
pub(crate) struct YieldNow {
  yielded: bool,
}

impl Future for YieldNow {
  type Output = ();

  fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
    if self.yielded {
      return Poll::Ready(());
    }
    self.yielded = true;
    cx.waker().wake_by_ref();
    Poll::Pending
  }
}
