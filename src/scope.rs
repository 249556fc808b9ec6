//! Cancellation and hand-off primitives shared by the supervisor threads.
use std::{
    fmt, mem,
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use crate::constants::CANCEL_CHECK_INTERVAL;

type Callback = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct LatchState {
    released: bool,
    callbacks: Vec<Callback>,
}

/// One-shot flag that any number of threads can block on.
///
/// Once released it stays released. Callbacks registered with
/// [`Latch::on_release`] run exactly once, on the releasing thread, or
/// immediately if the latch was already released.
#[derive(Clone, Default)]
pub struct Latch {
    inner: Arc<(Mutex<LatchState>, Condvar)>,
}

impl Latch {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, LatchState> {
        self.inner.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Releases the latch. Returns `false` if it was already released.
    pub fn release(&self) -> bool {
        let callbacks = {
            let mut state = self.state();
            if state.released {
                return false;
            }
            state.released = true;
            self.inner.1.notify_all();
            mem::take(&mut state.callbacks)
        };

        for callback in callbacks {
            callback();
        }
        true
    }

    pub fn is_released(&self) -> bool {
        self.state().released
    }

    /// Blocks until the latch is released.
    pub fn wait(&self) {
        let guard = self.state();
        let _guard = self
            .inner
            .1
            .wait_while(guard, |state| !state.released)
            .unwrap_or_else(PoisonError::into_inner);
    }

    /// Blocks for at most `timeout`. Returns `true` if the latch was released.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let guard = self.state();
        let (guard, _) = self
            .inner
            .1
            .wait_timeout_while(guard, timeout, |state| !state.released)
            .unwrap_or_else(PoisonError::into_inner);
        guard.released
    }

    /// Registers `callback` to run when the latch is released.
    pub fn on_release<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut state = self.state();
            if !state.released {
                state.callbacks.push(Box::new(callback));
                return;
            }
        }
        callback();
    }
}

impl fmt::Debug for Latch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Latch")
            .field("released", &self.is_released())
            .finish()
    }
}

/// Cancellation scope shared by every background activity of one supervisor.
///
/// Cancelling is idempotent: only the first call has any effect.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    latch: Latch,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels the scope. Returns `true` for the call that actually cancelled it.
    pub fn cancel(&self) -> bool {
        self.latch.release()
    }

    pub fn is_cancelled(&self) -> bool {
        self.latch.is_released()
    }

    /// Blocks until the scope is cancelled.
    pub fn cancelled(&self) {
        self.latch.wait();
    }

    /// Sleeps for `timeout` unless cancelled first. Returns `true` on cancellation.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.latch.wait_timeout(timeout)
    }

    /// Runs `callback` once the scope is cancelled.
    pub fn on_cancel<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.latch.on_release(callback);
    }
}

/// Single-slot hand-off between one producer and one consumer.
///
/// A `put` never blocks; if the previous value was never taken it is replaced
/// and handed back to the caller, so the slot always holds the latest value.
#[derive(Debug)]
pub struct Slot<T> {
    inner: Arc<(Mutex<Option<T>>, Condvar)>,
}

impl<T> Clone for Slot<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Self {
            inner: Arc::new((Mutex::new(None), Condvar::new())),
        }
    }
}

impl<T> Slot<T> {
    pub fn new() -> Self {
        Self::default()
    }

    fn value(&self) -> MutexGuard<'_, Option<T>> {
        self.inner.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stores `value`, returning the unread value it displaced, if any.
    pub fn put(&self, value: T) -> Option<T> {
        let displaced = self.value().replace(value);
        self.inner.1.notify_all();
        displaced
    }

    /// Blocks until a value is available and takes it.
    pub fn take(&self) -> T {
        let guard = self.value();
        let mut guard = self
            .inner
            .1
            .wait_while(guard, |value| value.is_none())
            .unwrap_or_else(PoisonError::into_inner);
        match guard.take() {
            Some(value) => value,
            None => unreachable!("wait_while returned with an empty slot"),
        }
    }

    /// Takes a value if one arrives within `timeout`.
    pub fn take_timeout(&self, timeout: Duration) -> Option<T> {
        let guard = self.value();
        let (mut guard, _) = self
            .inner
            .1
            .wait_timeout_while(guard, timeout, |value| value.is_none())
            .unwrap_or_else(PoisonError::into_inner);
        guard.take()
    }

    /// Takes a value, giving up once `scope` is cancelled.
    pub fn take_until(&self, scope: &Scope) -> Option<T> {
        loop {
            if let Some(value) = self.take_timeout(CANCEL_CHECK_INTERVAL) {
                return Some(value);
            }
            if scope.is_cancelled() {
                return None;
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.value().is_none()
    }
}
