//! Managed-execution lock
//!
//! Managed code runs while holding the lock. A native call gives it up for
//! exactly the duration of the foreign code and takes it back before any
//! managed state is touched again.

use parking_lot::{Mutex, MutexGuard};

/// The process-wide managed-execution lock
#[derive(Debug, Default)]
pub struct ExecutionLock {
    mutex: Mutex<()>,
}

impl ExecutionLock {
    /// Create an unlocked lock
    pub fn new() -> Self {
        ExecutionLock { mutex: Mutex::new(()) }
    }

    /// Block until the lock is held
    pub fn acquire(&self) -> ExecutionGuard<'_> {
        ExecutionGuard { guard: self.mutex.lock() }
    }

    /// Take the lock if it is free
    pub fn try_acquire(&self) -> Option<ExecutionGuard<'_>> {
        self.mutex.try_lock().map(|guard| ExecutionGuard { guard })
    }

    /// Whether some thread holds the lock
    pub fn is_locked(&self) -> bool {
        self.mutex.is_locked()
    }
}

/// Proof that the current thread holds the execution lock
#[derive(Debug)]
pub struct ExecutionGuard<'a> {
    guard: MutexGuard<'a, ()>,
}

impl ExecutionGuard<'_> {
    /// Run `f` with the lock released, reacquiring it afterwards (also when
    /// `f` unwinds).
    pub fn release_during<R>(&mut self, f: impl FnOnce() -> R) -> R {
        MutexGuard::unlocked(&mut self.guard, f)
    }
}
