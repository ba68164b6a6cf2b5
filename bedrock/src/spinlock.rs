//! Spinlock.
//!
//! The one lock the rest of the kernel is built from. Acquisition disables
//! interrupts for the duration of the critical section (a held spinlock must
//! never be interrupted by a handler that could try to take it again) and
//! spins otherwise.
//!
//! Guards do **not** release on drop: the owner must call
//! [`SpinLockGuard::unlock`] explicitly, and dropping a live guard panics.
//! Lock leaks in kernel code are bugs worth crashing on.

use core::{
    cell::UnsafeCell,
    ops::{Deref, DerefMut},
    sync::atomic::{AtomicBool, Ordering},
};

use crate::interrupt::InterruptGuard;

/// The lock could not be acquired at this time because the operation would
/// otherwise block.
pub struct WouldBlock;

/// A mutual exclusion primitive useful for protecting shared data.
///
/// Each spinlock has a type parameter which represents the data that it is
/// protecting. The data can only be accessed through the guards returned
/// from [`lock`] and [`try_lock`], which guarantees that the data is only
/// ever accessed when the spinlock is held.
///
/// [`lock`]: Self::lock
/// [`try_lock`]: Self::try_lock
pub struct SpinLock<T: ?Sized> {
    locked: AtomicBool,
    data: UnsafeCell<T>,
}

unsafe impl<T: ?Sized + Send> Send for SpinLock<T> {}
unsafe impl<T: ?Sized + Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    /// Creates a new spinlock in an unlocked state ready for use.
    #[inline]
    pub const fn new(t: T) -> SpinLock<T> {
        SpinLock {
            locked: AtomicBool::new(false),
            data: UnsafeCell::new(t),
        }
    }

    /// Consumes this spinlock, returning the underlying data.
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized> SpinLock<T> {
    /// Acquires the spinlock, spinning until it is available.
    ///
    /// Interrupts stay disabled until the returned guard is unlocked.
    /// Re-locking a spinlock already held by the current CPU deadlocks.
    #[track_caller]
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        let guard = loop {
            let guard = InterruptGuard::new();
            if !self.locked.fetch_or(true, Ordering::SeqCst) {
                break guard;
            }
            drop(guard);
            core::hint::spin_loop();
        };

        SpinLockGuard {
            caller: core::panic::Location::caller(),
            lock: self,
            _intr: Some(guard),
        }
    }

    /// Attempts to acquire this lock without spinning.
    ///
    /// # Errors
    ///
    /// Returns [`WouldBlock`] if the lock is currently held.
    #[track_caller]
    pub fn try_lock(&self) -> Result<SpinLockGuard<'_, T>, WouldBlock> {
        let guard = InterruptGuard::new();
        if !self.locked.fetch_or(true, Ordering::SeqCst) {
            Ok(SpinLockGuard {
                caller: core::panic::Location::caller(),
                lock: self,
                _intr: Some(guard),
            })
        } else {
            Err(WouldBlock)
        }
    }
}

impl<T: Default> Default for SpinLock<T> {
    fn default() -> SpinLock<T> {
        SpinLock::new(Default::default())
    }
}

/// A scoped lock on a [`SpinLock`].
///
/// The lock must be explicitly released with [`unlock`]; dropping the guard
/// without unlocking panics.
///
/// [`unlock`]: Self::unlock
pub struct SpinLockGuard<'a, T: ?Sized + 'a> {
    caller: &'static core::panic::Location<'static>,
    lock: &'a SpinLock<T>,
    _intr: Option<InterruptGuard>,
}

unsafe impl<T: ?Sized + Sync> Sync for SpinLockGuard<'_, T> {}

impl<T: ?Sized> Deref for SpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T: ?Sized> SpinLockGuard<'_, T> {
    /// Releases the underlying [`SpinLock`] and re-enables interrupts.
    pub fn unlock(mut self) {
        self.lock.locked.store(false, Ordering::SeqCst);
        self._intr.take();
        core::mem::forget(self);
    }
}

impl<T: ?Sized> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        panic!(
            "`.unlock()` must be explicitly called before dropping SpinLockGuard.
The lock is held at {:?}.",
            self.caller
        );
    }
}
