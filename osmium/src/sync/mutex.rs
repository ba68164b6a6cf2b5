//! Blocking mutex.

use core::{
    ops::{Deref, DerefMut},
    sync::atomic::{AtomicBool, Ordering},
};

use crossbeam_utils::Backoff;

use crate::sync::WouldBlock;

/// A mutual exclusion primitive useful for protecting shared data.
///
/// Unlike [`SpinLock`], a contended `Mutex` gives the CPU away: acquisition
/// is a suspension point, so a mutex must never be taken from interrupt
/// context and may be held across operations that themselves block (disk
/// I/O through the page cache, for example).
///
/// The data can only be accessed through the guard returned from [`lock`],
/// and the guard must be released with an explicit
/// [`unlock`](MutexGuard::unlock).
///
/// [`SpinLock`]: crate::sync::SpinLock
/// [`lock`]: Self::lock
pub struct Mutex<T: ?Sized> {
    locked: AtomicBool,
    data: core::cell::UnsafeCell<T>,
}

unsafe impl<T: ?Sized + Send> Send for Mutex<T> {}
unsafe impl<T: ?Sized + Send> Sync for Mutex<T> {}

impl<T> Mutex<T> {
    /// Creates a new mutex in an unlocked state ready for use.
    #[inline]
    pub const fn new(t: T) -> Mutex<T> {
        Mutex {
            locked: AtomicBool::new(false),
            data: core::cell::UnsafeCell::new(t),
        }
    }

    /// Consumes this mutex, returning the underlying data.
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized> Mutex<T> {
    /// Acquires the mutex, yielding the CPU until it is available.
    ///
    /// This is a suspension point: while the mutex is held elsewhere the
    /// current thread repeatedly offers the CPU to the scheduler, so other
    /// kernel threads make progress. Re-locking a mutex already held by
    /// the current thread deadlocks.
    #[track_caller]
    pub fn lock(&self) -> MutexGuard<'_, T> {
        let backoff = Backoff::new();
        while self.locked.fetch_or(true, Ordering::SeqCst) {
            if backoff.is_completed() {
                crate::thread::yield_now();
            } else {
                backoff.snooze();
            }
        }
        MutexGuard {
            caller: core::panic::Location::caller(),
            lock: self,
        }
    }

    /// Attempts to acquire this lock without blocking.
    ///
    /// # Errors
    ///
    /// Returns [`WouldBlock`] if the mutex is currently held.
    #[track_caller]
    pub fn try_lock(&self) -> Result<MutexGuard<'_, T>, WouldBlock> {
        if !self.locked.fetch_or(true, Ordering::SeqCst) {
            Ok(MutexGuard {
                caller: core::panic::Location::caller(),
                lock: self,
            })
        } else {
            Err(WouldBlock)
        }
    }
}

impl<T: Default> Default for Mutex<T> {
    fn default() -> Mutex<T> {
        Mutex::new(Default::default())
    }
}

/// A scoped lock on a [`Mutex`].
///
/// Must be released with [`unlock`](Self::unlock); dropping the guard
/// without unlocking panics.
pub struct MutexGuard<'a, T: ?Sized + 'a> {
    caller: &'static core::panic::Location<'static>,
    lock: &'a Mutex<T>,
}

unsafe impl<T: ?Sized + Sync> Sync for MutexGuard<'_, T> {}

impl<T: ?Sized> Deref for MutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T: ?Sized> MutexGuard<'_, T> {
    /// Releases the underlying [`Mutex`].
    pub fn unlock(self) {
        self.lock.locked.store(false, Ordering::SeqCst);
        core::mem::forget(self);
    }
}

impl<T: ?Sized> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        panic!(
            "`.unlock()` must be explicitly called before dropping MutexGuard.
The lock is held at {:?}.",
            self.caller
        );
    }
}
