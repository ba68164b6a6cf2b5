//! Synchronization primitives.
//!
//! Two lock flavors exist in the kernel, and the split matters:
//!
//! | | [`SpinLock`] | [`Mutex`] |
//! |---|---|---|
//! | Waiting thread | Spins with interrupts off | Yields to the scheduler |
//! | Critical section | A few instructions | May do I/O |
//! | Usable from interrupt context | Yes | No |
//!
//! The spinlock guards short, non-blocking sections (the page-cache index,
//! the run queue, device registries). The mutex serializes long operations
//! that may themselves suspend: every vnode operation and the per-file-
//! system free-list mutations hold one.
//!
//! Both guards require an explicit `unlock()`; dropping a held guard is a
//! kernel bug and panics.

pub use bedrock::spinlock::{SpinLock, SpinLockGuard, WouldBlock};

pub mod atomic;
mod mutex;

pub use mutex::{Mutex, MutexGuard};
