//! The scheduler interface.
//!
//! The run queue is the hand-off point between the core and the scheduler
//! proper: the core enqueues runnable threads here and the dispatch loop in
//! the boot layer drains it.

use crate::thread::{Thread, RUN_QUEUE};

/// Marks a thread runnable.
///
/// The thread will be picked up by the dispatch loop at its next turn. The
/// caller keeps ownership of the [`Thread`] (its process owns it); only the
/// thread id travels through the queue.
pub fn make_runnable(thread: &Thread) {
    let mut queue = RUN_QUEUE.lock();
    queue.push_back(thread.tid);
    queue.unlock();
}

/// Whether a thread id is currently queued for dispatch.
pub fn is_runnable(tid: u64) -> bool {
    let queue = RUN_QUEUE.lock();
    let queued = queue.iter().any(|&t| t == tid);
    queue.unlock();
    queued
}
