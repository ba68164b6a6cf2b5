//! The hardware-facing floor of the kernel.
//!
//! This crate collects everything the kernel core consumes from the machine
//! but does not itself implement: the 32-bit x86 address-space layout, the
//! multiboot hand-off structures, trap frames and the page-fault error code,
//! interrupt nesting, and the spinlock that every higher-level lock is built
//! from.
//!
//! Nothing in here walks a page table, touches a disk, or schedules a
//! thread. The kernel core ([`osmium`]) builds those on top of the types and
//! primitives defined here.
//!
//! [`osmium`]: ../osmium/index.html
#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![deny(missing_docs, rustdoc::broken_intra_doc_links)]

extern crate alloc;

#[macro_use]
pub mod kprint;
pub mod addressing;
pub mod boot;
pub mod interrupt;
pub mod spinlock;

/// Number of CPUs the kernel runs on.
///
/// The kernel is uniprocessor: kernel threads are cooperatively scheduled
/// with respect to each other and only interrupts preempt them.
pub const MAX_CPU: usize = 1;
