//! # Osmium: a teaching-grade UNIX kernel core.
//!
//! Osmium is the machine-independent core of a small UNIX-like kernel for a
//! 32-bit x86 machine booted by a multiboot loader. It provides processes
//! with preemptable kernel threads, a demand-paged virtual address space
//! with copy-on-write `fork` semantics, a block-backed page cache, and a
//! vnode-based virtual file system. The System-V-style on-disk file system
//! that plugs into the VFS lives in the sibling [`s5fs`] crate.
//!
//! The crate is organized around three tightly coupled subsystems:
//!
//! 1. **Virtual memory** ([`mm`]): per-process address-space maps
//!    ([`mm::vmmap`]), polymorphic memory objects with shadow-object chains
//!    for copy-on-write ([`mm::mmobj`]), a unified page cache
//!    ([`mm::pframe`]), and the page-fault resolution path ([`mm::fault`]).
//! 2. **The VFS** ([`fs`]): vnodes, open files, descriptor tables, and
//!    path resolution over any file system implementing the
//!    [`fs::traits::FileSystem`] contract.
//! 3. **The glue**: a fault on a mapped region resolves through
//!    vnode → memory object → page frame, and [`proc::Process::fork`]
//!    splits every private region into two shadow chains.
//!
//! The hardware floor (boot protocol, addressing, trap frames, the
//! spinlock) comes from the [`bedrock`] crate. Physical frame allocation,
//! the hardware page-table walker, and the context-switch primitive are
//! outside this tree; the kernel reaches them through
//! [`mm::Page::new`], [`mm::page_table::PageTable`], and
//! [`thread::Context`].
//!
//! [`s5fs`]: ../s5fs/index.html
#![cfg_attr(not(test), no_std)]
#![deny(rustdoc::broken_intra_doc_links)]

extern crate alloc;

#[allow(unused_imports)]
#[macro_use]
extern crate bedrock;

pub use bedrock::addressing;

pub mod dev;
pub mod fs;
pub mod mm;
pub mod proc;
pub mod sync;
pub mod syscall;
pub mod thread;
pub mod util;

#[cfg(test)]
mod testutil;

/// Enum representing errors that can occur during a kernel operation.
///
/// Every kernel entry point reports failure as one of these values; the
/// syscall layer turns them into the conventional negated UNIX error
/// numbers on the way back to user space. Corruption of on-disk structures
/// is the one kind of error that is not returned: detection sites panic.
#[derive(Debug, Eq, PartialEq)]
pub enum KernelError {
    /// Operation is not permitted. (EPERM)
    OperationNotPermitted,
    /// No such file or directory. (ENOENT)
    NoSuchEntry,
    /// IO Error. (EIO)
    IOError,
    /// Bad file descriptor. (EBADF)
    BadFileDescriptor,
    /// Out of memory. (ENOMEM)
    NoMemory,
    /// Permission denied. (EACCES)
    InvalidAccess,
    /// Bad address. (EFAULT)
    BadAddress,
    /// Device or resource busy. (EBUSY)
    Busy,
    /// File exists. (EEXIST)
    FileExist,
    /// No such device. (ENXIO)
    NoSuchDevice,
    /// Not a directory. (ENOTDIR)
    NotDirectory,
    /// Is a directory. (EISDIR)
    IsDirectory,
    /// Invalid argument. (EINVAL)
    InvalidArgument,
    /// Too many open files. (EMFILE)
    TooManyOpenFile,
    /// No space left on device. (ENOSPC)
    NoSpace,
    /// File name too long. (ENAMETOOLONG)
    NameTooLong,
    /// Directory not empty. (ENOTEMPTY)
    DirectoryNotEmpty,
    /// File system is corrupted. (EFSCORRUPTED)
    FilesystemCorrupted(&'static str),
    /// Operation is not supported. (ENOTSUPP)
    NotSupportedOperation,
}

impl KernelError {
    /// Converts the [`KernelError`] into the corresponding negated errno,
    /// cast to `usize` for use as a system-call return value.
    pub fn into_usize(self) -> usize {
        (match self {
            KernelError::OperationNotPermitted => -1isize,
            KernelError::NoSuchEntry => -2,
            KernelError::IOError => -5,
            KernelError::BadFileDescriptor => -9,
            KernelError::NoMemory => -12,
            KernelError::InvalidAccess => -13,
            KernelError::BadAddress => -14,
            KernelError::Busy => -16,
            KernelError::FileExist => -17,
            KernelError::NoSuchDevice => -6,
            KernelError::NotDirectory => -20,
            KernelError::IsDirectory => -21,
            KernelError::InvalidArgument => -22,
            KernelError::TooManyOpenFile => -24,
            KernelError::NoSpace => -28,
            KernelError::NameTooLong => -36,
            KernelError::DirectoryNotEmpty => -39,
            KernelError::FilesystemCorrupted(_) => -117,
            KernelError::NotSupportedOperation => -524,
        }) as usize
    }
}

/// The given `isize` does not indicate a [`KernelError`].
#[derive(Debug, Eq, PartialEq)]
pub struct TryFromError {
    e: isize,
}

impl TryFrom<isize> for KernelError {
    type Error = TryFromError;

    fn try_from(value: isize) -> Result<Self, Self::Error> {
        match value {
            -1 => Ok(Self::OperationNotPermitted),
            -2 => Ok(Self::NoSuchEntry),
            -5 => Ok(Self::IOError),
            -6 => Ok(Self::NoSuchDevice),
            -9 => Ok(Self::BadFileDescriptor),
            -12 => Ok(Self::NoMemory),
            -13 => Ok(Self::InvalidAccess),
            -14 => Ok(Self::BadAddress),
            -16 => Ok(Self::Busy),
            -17 => Ok(Self::FileExist),
            -20 => Ok(Self::NotDirectory),
            -21 => Ok(Self::IsDirectory),
            -22 => Ok(Self::InvalidArgument),
            -24 => Ok(Self::TooManyOpenFile),
            -28 => Ok(Self::NoSpace),
            -36 => Ok(Self::NameTooLong),
            -39 => Ok(Self::DirectoryNotEmpty),
            -117 => Ok(Self::FilesystemCorrupted("")),
            -524 => Ok(Self::NotSupportedOperation),
            e => Err(TryFromError { e }),
        }
    }
}
