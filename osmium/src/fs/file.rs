//! Open files and descriptor tables.
//!
//! An [`OpenFile`] is one open-file description: the vnode, the access
//! mode, and the seek position. Descriptions are shared, not copied: a
//! `dup`ed descriptor and every descriptor inherited across `fork` refer
//! to the same description, so a seek through one moves them all. That is
//! why the description is handed around as an `Arc<OpenFile>` and the
//! position sits behind a lock inside it.
//!
//! The [`FdTable`] maps a process's small-integer descriptors to
//! descriptions. Descriptors are allocated lowest-first and the table
//! holds at most [`NFILES`] of them.

use alloc::{collections::BTreeMap, sync::Arc};

use num_enum::TryFromPrimitive;

use crate::{
    fs::{Vnode, VnodeKind},
    sync::SpinLock,
    KernelError,
};

bitflags::bitflags! {
    /// How an open file may be used.
    pub struct FileMode: u32 {
        /// Reads are permitted.
        const READ = 1 << 0;
        /// Writes are permitted.
        const WRITE = 1 << 1;
        /// Writes always go to the end of the file.
        const APPEND = 1 << 2;
    }
}

/// Anchor of a relative seek.
#[derive(Debug, Clone, Copy, Eq, PartialEq, TryFromPrimitive)]
#[repr(u32)]
pub enum Whence {
    /// From the beginning of the file.
    Set = 0,
    /// From the current position.
    Cur = 1,
    /// From the end of the file.
    End = 2,
}

/// An open-file description.
pub struct OpenFile {
    vnode: Vnode,
    mode: FileMode,
    pos: SpinLock<usize>,
}

impl OpenFile {
    /// Creates a description of `vnode` opened with `mode`, positioned at
    /// the start.
    pub fn new(vnode: Vnode, mode: FileMode) -> Self {
        Self {
            vnode,
            mode,
            pos: SpinLock::new(0),
        }
    }

    /// The vnode this description refers to.
    #[inline]
    pub fn vnode(&self) -> &Vnode {
        &self.vnode
    }

    /// The access mode.
    #[inline]
    pub fn mode(&self) -> FileMode {
        self.mode
    }

    /// The current seek position.
    pub fn pos(&self) -> usize {
        let pos = self.pos.lock();
        let p = *pos;
        pos.unlock();
        p
    }

    /// Moves the seek position.
    pub fn seek(&self, off: isize, whence: Whence) -> Result<usize, KernelError> {
        let base = match whence {
            Whence::Set => 0isize,
            Whence::Cur => self.pos() as isize,
            Whence::End => self.vnode.size() as isize,
        };
        let target = base.checked_add(off).ok_or(KernelError::InvalidArgument)?;
        if target < 0 {
            return Err(KernelError::InvalidArgument);
        }
        let mut pos = self.pos.lock();
        *pos = target as usize;
        pos.unlock();
        Ok(target as usize)
    }

    /// Reads from the current position, advancing it by the bytes read.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize, KernelError> {
        if !self.mode.contains(FileMode::READ) {
            return Err(KernelError::InvalidAccess);
        }
        if self.vnode.is_dir() {
            return Err(KernelError::IsDirectory);
        }
        let at = self.pos();
        let n = self.vnode.read(at, buf)?;
        let mut pos = self.pos.lock();
        *pos = at + n;
        pos.unlock();
        Ok(n)
    }

    /// Writes at the current position (or at end of file in append mode),
    /// advancing the position past the written bytes.
    pub fn write(&self, buf: &[u8]) -> Result<usize, KernelError> {
        if !self.mode.contains(FileMode::WRITE) {
            return Err(KernelError::InvalidAccess);
        }
        let at = if self.mode.contains(FileMode::APPEND) {
            self.vnode.size()
        } else {
            self.pos()
        };
        let n = self.vnode.write(at, buf)?;
        let mut pos = self.pos.lock();
        *pos = at + n;
        pos.unlock();
        Ok(n)
    }
}

/// Represents an index into a process's file descriptor table.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
pub struct FileDescriptor(pub i32);

/// Number of descriptor slots per process.
pub const NFILES: usize = 32;

/// A process's file descriptor table.
///
/// Cloning the table (as `fork` does) shares every open-file description
/// with the clone.
#[derive(Clone, Default)]
pub struct FdTable {
    files: BTreeMap<FileDescriptor, Arc<OpenFile>>,
}

impl FdTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self {
            files: BTreeMap::new(),
        }
    }

    /// Installs a description at the lowest free descriptor.
    ///
    /// # Errors
    /// Returns [`KernelError::TooManyOpenFile`] when all [`NFILES`] slots
    /// are taken.
    pub fn install(&mut self, file: Arc<OpenFile>) -> Result<FileDescriptor, KernelError> {
        for fd in 0..NFILES as i32 {
            let fd = FileDescriptor(fd);
            if let alloc::collections::btree_map::Entry::Vacant(slot) = self.files.entry(fd) {
                slot.insert(file);
                return Ok(fd);
            }
        }
        Err(KernelError::TooManyOpenFile)
    }

    /// Looks up the description behind a descriptor.
    pub fn get(&self, fd: FileDescriptor) -> Result<&Arc<OpenFile>, KernelError> {
        self.files.get(&fd).ok_or(KernelError::BadFileDescriptor)
    }

    /// Removes a descriptor, returning its description.
    pub fn remove(&mut self, fd: FileDescriptor) -> Result<Arc<OpenFile>, KernelError> {
        self.files.remove(&fd).ok_or(KernelError::BadFileDescriptor)
    }

    /// Number of open descriptors.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Whether `kind` may be opened with `mode`.
///
/// Directories are readable only: opening one for writing is refused with
/// [`KernelError::IsDirectory`].
pub fn openable(kind: VnodeKind, mode: FileMode) -> Result<(), KernelError> {
    if kind == VnodeKind::Directory && mode.intersects(FileMode::WRITE | FileMode::APPEND) {
        return Err(KernelError::IsDirectory);
    }
    Ok(())
}
