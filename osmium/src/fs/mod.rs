//! The virtual file system.
//!
//! The VFS gives the rest of the kernel one vocabulary for every file
//! system: **vnodes**. A vnode is the in-memory handle for one file-system
//! object, be it a regular file, a directory, or a device node, unique per
//! (file system, inode number). File systems implement
//! [`traits::FileSystem`] and [`traits::Vnode`]; the VFS supplies path
//! resolution ([`path`]), open-file descriptions and descriptor tables
//! ([`file`]), and the handle types everything else passes around.
//!
//! ## Vnode lifetime
//!
//! `vget`, that is [`traits::FileSystem::get_vnode`], returns *the* vnode for an
//! inode, loading it on first use; two lookups of the same file yield
//! handles to the same vnode, observable with [`Vnode::ptr_eq`]. Handles
//! are reference counted; when the last handle to an unlinked file goes
//! away, the file system frees the inode and its blocks.
//!
//! ## Locking
//!
//! Every vnode carries an operation mutex: each vnode-operation entry
//! point acquires it on entry and releases it on every exit path, and the
//! helper layers below assume the lock is held rather than taking it
//! themselves. The page hooks ([`traits::Vnode::fillpage`] and friends)
//! are the one exception: the page cache invokes them on behalf of the
//! operation already holding the lock, or of the fault path, where the
//! cache's per-frame busy flag serializes the work. Path walks take
//! parent before child; an operation that must hold two vnodes acquires
//! their mutexes in ascending inode order.

use alloc::{string::String, sync::Arc};
use core::num::NonZeroU32;

use crate::{
    dev::{self, DevId},
    mm::mmobj::MemObject,
    KernelError,
};

pub mod file;
pub mod path;

use traits::Vnode as _;

/// Identity of a mounted file system instance.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd)]
pub struct FsId(u64);

static NEXT_FSID: crate::sync::atomic::AtomicU64 = crate::sync::atomic::AtomicU64::new(1);

impl FsId {
    /// Allocates a fresh file-system identity. Called once per mount.
    pub fn alloc() -> Self {
        FsId(NEXT_FSID.fetch_add(1))
    }

    /// The raw value.
    #[inline]
    pub fn into_u64(self) -> u64 {
        self.0
    }
}

/// Represents a unique identifier for an inode in a file system.
///
/// Inode numbers start at 1; the zero encoding is reserved for "no inode"
/// (a free directory entry slot on disk), which is why the niche of
/// [`NonZeroU32`] fits exactly.
#[repr(transparent)]
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Debug)]
pub struct InodeNumber(NonZeroU32);

impl InodeNumber {
    /// Creates an [`InodeNumber`] if the given value is not zero.
    pub const fn new(n: u32) -> Option<Self> {
        match NonZeroU32::new(n) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    /// Returns the contained value as a u32.
    #[inline]
    pub fn into_u32(&self) -> u32 {
        self.0.get()
    }
}

/// What kind of object a vnode is.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum VnodeKind {
    /// A regular file.
    Regular,
    /// A directory.
    Directory,
    /// A character device node.
    CharDevice(DevId),
    /// A block device node.
    BlockDevice(DevId),
}

/// File metadata, as returned by `stat`.
#[derive(Debug, Clone, PartialEq)]
pub struct Stat {
    /// Inode number.
    pub ino: u32,
    /// Object kind.
    pub kind: VnodeKind,
    /// Size in bytes.
    pub size: usize,
    /// Link count. For a live vnode this is the on-disk count plus one.
    pub nlink: usize,
    /// Number of file-system blocks allocated to the object, indirect
    /// blocks included.
    pub blocks: usize,
}

/// One directory entry, as returned by `readdir`.
#[derive(Debug, Clone)]
pub struct DirEntry {
    /// Inode the entry points at.
    pub ino: InodeNumber,
    /// Entry name.
    pub name: String,
}

/// Defines the contracts between the VFS and a file system.
pub mod traits {
    use super::{DirEntry, InodeNumber, Stat, Vnode as VnodeHandle, VnodeKind};
    use crate::{fs::FsId, KernelError};

    /// A mounted file system.
    pub trait FileSystem: Send + Sync {
        /// This instance's identity.
        fn fsid(&self) -> FsId;

        /// The root directory vnode.
        fn root(&self) -> Result<VnodeHandle, KernelError>;

        /// Returns the unique in-memory vnode for `ino`, loading it from
        /// disk on first use and counting a reference. (`vget`.)
        fn get_vnode(&self, ino: InodeNumber) -> Result<VnodeHandle, KernelError>;

        /// Writes every dirty page and inode back to the device.
        fn sync(&self) -> Result<(), KernelError>;

        /// Validates that link counts on disk agree with the directory
        /// tree reachable from the root (the live-vnode +1 offset
        /// accounted for).
        fn check_refcounts(&self) -> Result<(), KernelError>;

        /// Flushes everything and detaches from the device. The instance
        /// is unusable afterwards.
        fn unmount(&self) -> Result<(), KernelError>;
    }

    /// Operations on one file-system object.
    ///
    /// This is the vnode operation vector. Which entry points an object
    /// supports follows from its kind: the defaults return the error a
    /// caller of an unsupported operation deserves, so a regular file
    /// implements the file half and a directory the directory half.
    pub trait Vnode: Send + Sync {
        /// The file system this vnode belongs to.
        fn fsid(&self) -> FsId;

        /// Inode number, unique within the file system.
        fn ino(&self) -> InodeNumber;

        /// Object kind.
        fn kind(&self) -> VnodeKind;

        /// Object size in bytes. For directories, the byte size of the
        /// entry table.
        fn size(&self) -> usize;

        /// File metadata.
        fn stat(&self) -> Result<Stat, KernelError>;

        /// Reads up to `buf.len()` bytes from byte offset `off`.
        fn read(&self, off: usize, buf: &mut [u8]) -> Result<usize, KernelError> {
            let _ = (off, buf);
            Err(KernelError::NotSupportedOperation)
        }

        /// Writes `buf` at byte offset `off`, extending the file as
        /// needed.
        fn write(&self, off: usize, buf: &[u8]) -> Result<usize, KernelError> {
            let _ = (off, buf);
            Err(KernelError::NotSupportedOperation)
        }

        /// Looks up `name` in this directory.
        fn lookup(&self, name: &str) -> Result<VnodeHandle, KernelError> {
            let _ = name;
            Err(KernelError::NotDirectory)
        }

        /// Creates a regular file named `name` in this directory.
        fn create(&self, name: &str) -> Result<VnodeHandle, KernelError> {
            let _ = name;
            Err(KernelError::NotDirectory)
        }

        /// Creates a device node named `name` in this directory.
        fn mknod(&self, name: &str, kind: VnodeKind) -> Result<VnodeHandle, KernelError> {
            let _ = (name, kind);
            Err(KernelError::NotDirectory)
        }

        /// Links `target` under `name` in this directory.
        fn link(&self, name: &str, target: &VnodeHandle) -> Result<(), KernelError> {
            let _ = (name, target);
            Err(KernelError::NotDirectory)
        }

        /// Removes the entry `name` from this directory.
        fn unlink(&self, name: &str) -> Result<(), KernelError> {
            let _ = name;
            Err(KernelError::NotDirectory)
        }

        /// Creates a subdirectory named `name`.
        fn mkdir(&self, name: &str) -> Result<VnodeHandle, KernelError> {
            let _ = name;
            Err(KernelError::NotDirectory)
        }

        /// Removes the empty subdirectory `name`.
        fn rmdir(&self, name: &str) -> Result<(), KernelError> {
            let _ = name;
            Err(KernelError::NotDirectory)
        }

        /// Reads the entry at byte position `pos` of this directory.
        ///
        /// Returns the next position and the entry, or `None` at the end.
        fn readdir(&self, pos: usize) -> Result<Option<(usize, DirEntry)>, KernelError> {
            let _ = pos;
            Err(KernelError::NotDirectory)
        }

        /// Fills one page-cache page of this file: page `pageno` of the
        /// file's contents, zero-padded past end of file.
        fn fillpage(&self, pageno: usize, buf: &mut [u8]) -> Result<(), KernelError> {
            let _ = (pageno, buf);
            Err(KernelError::NotSupportedOperation)
        }

        /// Prepares page `pageno` for modification, reserving backing
        /// store for a sparse region.
        fn dirtypage(&self, pageno: usize) -> Result<(), KernelError> {
            let _ = pageno;
            Err(KernelError::NotSupportedOperation)
        }

        /// Writes one page of this file back to disk.
        fn cleanpage(&self, pageno: usize, buf: &[u8]) -> Result<(), KernelError> {
            let _ = (pageno, buf);
            Err(KernelError::NotSupportedOperation)
        }
    }
}

/// A handle to a vnode.
///
/// Cloning the handle counts a reference on the same underlying vnode.
#[derive(Clone)]
pub struct Vnode(pub Arc<dyn traits::Vnode>);

impl Vnode {
    /// Creates a [`Vnode`] handle from an implementation of
    /// [`traits::Vnode`].
    pub fn new(v: impl traits::Vnode + 'static) -> Self {
        Self(Arc::new(v))
    }

    /// Whether two handles refer to the same vnode.
    pub fn ptr_eq(&self, other: &Vnode) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Number of live handles to this vnode, this one included.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    /// The file system this vnode belongs to.
    #[inline]
    pub fn fsid(&self) -> FsId {
        self.0.fsid()
    }

    /// Inode number.
    #[inline]
    pub fn ino(&self) -> InodeNumber {
        self.0.ino()
    }

    /// Object kind.
    #[inline]
    pub fn kind(&self) -> VnodeKind {
        self.0.kind()
    }

    /// Whether this vnode is a directory.
    #[inline]
    pub fn is_dir(&self) -> bool {
        self.kind() == VnodeKind::Directory
    }

    /// Object size in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.0.size()
    }

    /// See [`traits::Vnode::stat`].
    pub fn stat(&self) -> Result<Stat, KernelError> {
        self.0.stat()
    }

    /// See [`traits::Vnode::read`].
    pub fn read(&self, off: usize, buf: &mut [u8]) -> Result<usize, KernelError> {
        self.0.read(off, buf)
    }

    /// See [`traits::Vnode::write`].
    pub fn write(&self, off: usize, buf: &[u8]) -> Result<usize, KernelError> {
        self.0.write(off, buf)
    }

    /// See [`traits::Vnode::lookup`].
    pub fn lookup(&self, name: &str) -> Result<Vnode, KernelError> {
        self.0.lookup(name)
    }

    /// See [`traits::Vnode::create`].
    pub fn create(&self, name: &str) -> Result<Vnode, KernelError> {
        self.0.create(name)
    }

    /// See [`traits::Vnode::mknod`].
    pub fn mknod(&self, name: &str, kind: VnodeKind) -> Result<Vnode, KernelError> {
        self.0.mknod(name, kind)
    }

    /// See [`traits::Vnode::link`].
    pub fn link(&self, name: &str, target: &Vnode) -> Result<(), KernelError> {
        self.0.link(name, target)
    }

    /// See [`traits::Vnode::unlink`].
    pub fn unlink(&self, name: &str) -> Result<(), KernelError> {
        self.0.unlink(name)
    }

    /// See [`traits::Vnode::mkdir`].
    pub fn mkdir(&self, name: &str) -> Result<Vnode, KernelError> {
        self.0.mkdir(name)
    }

    /// See [`traits::Vnode::rmdir`].
    pub fn rmdir(&self, name: &str) -> Result<(), KernelError> {
        self.0.rmdir(name)
    }

    /// See [`traits::Vnode::readdir`].
    pub fn readdir(&self, pos: usize) -> Result<Option<(usize, DirEntry)>, KernelError> {
        self.0.readdir(pos)
    }

    /// See [`traits::Vnode::fillpage`].
    pub fn fillpage(&self, pageno: usize, buf: &mut [u8]) -> Result<(), KernelError> {
        self.0.fillpage(pageno, buf)
    }

    /// See [`traits::Vnode::dirtypage`].
    pub fn dirtypage(&self, pageno: usize) -> Result<(), KernelError> {
        self.0.dirtypage(pageno)
    }

    /// See [`traits::Vnode::cleanpage`].
    pub fn cleanpage(&self, pageno: usize, buf: &[u8]) -> Result<(), KernelError> {
        self.0.cleanpage(pageno, buf)
    }

    /// The memory object mapping this vnode's pages.
    ///
    /// Regular files page through their own contents; a block-device node
    /// pages straight through the device. Handles for the same file share
    /// one page-cache identity.
    pub fn mmobj(&self) -> Result<MemObject, KernelError> {
        match self.kind() {
            VnodeKind::Regular => Ok(MemObject::for_vnode(self.clone())),
            VnodeKind::BlockDevice(devid) => {
                let bdev = dev::get_bdev(devid).ok_or(KernelError::NoSuchDevice)?;
                Ok(MemObject::device(devid, bdev))
            }
            _ => Err(KernelError::NotSupportedOperation),
        }
    }
}

impl core::fmt::Debug for Vnode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "Vnode(fs={:?}, ino={}, {:?})",
            self.fsid(),
            self.ino().into_u32(),
            self.kind()
        )
    }
}
