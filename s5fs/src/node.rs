//! Vnodes of the S5 file system.
//!
//! An [`S5Node`] is the in-memory side of one on-disk inode, and it
//! carries two locks with two different jobs:
//!
//! - The **operation mutex** serializes whole vnode operations. Every
//!   entry point takes it on entry and holds it to the last exit path, so
//!   the helpers below (`find_dirent`, `insert_dirent`, `read_at`,
//!   `seek_to_block`, ...) can assume exclusive use of the vnode and never
//!   re-acquire it themselves. An operation that structurally involves a
//!   second existing vnode (`link`, `unlink`, `rmdir`) takes both
//!   operation mutexes in ascending inode order and re-validates the
//!   directory entry once they are held.
//! - The **inode field lock** guards the in-memory copy of the inode
//!   fields (type, size, link count, block map) in short sections that
//!   never span I/O. It exists for the page hooks at the bottom of this
//!   file: those run *inside* cache fills and writebacks of this very
//!   node's pages, on behalf of whoever holds the operation mutex (or of
//!   the fault path, where the cache's per-frame busy flag serializes the
//!   work), so they must not touch the operation mutex themselves.
//!
//! Lock order, outermost first: operation mutex(es) → page cache → the
//! file system's free-list mutex.
//!
//! ## Data paths
//!
//! File contents (and directory tables; a directory is a file of
//! fixed-size entries) are accessed page-by-page through the file's
//! memory object: [`read_at`]/[`write_at`] copy through the page cache,
//! and the cache reaches back into [`fillpage`]/[`cleanpage`] to move
//! whole pages between frames and disk blocks. Writes reserve their disk
//! block *before* the frame is dirtied, in [`dirtypage`], so a sparse
//! region gains its block exactly when the first write arrives.
//!
//! [`read_at`]: S5Node::read_at
//! [`write_at`]: S5Node::write_at
//! [`fillpage`]: osmium::fs::traits::Vnode::fillpage
//! [`cleanpage`]: osmium::fs::traits::Vnode::cleanpage
//! [`dirtypage`]: osmium::fs::traits::Vnode::dirtypage

use alloc::{string::ToString, sync::Arc, sync::Weak, vec::Vec};

use osmium::{
    dev::{BlockDevice, DevId},
    fs::{traits, traits::Vnode as _, DirEntry, FsId, InodeNumber, Stat, Vnode, VnodeKind},
    mm::{mmobj::MemObject, pframe},
    sync::Mutex,
    KernelError,
};

use crate::{
    disk_layout::{RawDirent, RawInode, RawInodeType, S5_DIRENT_SIZE},
    fs::S5FileSystemInner,
    S5_BLOCK_SIZE, S5_MAX_FILE_BLOCKS, S5_NAME_LEN, S5_NDIRECT, S5_NINDIRECT,
};

pub(crate) struct S5NodeInner {
    typ: RawInodeType,
    size: usize,
    /// On-disk link count; `stat` reports one more while the node is
    /// live.
    nlink: u16,
    direct: [u32; S5_NDIRECT],
    /// Indirect block pointer, or the device id for device inodes.
    indirect: u32,
}

/// One file-system object, in memory.
pub struct S5Node {
    fs: Weak<S5FileSystemInner>,
    fsid: FsId,
    ino: InodeNumber,
    /// The vnode's operation mutex; see the module documentation.
    op: Mutex<()>,
    inner: Mutex<S5NodeInner>,
}

impl S5Node {
    pub(crate) fn from_raw(
        fs: Weak<S5FileSystemInner>,
        fsid: FsId,
        ino: InodeNumber,
        raw: &RawInode,
    ) -> Result<Self, KernelError> {
        let typ = RawInodeType::try_from(raw.typ)
            .map_err(|_| KernelError::FilesystemCorrupted("unknown inode type"))?;
        if typ == RawInodeType::Free {
            return Err(KernelError::NoSuchEntry);
        }
        Ok(S5Node {
            fs,
            fsid,
            ino,
            op: Mutex::new(()),
            inner: Mutex::new(S5NodeInner {
                typ,
                size: raw.size as usize,
                nlink: raw.nlink,
                direct: raw.direct,
                indirect: raw.indirect,
            }),
        })
    }

    pub(crate) fn ino(&self) -> InodeNumber {
        self.ino
    }

    fn fs(&self) -> Result<Arc<S5FileSystemInner>, KernelError> {
        self.fs
            .upgrade()
            .ok_or(KernelError::FilesystemCorrupted("file system unmounted"))
    }

    fn with_inner<R>(&self, f: impl FnOnce(&mut S5NodeInner) -> R) -> R {
        let mut inner = self.inner.lock();
        let r = f(&mut inner);
        inner.unlock();
        r
    }

    /// Runs `f` with this vnode's operation mutex held.
    fn with_op<R>(&self, f: impl FnOnce() -> R) -> R {
        let guard = self.op.lock();
        let r = f();
        guard.unlock();
        r
    }

    /// Runs `f` with the operation mutexes of both vnodes held, acquired
    /// in ascending inode order.
    fn with_op_pair<R>(a: &S5Node, b: &S5Node, f: impl FnOnce() -> R) -> R {
        let (first, second) = if a.ino.into_u32() <= b.ino.into_u32() {
            (a, b)
        } else {
            (b, a)
        };
        let outer = first.op.lock();
        if first.ino == second.ino {
            let r = f();
            outer.unlock();
            return r;
        }
        let inner = second.op.lock();
        let r = f();
        inner.unlock();
        outer.unlock();
        r
    }

    fn typ(&self) -> RawInodeType {
        self.with_inner(|i| i.typ)
    }

    pub(crate) fn nlink(&self) -> u16 {
        self.with_inner(|i| i.nlink)
    }

    pub(crate) fn bump_nlink(&self, delta: i32) -> Result<(), KernelError> {
        self.with_inner(|i| {
            i.nlink = (i.nlink as i32 + delta) as u16;
        });
        self.update()
    }

    /// Writes the in-memory inode back to its slot on disk.
    pub(crate) fn update(&self) -> Result<(), KernelError> {
        let (raw, ino) = self.with_inner(|i| {
            (
                RawInode {
                    typ: i.typ as u16,
                    nlink: i.nlink,
                    size: i.size as u32,
                    direct: i.direct,
                    indirect: i.indirect,
                    _pad: 0,
                },
                self.ino.into_u32(),
            )
        });
        self.fs()?.write_raw_inode(ino, &raw)
    }

    /// The memory object this node's contents page through.
    fn contents_obj(&self) -> Result<MemObject, KernelError> {
        let fs = self.fs()?;
        Ok(MemObject::for_vnode(fs.node_vnode(self.ino)?))
    }

    /// Translates a byte offset into the disk block holding it.
    ///
    /// Returns `None` for a sparse position when `alloc` is false. With
    /// `alloc` set, a missing block (and, past the direct slots, a missing
    /// indirect block) is allocated from the free list, installed, and the
    /// inode written back.
    pub(crate) fn seek_to_block(
        &self,
        file_block: usize,
        alloc: bool,
    ) -> Result<Option<u32>, KernelError> {
        if file_block >= S5_MAX_FILE_BLOCKS {
            return Err(KernelError::InvalidArgument);
        }
        let fs = self.fs()?;

        if file_block < S5_NDIRECT {
            let cur = self.with_inner(|i| i.direct[file_block]);
            if cur != 0 {
                return Ok(Some(cur));
            }
            if !alloc {
                return Ok(None);
            }
            let fresh = fs.alloc_block()?;
            // Another thread may have filled the slot while we were at
            // the allocator; keep theirs and give ours back.
            let installed = self.with_inner(|i| {
                if i.direct[file_block] == 0 {
                    i.direct[file_block] = fresh;
                    None
                } else {
                    Some(i.direct[file_block])
                }
            });
            return match installed {
                None => {
                    self.update()?;
                    Ok(Some(fresh))
                }
                Some(existing) => {
                    fs.free_block(fresh)?;
                    Ok(Some(existing))
                }
            };
        }

        let idx = file_block - S5_NDIRECT;
        debug_assert!(idx < S5_NINDIRECT);

        let mut indirect = self.with_inner(|i| i.indirect);
        if indirect == 0 {
            if !alloc {
                return Ok(None);
            }
            let fresh = fs.alloc_block()?;
            let installed = self.with_inner(|i| {
                if i.indirect == 0 {
                    i.indirect = fresh;
                    None
                } else {
                    Some(i.indirect)
                }
            });
            indirect = match installed {
                None => {
                    self.update()?;
                    fresh
                }
                Some(existing) => {
                    fs.free_block(fresh)?;
                    existing
                }
            };
        }

        let entry = {
            let page = fs.block_page(indirect as usize)?;
            u32::from_le_bytes(page.inner()[idx * 4..idx * 4 + 4].try_into().unwrap())
        };
        if entry != 0 {
            return Ok(Some(entry));
        }
        if !alloc {
            return Ok(None);
        }

        let fresh = fs.alloc_block()?;
        let mut page = fs.block_page(indirect as usize)?;
        let buf = page.inner_mut();
        let existing = u32::from_le_bytes(buf[idx * 4..idx * 4 + 4].try_into().unwrap());
        if existing != 0 {
            fs.free_block(fresh)?;
            return Ok(Some(existing));
        }
        buf[idx * 4..idx * 4 + 4].copy_from_slice(&fresh.to_le_bytes());
        fs.dirty_block(indirect as usize)?;
        Ok(Some(fresh))
    }

    /// Reads file contents through the page cache.
    pub(crate) fn read_at(&self, off: usize, buf: &mut [u8]) -> Result<usize, KernelError> {
        let size = self.with_inner(|i| i.size);
        if off >= size {
            return Ok(0);
        }
        let n = buf.len().min(size - off);
        let obj = self.contents_obj()?;

        let mut copied = 0;
        while copied < n {
            let pos = off + copied;
            let pageno = pos / S5_BLOCK_SIZE;
            let page_off = pos % S5_BLOCK_SIZE;
            let chunk = (S5_BLOCK_SIZE - page_off).min(n - copied);
            let page = pframe::get(&obj, pageno)?;
            buf[copied..copied + chunk]
                .copy_from_slice(&page.inner()[page_off..page_off + chunk]);
            copied += chunk;
        }
        Ok(n)
    }

    /// Writes file contents through the page cache, extending the file
    /// and allocating blocks as needed.
    pub(crate) fn write_at(&self, off: usize, buf: &[u8]) -> Result<usize, KernelError> {
        let cap = S5_MAX_FILE_BLOCKS * S5_BLOCK_SIZE;
        if off >= cap {
            return Err(KernelError::NoSpace);
        }
        let n = buf.len().min(cap - off);
        if n == 0 {
            return Ok(0);
        }
        let obj = self.contents_obj()?;

        let mut copied = 0;
        while copied < n {
            let pos = off + copied;
            let pageno = pos / S5_BLOCK_SIZE;
            let page_off = pos % S5_BLOCK_SIZE;
            let chunk = (S5_BLOCK_SIZE - page_off).min(n - copied);
            let mut page = pframe::get(&obj, pageno)?;
            // Reserve the backing block before the frame carries data
            // the store has no home for.
            pframe::dirty(&obj, pageno)?;
            page.inner_mut()[page_off..page_off + chunk]
                .copy_from_slice(&buf[copied..copied + chunk]);
            copied += chunk;
        }

        let grew = self.with_inner(|i| {
            if off + n > i.size {
                i.size = off + n;
                true
            } else {
                false
            }
        });
        if grew {
            self.update()?;
        }
        Ok(n)
    }

    // Directory internals. A directory is a file of fixed-size entries;
    // a zero inode number marks a free slot.

    fn dirent_at(&self, idx: usize) -> Result<RawDirent, KernelError> {
        let mut buf = [0u8; S5_DIRENT_SIZE];
        let n = self.read_at(idx * S5_DIRENT_SIZE, &mut buf)?;
        if n != S5_DIRENT_SIZE {
            return Err(KernelError::FilesystemCorrupted("truncated directory"));
        }
        Ok(unsafe { core::ptr::read_unaligned(buf.as_ptr() as *const RawDirent) })
    }

    fn set_dirent_at(&self, idx: usize, entry: &RawDirent) -> Result<(), KernelError> {
        let bytes = unsafe {
            core::slice::from_raw_parts(entry as *const RawDirent as *const u8, S5_DIRENT_SIZE)
        };
        self.write_at(idx * S5_DIRENT_SIZE, bytes).map(|_| ())
    }

    fn dirent_count(&self) -> usize {
        self.with_inner(|i| i.size) / S5_DIRENT_SIZE
    }

    /// All live entries of this directory.
    pub(crate) fn dirents(&self) -> Result<Vec<RawDirent>, KernelError> {
        if self.typ() != RawInodeType::Dir {
            return Err(KernelError::NotDirectory);
        }
        let mut out = Vec::new();
        for idx in 0..self.dirent_count() {
            let entry = self.dirent_at(idx)?;
            if entry.ino != 0 {
                out.push(entry);
            }
        }
        Ok(out)
    }

    /// Linear scan for `name`; the slot index and inode on a hit.
    fn find_dirent(&self, name: &str) -> Result<Option<(usize, u32)>, KernelError> {
        if self.typ() != RawInodeType::Dir {
            return Err(KernelError::NotDirectory);
        }
        if name.is_empty() || name.len() > S5_NAME_LEN {
            return Err(KernelError::NameTooLong);
        }
        for idx in 0..self.dirent_count() {
            let entry = self.dirent_at(idx)?;
            if entry.is(name) {
                return Ok(Some((idx, entry.ino)));
            }
        }
        Ok(None)
    }

    /// Writes a new entry into the first free slot, growing the table if
    /// none is free. Link counts are the caller's business.
    pub(crate) fn insert_dirent(&self, name: &str, ino: InodeNumber) -> Result<(), KernelError> {
        let entry =
            RawDirent::new(ino.into_u32(), name).ok_or(KernelError::NameTooLong)?;
        let count = self.dirent_count();
        for idx in 0..count {
            if self.dirent_at(idx)?.ino == 0 {
                return self.set_dirent_at(idx, &entry);
            }
        }
        self.set_dirent_at(count, &entry)
    }

    /// Clears the entry for `name`, returning the inode it referred to.
    fn remove_dirent(&self, name: &str) -> Result<u32, KernelError> {
        let (idx, ino) = self
            .find_dirent(name)?
            .ok_or(KernelError::NoSuchEntry)?;
        self.set_dirent_at(idx, &RawDirent::EMPTY)?;
        Ok(ino)
    }

    /// Whether the directory holds nothing but `.` and `..`.
    fn is_empty_dir(&self) -> Result<bool, KernelError> {
        for entry in self.dirents()? {
            match entry.name() {
                Some(".") | Some("..") => {}
                _ => return Ok(false),
            }
        }
        Ok(true)
    }

    /// Guard for operations that add entries: a directory that has been
    /// removed must not grow new children.
    fn alive_dir(&self) -> Result<(), KernelError> {
        if self.typ() != RawInodeType::Dir {
            return Err(KernelError::NotDirectory);
        }
        if self.nlink() == 0 {
            return Err(KernelError::NoSuchEntry);
        }
        Ok(())
    }

    fn devid(&self) -> DevId {
        DevId::from_u32(self.with_inner(|i| i.indirect))
    }

    /// Blocks allocated to this node, indirect block included.
    fn block_usage(&self) -> Result<usize, KernelError> {
        let (typ, direct, indirect) = self.with_inner(|i| (i.typ, i.direct, i.indirect));
        if !matches!(typ, RawInodeType::Data | RawInodeType::Dir) {
            return Ok(0);
        }
        let mut blocks = direct.iter().filter(|&&b| b != 0).count();
        if indirect != 0 {
            blocks += 1;
            let page = self.fs()?.block_page(indirect as usize)?;
            blocks += page
                .inner()
                .chunks_exact(4)
                .filter(|c| u32::from_le_bytes((*c).try_into().unwrap()) != 0)
                .count();
        }
        Ok(blocks)
    }
}

impl traits::Vnode for S5Node {
    fn fsid(&self) -> FsId {
        self.fsid
    }

    fn ino(&self) -> InodeNumber {
        self.ino
    }

    fn kind(&self) -> VnodeKind {
        match self.typ() {
            RawInodeType::Data => VnodeKind::Regular,
            RawInodeType::Dir => VnodeKind::Directory,
            RawInodeType::Chr => VnodeKind::CharDevice(self.devid()),
            RawInodeType::Blk => VnodeKind::BlockDevice(self.devid()),
            RawInodeType::Free => unreachable!("free inode behind a live vnode"),
        }
    }

    fn size(&self) -> usize {
        self.with_inner(|i| i.size)
    }

    fn stat(&self) -> Result<Stat, KernelError> {
        self.with_op(|| {
            Ok(Stat {
                ino: self.ino.into_u32(),
                kind: self.kind(),
                size: self.size(),
                // The vnode itself holds the +1.
                nlink: self.nlink() as usize + 1,
                blocks: self.block_usage()?,
            })
        })
    }

    fn read(&self, off: usize, buf: &mut [u8]) -> Result<usize, KernelError> {
        self.with_op(|| match self.typ() {
            RawInodeType::Data => self.read_at(off, buf),
            RawInodeType::Dir => Err(KernelError::IsDirectory),
            RawInodeType::Blk => {
                let devid = self.devid();
                let bdev =
                    osmium::dev::get_bdev(devid).ok_or(KernelError::NoSuchDevice)?;
                let obj = MemObject::device(devid, bdev.clone());
                let dev_size = bdev.block_count() * S5_BLOCK_SIZE;
                if off >= dev_size {
                    return Ok(0);
                }
                let n = buf.len().min(dev_size - off);
                let mut copied = 0;
                while copied < n {
                    let pos = off + copied;
                    let (pageno, page_off) = (pos / S5_BLOCK_SIZE, pos % S5_BLOCK_SIZE);
                    let chunk = (S5_BLOCK_SIZE - page_off).min(n - copied);
                    let page = pframe::get(&obj, pageno)?;
                    buf[copied..copied + chunk]
                        .copy_from_slice(&page.inner()[page_off..page_off + chunk]);
                    copied += chunk;
                }
                Ok(n)
            }
            _ => Err(KernelError::NotSupportedOperation),
        })
    }

    fn write(&self, off: usize, buf: &[u8]) -> Result<usize, KernelError> {
        self.with_op(|| match self.typ() {
            RawInodeType::Data => self.write_at(off, buf),
            RawInodeType::Dir => Err(KernelError::IsDirectory),
            RawInodeType::Blk => {
                let devid = self.devid();
                let bdev =
                    osmium::dev::get_bdev(devid).ok_or(KernelError::NoSuchDevice)?;
                let obj = MemObject::device(devid, bdev.clone());
                let dev_size = bdev.block_count() * S5_BLOCK_SIZE;
                if off >= dev_size {
                    return Err(KernelError::NoSpace);
                }
                let n = buf.len().min(dev_size - off);
                let mut copied = 0;
                while copied < n {
                    let pos = off + copied;
                    let (pageno, page_off) = (pos / S5_BLOCK_SIZE, pos % S5_BLOCK_SIZE);
                    let chunk = (S5_BLOCK_SIZE - page_off).min(n - copied);
                    let mut page = pframe::get(&obj, pageno)?;
                    pframe::dirty(&obj, pageno)?;
                    page.inner_mut()[page_off..page_off + chunk]
                        .copy_from_slice(&buf[copied..copied + chunk]);
                    copied += chunk;
                }
                Ok(n)
            }
            _ => Err(KernelError::NotSupportedOperation),
        })
    }

    fn lookup(&self, name: &str) -> Result<Vnode, KernelError> {
        self.with_op(|| {
            let (_, ino) = self
                .find_dirent(name)?
                .ok_or(KernelError::NoSuchEntry)?;
            let ino = InodeNumber::new(ino)
                .ok_or(KernelError::FilesystemCorrupted("entry names inode zero"))?;
            self.fs()?.node_vnode(ino)
        })
    }

    fn create(&self, name: &str) -> Result<Vnode, KernelError> {
        self.with_op(|| {
            self.alive_dir()?;
            if self.find_dirent(name)?.is_some() {
                return Err(KernelError::FileExist);
            }
            let fs = self.fs()?;
            let ino = fs.alloc_inode(RawInodeType::Data, 0)?;
            match self.insert_dirent(name, ino) {
                Ok(()) => {}
                Err(e) => {
                    fs.free_inode(ino)?;
                    return Err(e);
                }
            }
            let node = fs.get_node(ino)?;
            node.bump_nlink(1)?;
            Ok(Vnode(node))
        })
    }

    fn mknod(&self, name: &str, kind: VnodeKind) -> Result<Vnode, KernelError> {
        self.with_op(|| {
            self.alive_dir()?;
            let (typ, devid) = match kind {
                VnodeKind::CharDevice(devid) => (RawInodeType::Chr, devid),
                VnodeKind::BlockDevice(devid) => (RawInodeType::Blk, devid),
                _ => return Err(KernelError::InvalidArgument),
            };
            if self.find_dirent(name)?.is_some() {
                return Err(KernelError::FileExist);
            }
            let fs = self.fs()?;
            let ino = fs.alloc_inode(typ, devid.into_u32())?;
            match self.insert_dirent(name, ino) {
                Ok(()) => {}
                Err(e) => {
                    fs.free_inode(ino)?;
                    return Err(e);
                }
            }
            let node = fs.get_node(ino)?;
            node.bump_nlink(1)?;
            Ok(Vnode(node))
        })
    }

    fn link(&self, name: &str, target: &Vnode) -> Result<(), KernelError> {
        if target.is_dir() {
            return Err(KernelError::OperationNotPermitted);
        }
        if target.fsid() != self.fsid {
            return Err(KernelError::InvalidArgument);
        }
        let fs = self.fs()?;
        let target_node = fs.get_node(target.ino())?;
        S5Node::with_op_pair(self, &target_node, || {
            self.alive_dir()?;
            if self.find_dirent(name)?.is_some() {
                return Err(KernelError::FileExist);
            }
            self.insert_dirent(name, target.ino())?;
            target_node.bump_nlink(1)
        })
    }

    fn unlink(&self, name: &str) -> Result<(), KernelError> {
        if name == "." || name == ".." {
            return Err(KernelError::InvalidArgument);
        }
        let fs = self.fs()?;
        // Peek at the target so both operation mutexes can be taken in
        // inode order; the entry is checked again once they are held.
        let (_, peeked) = self
            .find_dirent(name)?
            .ok_or(KernelError::NoSuchEntry)?;
        let ino = InodeNumber::new(peeked)
            .ok_or(KernelError::FilesystemCorrupted("entry names inode zero"))?;
        let target = fs.get_node(ino)?;
        S5Node::with_op_pair(self, &target, || {
            let (_, now) = self
                .find_dirent(name)?
                .ok_or(KernelError::NoSuchEntry)?;
            if now != peeked {
                return Err(KernelError::NoSuchEntry);
            }
            if target.typ() == RawInodeType::Dir {
                return Err(KernelError::IsDirectory);
            }
            self.remove_dirent(name)?;
            target.bump_nlink(-1)
        })?;
        drop(target);
        fs.try_reap(ino)
    }

    fn mkdir(&self, name: &str) -> Result<Vnode, KernelError> {
        // The child is invisible until the parent entry lands, and the
        // parent stays locked until then; only one operation mutex is
        // needed.
        self.with_op(|| {
            self.alive_dir()?;
            if self.find_dirent(name)?.is_some() {
                return Err(KernelError::FileExist);
            }
            let fs = self.fs()?;
            let ino = fs.alloc_inode(RawInodeType::Dir, 0)?;
            let child = fs.get_node(ino)?;

            // The child's own table first: `.` carries no link count,
            // `..` counts toward the parent.
            child.insert_dirent(".", ino)?;
            child.insert_dirent("..", self.ino)?;
            self.bump_nlink(1)?;

            match self.insert_dirent(name, ino) {
                Ok(()) => {}
                Err(e) => {
                    self.bump_nlink(-1)?;
                    drop(child);
                    fs.forget_node(ino);
                    fs.free_inode(ino)?;
                    return Err(e);
                }
            }
            child.bump_nlink(1)?;
            fs.node_vnode(ino)
        })
    }

    fn rmdir(&self, name: &str) -> Result<(), KernelError> {
        if name == "." || name == ".." {
            return Err(KernelError::InvalidArgument);
        }
        let fs = self.fs()?;
        // Peek at the child so both operation mutexes can be taken in
        // inode order; the entry is checked again once they are held.
        let (_, peeked) = self
            .find_dirent(name)?
            .ok_or(KernelError::NoSuchEntry)?;
        let ino = InodeNumber::new(peeked)
            .ok_or(KernelError::FilesystemCorrupted("entry names inode zero"))?;
        let child = fs.get_node(ino)?;
        S5Node::with_op_pair(self, &child, || {
            let (_, now) = self
                .find_dirent(name)?
                .ok_or(KernelError::NoSuchEntry)?;
            if now != peeked {
                return Err(KernelError::NoSuchEntry);
            }
            if child.typ() != RawInodeType::Dir {
                return Err(KernelError::NotDirectory);
            }
            if !child.is_empty_dir()? {
                return Err(KernelError::DirectoryNotEmpty);
            }

            // Dropping the child's `..` releases its hold on this
            // directory.
            self.remove_dirent(name)?;
            child.bump_nlink(-1)?;
            self.bump_nlink(-1)
        })?;
        drop(child);
        fs.try_reap(ino)
    }

    fn readdir(&self, pos: usize) -> Result<Option<(usize, DirEntry)>, KernelError> {
        self.with_op(|| {
            if self.typ() != RawInodeType::Dir {
                return Err(KernelError::NotDirectory);
            }
            let count = self.dirent_count();
            let mut idx = pos / S5_DIRENT_SIZE;
            while idx < count {
                let entry = self.dirent_at(idx)?;
                idx += 1;
                if entry.ino == 0 {
                    continue;
                }
                let name = entry
                    .name()
                    .ok_or(KernelError::FilesystemCorrupted("bad entry name"))?;
                return Ok(Some((
                    idx * S5_DIRENT_SIZE,
                    DirEntry {
                        ino: InodeNumber::new(entry.ino)
                            .ok_or(KernelError::FilesystemCorrupted("entry names inode zero"))?,
                        name: name.to_string(),
                    },
                )));
            }
            Ok(None)
        })
    }

    fn fillpage(&self, pageno: usize, buf: &mut [u8]) -> Result<(), KernelError> {
        let buf: &mut [u8; S5_BLOCK_SIZE] = buf
            .try_into()
            .map_err(|_| KernelError::InvalidArgument)?;
        match self.seek_to_block(pageno, false)? {
            // Sparse page: reads see zeros.
            None => {
                buf.fill(0);
                Ok(())
            }
            Some(blockno) => self.fs()?.dev.read_block(blockno as usize, buf),
        }
    }

    fn dirtypage(&self, pageno: usize) -> Result<(), KernelError> {
        self.seek_to_block(pageno, true).map(|_| ())
    }

    fn cleanpage(&self, pageno: usize, buf: &[u8]) -> Result<(), KernelError> {
        let buf: &[u8; S5_BLOCK_SIZE] = buf
            .try_into()
            .map_err(|_| KernelError::InvalidArgument)?;
        match self.seek_to_block(pageno, false)? {
            // Never dirtied, nothing to write.
            None => Ok(()),
            Some(blockno) => self.fs()?.dev.write_block(blockno as usize, buf),
        }
    }
}
